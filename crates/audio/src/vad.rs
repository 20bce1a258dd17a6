use async_trait::async_trait;
use tokio::sync::mpsc;

use va_domain::config::VadConfig;
use va_domain::error::Result;
use va_domain::stream::BoxStream;

/// Events produced by an open voice-activity-detection stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    /// Voice onset detected at `at_ms` milliseconds into the stream.
    VoiceStarted { at_ms: u64 },
    /// Voice offset detected; starts the Turn Detector's hangover timer.
    VoiceStopped { at_ms: u64 },
}

/// A running VAD stream. Same backpressure policy as [`crate::SttStream`]:
/// `frames` is bounded and a full channel drops the oldest frame.
pub struct VadStream {
    pub frames: mpsc::Sender<Vec<u8>>,
    pub events: BoxStream<'static, Result<VadEvent>>,
}

impl VadStream {
    pub fn close(self) {
        drop(self.frames);
    }
}

#[async_trait]
pub trait VadProvider: Send + Sync {
    async fn open(&self, config: &VadConfig) -> Result<VadStream>;
}
