use async_trait::async_trait;
use tokio::sync::mpsc;

use va_domain::config::SttConfig;
use va_domain::error::Result;
use va_domain::stream::BoxStream;

/// Events produced by an open speech-to-text stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Low-latency, possibly-revised interim transcript.
    Partial { text: String },
    /// A finalized utterance. Starts the Turn Detector's endpointing timer.
    Final { text: String },
}

/// A running speech-to-text stream.
///
/// `frames` is bounded; the audio-input backpressure policy is
/// to drop the oldest frame rather than block on a full channel, so
/// callers feeding audio in should use `try_send` and discard on
/// `TrySendError::Full` instead of `.await`-ing a `send`.
pub struct SttStream {
    pub frames: mpsc::Sender<Vec<u8>>,
    pub events: BoxStream<'static, Result<SttEvent>>,
}

impl SttStream {
    /// Signal end-of-audio. The provider drains any events still in
    /// flight and then closes `events`.
    pub fn close(self) {
        drop(self.frames);
    }
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn open(&self, config: &SttConfig) -> Result<SttStream>;
}
