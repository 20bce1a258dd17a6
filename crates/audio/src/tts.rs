use async_trait::async_trait;
use tokio::sync::oneshot;

use va_domain::config::TtsConfig;
use va_domain::error::Result;
use va_domain::stream::BoxStream;

/// A single expressive-delivery instruction (e.g. `{kind: "empathy",
/// intensity: 0.7}`) produced by the Voice Adaptation Engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionParam {
    pub kind: String,
    pub intensity: f64,
}

/// Per-utterance synthesis parameters, set by the Voice Adaptation Engine
/// ahead of each `synthesize` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsParams {
    pub speed: f64,
    pub emotions: Vec<EmotionParam>,
    /// Delay inserted before the first audio frame, used to avoid
    /// clipping the start of an utterance over noisy transports.
    pub pre_speech_delay_ms: u64,
}

impl Default for TtsParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            emotions: Vec::new(),
            pre_speech_delay_ms: 0,
        }
    }
}

/// A running text-to-speech stream.
///
/// `done` resolves once the provider has emitted its last frame; the
/// session awaits it (with `ttsTimeoutMs` as the first-byte cap, checked
/// separately against `frames`) before transitioning out of `Speaking`.
/// The producer side blocks on a full `frames` channel rather than
/// dropping audio output — unlike the input side, dropped TTS audio is
/// audible to the caller.
pub struct TtsStream {
    pub frames: BoxStream<'static, Result<Vec<u8>>>,
    pub done: oneshot::Receiver<()>,
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// `text` arrives incrementally as the LLM streams tokens. A provider
    /// that supports streaming synthesis should begin producing audio
    /// before `text` closes; one that doesn't must buffer until `text` is
    /// exhausted (the full utterance is known) before yielding a frame.
    async fn synthesize(
        &self,
        text: BoxStream<'static, String>,
        params: &TtsParams,
        config: &TtsConfig,
    ) -> Result<TtsStream>;
}
