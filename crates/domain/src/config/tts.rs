use serde::{Deserialize, Serialize};

/// Text-to-speech tuning, overridable per agent via `AgentConfig::tts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_voice_id")]
    pub voice_id: String,
    /// Hard cap on time-to-first-byte; on exceed the session cancels and
    /// returns to `Listening` with a brief error utterance.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            voice_id: d_voice_id(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_model() -> String {
    "sonic-2".into()
}
fn d_voice_id() -> String {
    "default".into()
}
fn d_timeout_ms() -> u64 {
    5_000
}
