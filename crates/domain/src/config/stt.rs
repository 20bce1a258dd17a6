use serde::{Deserialize, Serialize};

/// Speech-to-text tuning, overridable per agent via `AgentConfig::stt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_language")]
    pub language: String,
    /// Hangover timer: silence duration after VAD goes quiet before the
    /// Turn Detector declares turn end, absent an STT `final`.
    #[serde(default = "d_endpointing_ms")]
    pub endpointing_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            language: d_language(),
            endpointing_ms: d_endpointing_ms(),
        }
    }
}

fn d_model() -> String {
    "nova-2".into()
}
fn d_language() -> String {
    "en".into()
}
fn d_endpointing_ms() -> u64 {
    150
}
