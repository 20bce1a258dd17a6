use serde::{Deserialize, Serialize};

/// Tuning for the Voice Adaptation Engine. Advisory only: a misbehaving
/// engine never blocks a turn, so every field here has a safe default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceAdaptationConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Minimum seconds between parameter updates for a single session.
    #[serde(default = "d_rate_limit")]
    pub rate_limit_seconds: f64,
    /// Number of past turns kept for the history-mirror moving average.
    #[serde(default = "d_memory_limit")]
    pub memory_limit: usize,
}

impl Default for VoiceAdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            rate_limit_seconds: d_rate_limit(),
            memory_limit: d_memory_limit(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_rate_limit() -> f64 {
    2.0
}
fn d_memory_limit() -> usize {
    20
}
