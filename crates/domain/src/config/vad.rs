use serde::{Deserialize, Serialize};

/// Voice-activity-detection tuning, overridable per agent via `AgentConfig::vad`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "d_model")]
    pub model: String,
    /// Probability threshold above which a frame counts as voice.
    #[serde(default = "d_sensitivity")]
    pub sensitivity: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            sensitivity: d_sensitivity(),
        }
    }
}

fn d_model() -> String {
    "silero".into()
}
fn d_sensitivity() -> f64 {
    0.5
}
