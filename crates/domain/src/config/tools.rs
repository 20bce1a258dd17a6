use serde::{Deserialize, Serialize};

/// Policy for the Tool Registry & Dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Reject tool-call arguments that fail JSON-schema validation instead
    /// of forwarding them to the handler. Always on in production; the
    /// flag exists so integration tests can exercise an unvalidated path.
    #[serde(default = "d_true")]
    pub validate_params: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            validate_params: d_true(),
        }
    }
}

fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates_params() {
        assert!(ToolsConfig::default().validate_params);
    }
}
