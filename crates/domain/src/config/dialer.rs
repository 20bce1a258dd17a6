use serde::{Deserialize, Serialize};

/// Outbound SIP dialing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DialerConfig {
    /// Trunk used for outbound calls, unless a job overrides it.
    #[serde(default)]
    pub outbound_trunk_id: Option<String>,
}
