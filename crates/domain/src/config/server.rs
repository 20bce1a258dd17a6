use serde::{Deserialize, Serialize};

/// Connection settings for the room-server control plane.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// WebSocket URL of the room server (e.g. `wss://my-project.livekit.cloud`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
}

impl ServerConfig {
    /// `true` once all three fields required to open a control connection
    /// are present.
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some() && self.api_secret.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unconfigured() {
        assert!(!ServerConfig::default().is_configured());
    }

    #[test]
    fn configured_when_all_fields_present() {
        let cfg = ServerConfig {
            url: Some("wss://example.livekit.cloud".into()),
            api_key: Some("key".into()),
            api_secret: Some("secret".into()),
        };
        assert!(cfg.is_configured());
    }

    #[test]
    fn unconfigured_when_missing_secret() {
        let cfg = ServerConfig {
            url: Some("wss://example.livekit.cloud".into()),
            api_key: Some("key".into()),
            api_secret: None,
        };
        assert!(!cfg.is_configured());
    }
}
