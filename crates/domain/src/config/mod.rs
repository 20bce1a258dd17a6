mod dialer;
mod llm;
mod observability;
mod server;
mod session;
mod stt;
mod tools;
mod tts;
mod vad;
mod voice_adaptation;

pub use dialer::*;
pub use llm::*;
pub use observability::*;
pub use server::*;
pub use session::*;
pub use stt::*;
pub use tools::*;
pub use tts::*;
pub use vad::*;
pub use voice_adaptation::*;

use serde::{Deserialize, Serialize};

/// Worker-wide configuration, loaded from a TOML file with environment
/// variables layered on top (env overrides file overrides built-in
/// defaults — see `va-worker::cli::load_config`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dialer: DialerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub voice_adaptation: VoiceAdaptationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Severity of a [`ConfigIssue`] found by [`Config::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// A single configuration problem surfaced by `config validate` / `doctor`.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Warning => "WARN",
            ConfigSeverity::Error => "ERROR",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

impl Config {
    /// Checks that don't fit any single sub-config's own `Default`/serde
    /// validation: cross-field and "is this actually usable" concerns.
    /// Errors block `serve`/`config validate`; warnings don't.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if !self.server.is_configured() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "server.url, server.api_key and server.api_secret must all be set \
                          to connect to the room-server control plane"
                    .into(),
            });
        }

        if self.llm.providers.is_empty() {
            let severity = match self.llm.startup_policy {
                LlmStartupPolicy::RequireOne => ConfigSeverity::Error,
                LlmStartupPolicy::AllowNone => ConfigSeverity::Warning,
            };
            issues.push(ConfigIssue {
                severity,
                message: "no LLM providers configured under [[llm.providers]]".into(),
            });
        }

        if self.dialer.outbound_trunk_id.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "dialer.outbound_trunk_id is unset; every dispatched job must carry \
                          its own trunk"
                    .into(),
            });
        }

        issues
    }
}
