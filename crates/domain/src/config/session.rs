use serde::{Deserialize, Serialize};

/// Per-session timing budgets and the worker-wide fallback system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Grace period for a session to drain after worker shutdown or
    /// teardown is requested; force-terminated past this.
    #[serde(default = "d_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Hard cap on total call duration. `None` = unbounded.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    /// Grace period for an in-flight tool call after cancellation; its
    /// result is discarded if it doesn't return within this window.
    #[serde(default = "d_tool_shutdown_grace_ms")]
    pub tool_shutdown_grace_ms: u64,
    /// `final` STT events are held this long in case a new partial
    /// arrives, per Turn Detector debounce semantics.
    #[serde(default = "d_final_debounce_ms")]
    pub final_debounce_ms: u64,
    /// Used when a job's `AgentConfig` supplies no system prompt.
    #[serde(default = "d_instructions")]
    pub default_agent_instructions: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: d_shutdown_grace_ms(),
            call_timeout_ms: None,
            tool_shutdown_grace_ms: d_tool_shutdown_grace_ms(),
            final_debounce_ms: d_final_debounce_ms(),
            default_agent_instructions: d_instructions(),
        }
    }
}

fn d_shutdown_grace_ms() -> u64 {
    5_000
}
fn d_tool_shutdown_grace_ms() -> u64 {
    2_000
}
fn d_final_debounce_ms() -> u64 {
    200
}
fn d_instructions() -> String {
    "You are a helpful voice assistant. Keep responses brief and conversational.".into()
}
