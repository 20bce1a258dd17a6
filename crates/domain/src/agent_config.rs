use serde::{Deserialize, Serialize};

use crate::chat::ToolDefinition;
use crate::config::{Config, SttConfig, TtsConfig, VadConfig, VoiceAdaptationConfig};

/// Per-call agent configuration: the system prompt, provider tuning, and
/// declared tools. Loaded per-job by merging the worker's bundled
/// defaults with the overrides the job's `agent_config_id` selects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub instructions: String,
    #[serde(default)]
    pub llm: LlmSpec,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub voice_adaptation: Option<VoiceAdaptationConfig>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl AgentConfig {
    /// Build the default agent config from the worker's bundled settings
    /// (no per-job overrides).
    pub fn from_defaults(config: &Config) -> Self {
        Self {
            instructions: config.session.default_agent_instructions.clone(),
            llm: LlmSpec::default(),
            stt: config.stt.clone(),
            tts: config.tts.clone(),
            vad: config.vad.clone(),
            voice_adaptation: if config.voice_adaptation.enabled {
                Some(config.voice_adaptation.clone())
            } else {
                None
            },
            tools: Vec::new(),
        }
    }

    /// Apply a per-job override, overwriting only the fields present in
    /// `overrides`'s JSON representation (a shallow merge, not a deep one —
    /// a job either wants the bundled defaults or its own full profile).
    pub fn with_override(mut self, overrides: AgentConfigOverride) -> Self {
        if let Some(instructions) = overrides.instructions {
            self.instructions = instructions;
        }
        if let Some(llm) = overrides.llm {
            self.llm = llm;
        }
        if let Some(tools) = overrides.tools {
            self.tools = tools;
        }
        self
    }
}

/// A stored, named override applied on top of the bundled defaults when a
/// job supplies `agent_config_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigOverride {
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub llm: Option<LlmSpec>,
    #[serde(default)]
    pub tools: Option<Vec<ToolSpec>>,
}

/// Per-agent LLM tuning, distinct from the worker-level provider registry
/// (`va_domain::config::LlmConfig`): this selects which registered role/
/// model the session uses and how it's called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSpec {
    #[serde(default = "d_role")]
    pub role: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LlmSpec {
    fn default() -> Self {
        Self {
            role: d_role(),
            temperature: d_temperature(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_role() -> String {
    "main".into()
}
fn d_temperature() -> f32 {
    0.7
}
fn d_timeout_ms() -> u64 {
    30_000
}

/// A function tool declared in an `AgentConfig`. The Tool Registry turns
/// these into `ToolDefinition`s advertised to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

impl From<&ToolSpec> for ToolDefinition {
    fn from(spec: &ToolSpec) -> Self {
        ToolDefinition {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters.clone(),
        }
    }
}
