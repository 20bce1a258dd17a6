//! `va-domain` — shared data model for the voice-agent-runtime workspace.
//!
//! Every other crate depends on this one for the wire/storage types that
//! cross crate boundaries: jobs, agent configuration, chat messages, turn
//! records, session state, and the shared `Error`/`Config` types.

pub mod agent_config;
pub mod capability;
pub mod chat;
pub mod config;
pub mod error;
pub mod job;
pub mod participant;
pub mod session_state;
pub mod stream;
pub mod trace;
pub mod turn;

pub use agent_config::{AgentConfig, AgentConfigOverride, LlmSpec, ToolSpec};
pub use capability::{LlmCapabilities, ToolSupport};
pub use chat::{ChatMessage, ContentPart, MessageContent, Role, ToolCall, ToolDefinition};
pub use config::Config;
pub use error::{Error, Result};
pub use job::{Job, JobMetadata, JobRejection};
pub use participant::{Participant, ParticipantKind};
pub use session_state::SessionState;
pub use stream::{BoxStream, StreamEvent, Usage};
pub use trace::TraceEvent;
pub use turn::TurnRecord;
