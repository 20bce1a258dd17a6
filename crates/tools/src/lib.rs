//! Tool Registry & Dispatcher.
//!
//! Holds the function tools declared by an `AgentConfig`, exposes their
//! JSON-schema definitions to the LLM, validates and invokes handlers on
//! tool-call messages, and marshals results back into the chat context as
//! tool-result messages.

pub mod builtin;
pub mod control;
pub mod registry;

pub use control::SessionControl;
pub use registry::{ToolContext, ToolHandler, ToolRegistry};
