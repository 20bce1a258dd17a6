//! Tool Registry & Dispatcher.
//!
//! Tools are registered at session start from the agent's declared
//! [`ToolSpec`](va_domain::ToolSpec) list plus the always-on built-ins.
//! On an LLM tool-call message the dispatcher validates the arguments
//! against the tool's JSON-schema, invokes the handler under the
//! session's cancellation scope, and returns a tool-result
//! [`ChatMessage`].

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::Validator;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use va_domain::chat::{ChatMessage, ToolCall, ToolDefinition};
use va_domain::config::ToolsConfig;
use va_domain::error::{Error, Result};

use crate::control::SessionControl;

/// Everything a tool handler needs to invoke its side effects.
pub struct ToolContext {
    pub session_id: String,
    pub cancel: CancellationToken,
    pub control: Arc<dyn SessionControl>,
}

/// A single tool's business logic.
///
/// Handlers receive already schema-validated arguments (unless
/// [`ToolsConfig::validate_params`] is disabled) and return the JSON value
/// that becomes the tool-result content.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
    validator: Option<Validator>,
}

/// Holds every tool available to a session's LLM and dispatches tool-call
/// messages to their handlers.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    validate_params: bool,
}

impl ToolRegistry {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            tools: HashMap::new(),
            validate_params: config.validate_params,
        }
    }

    /// Register a tool. The schema is compiled eagerly so a malformed
    /// schema fails at registration time rather than on first dispatch.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        let validator = if self.validate_params {
            Some(jsonschema::validator_for(&definition.parameters).map_err(|e| {
                Error::Config(format!(
                    "tool '{}' has an invalid parameter schema: {e}",
                    definition.name
                ))
            })?)
        } else {
            None
        };

        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
                validator,
            },
        );
        Ok(())
    }

    /// Tool definitions to advertise to the LLM, in registration order is
    /// not preserved (HashMap); callers that need a stable order should
    /// sort by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch a single tool call and return the resulting tool-result
    /// message. Never panics: unknown tools, schema violations, and
    /// handler errors all become an `is_error` tool-result so the LLM can
    /// recover.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ChatMessage {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            return ChatMessage::tool_result(
                call.call_id.clone(),
                call.tool_name.clone(),
                format!("unknown tool '{}'", call.tool_name),
                true,
            );
        };

        if let Some(validator) = &tool.validator {
            if let Err(first_error) = validator.validate(&call.arguments) {
                let detail = format!("{first_error}");
                tracing::warn!(
                    session_id = %ctx.session_id,
                    tool = %call.tool_name,
                    error = %detail,
                    "tool call rejected: schema validation failed"
                );
                return ChatMessage::tool_result(
                    call.call_id.clone(),
                    call.tool_name.clone(),
                    format!("invalid parameters: {detail}"),
                    true,
                );
            }
        }

        match tool.handler.invoke(call.arguments.clone(), ctx).await {
            Ok(value) => {
                let content = serde_json::to_string(&value).unwrap_or_else(|_| "null".into());
                ChatMessage::tool_result(call.call_id.clone(), call.tool_name.clone(), content, false)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    tool = %call.tool_name,
                    error = %e,
                    "tool handler returned an error"
                );
                ChatMessage::tool_result(
                    call.call_id.clone(),
                    call.tool_name.clone(),
                    e.to_string(),
                    true,
                )
            }
        }
    }
}
