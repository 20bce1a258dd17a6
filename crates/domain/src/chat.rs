use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic). Every LLM adapter
/// converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A single message in the conversation. Insertion order in a chat
/// context is significant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    /// Set when `role == Tool`: the call id this message answers.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Set when `role == Tool`: the tool name (for display/metrics).
    #[serde(default)]
    pub tool_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    /// An assistant message carrying tool calls (text may be empty when the
    /// model produced only tool calls).
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: &[ToolCall]) -> Self {
        let mut parts = Vec::new();
        let text = text.into();
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.clone() });
        }
        for call in calls {
            parts.push(ContentPart::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
            tool_call_id: None,
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let tool_call_id = tool_call_id.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_call_id.clone(),
                content: content.into(),
                is_error,
            }]),
            tool_call_id: Some(tool_call_id),
            tool_name: Some(tool_name.into()),
            timestamp: Utc::now(),
        }
    }

    /// The ids of the tool calls this assistant message carries, if any.
    pub fn tool_call_ids(&self) -> Vec<String> {
        match &self.content {
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, .. } => Some(id.clone()),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text`, returns the string directly. For `Parts`, joins all
    /// `Text` parts with `"\n"`; non-text parts are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "line one".into() },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text { text: "line two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let msg = ChatMessage::tool_result("c1", "transferCall", "ok", false);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(msg.tool_name.as_deref(), Some("transferCall"));
    }

    #[test]
    fn assistant_with_tool_calls_exposes_call_ids() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "endCall".into(),
            arguments: serde_json::json!({}),
        }];
        let msg = ChatMessage::assistant_with_tool_calls("", &calls);
        assert_eq!(msg.tool_call_ids(), vec!["c1".to_string()]);
    }
}
