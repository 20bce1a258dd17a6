//! Chat Context: the running transcript fed to the LLM each turn.
//!
//! An in-memory, per-session message history built on
//! `va_domain::chat::{ChatMessage, MessageContent}`, with an
//! append/truncate pattern (`truncate_last_assistant` for barge-in) and no
//! disk persistence.

use va_domain::chat::{ChatMessage, ContentPart, MessageContent, Role};

/// Ordered message history for one call session.
///
/// Invariant upheld after every operation: every `Tool`-role message's
/// `tool_call_id` refers to a `ToolUse` part still present on some
/// assistant message, and vice versa — no assistant message carries a
/// `ToolUse` part with no matching tool-result.
#[derive(Debug, Default)]
pub struct ChatContext {
    messages: Vec<ChatMessage>,
}

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// An immutable copy of the current history.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove every message for which `predicate` returns `true`, then
    /// repair the tool-call/tool-result pairing invariant.
    pub fn truncate<F>(&mut self, predicate: F)
    where
        F: Fn(&ChatMessage) -> bool,
    {
        self.messages.retain(|m| !predicate(m));
        self.repair_tool_pairing();
    }

    /// Replace the content of the last assistant message with `spoken`,
    /// the portion of it TTS actually delivered before a barge-in cut it
    /// off. A no-op if the last message isn't an assistant message.
    ///
    /// Only valid while the session is in `Speaking`: the assistant
    /// message being truncated is still text-only at that point (the
    /// `Thinking -> Speaking` transition only fires on a text token, and
    /// tool calls belong to `ToolRunning`), so there are no `ToolUse`
    /// parts to preserve or invalidate.
    pub fn truncate_last_assistant(&mut self, spoken: impl Into<String>) {
        if let Some(last) = self.messages.last_mut() {
            if last.role == Role::Assistant {
                last.content = MessageContent::Text(spoken.into());
            }
        }
    }

    /// The history in provider order, ready to send to the LLM.
    pub fn messages_for_llm(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Drop `ToolUse` parts with no surviving tool-result, and `Tool`
    /// messages whose `tool_call_id` has no surviving `ToolUse` part.
    fn repair_tool_pairing(&mut self) {
        use std::collections::HashSet;

        let tool_result_ids: HashSet<String> = self
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect();

        for message in &mut self.messages {
            if let MessageContent::Parts(parts) = &mut message.content {
                parts.retain(|p| match p {
                    ContentPart::ToolUse { id, .. } => tool_result_ids.contains(id),
                    _ => true,
                });
            }
        }

        let tool_use_ids: HashSet<String> = self
            .messages
            .iter()
            .filter_map(|m| match &m.content {
                MessageContent::Parts(parts) => Some(parts.iter().filter_map(|p| match p {
                    ContentPart::ToolUse { id, .. } => Some(id.clone()),
                    _ => None,
                })),
                MessageContent::Text(_) => None,
            })
            .flatten()
            .collect();

        self.messages.retain(|m| match &m.tool_call_id {
            Some(id) => tool_use_ids.contains(id),
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_domain::chat::ToolCall;

    #[test]
    fn append_and_snapshot_preserve_order() {
        let mut ctx = ChatContext::new();
        ctx.append(ChatMessage::system("be helpful"));
        ctx.append(ChatMessage::user("hi"));
        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].role, Role::System);
        assert_eq!(snap[1].role, Role::User);
    }

    #[test]
    fn truncate_removes_matching_messages() {
        let mut ctx = ChatContext::new();
        ctx.append(ChatMessage::system("sys"));
        ctx.append(ChatMessage::user("hello"));
        ctx.append(ChatMessage::user("world"));
        ctx.truncate(|m| m.content.extract_all_text() == "hello");
        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|m| m.content.extract_all_text() != "hello"));
    }

    #[test]
    fn truncate_last_assistant_replaces_content_while_speaking() {
        let mut ctx = ChatContext::new();
        ctx.append(ChatMessage::user("tell me a story"));
        ctx.append(ChatMessage::assistant("Once upon a time, there was a very long tale"));
        ctx.truncate_last_assistant("Once upon a time,");
        let snap = ctx.snapshot();
        assert_eq!(snap.last().unwrap().content.extract_all_text(), "Once upon a time,");
    }

    #[test]
    fn truncate_last_assistant_is_noop_on_non_assistant_last_message() {
        let mut ctx = ChatContext::new();
        ctx.append(ChatMessage::user("hello"));
        ctx.truncate_last_assistant("ignored");
        assert_eq!(ctx.snapshot()[0].content.extract_all_text(), "hello");
    }

    #[test]
    fn truncate_drops_orphaned_tool_result_when_assistant_message_removed() {
        let mut ctx = ChatContext::new();
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "endCall".into(),
            arguments: serde_json::json!({}),
        };
        let assistant_msg = ChatMessage::assistant_with_tool_calls("", &[call]);
        let assistant_id = assistant_msg.id.clone();
        ctx.append(assistant_msg);
        ctx.append(ChatMessage::tool_result("c1", "endCall", "ok", false));

        ctx.truncate(|m| m.id == assistant_id);

        let snap = ctx.snapshot();
        assert!(snap.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn truncate_strips_tool_use_part_when_tool_result_removed() {
        let mut ctx = ChatContext::new();
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "endCall".into(),
            arguments: serde_json::json!({}),
        };
        ctx.append(ChatMessage::assistant_with_tool_calls("", &[call]));
        let tool_msg = ChatMessage::tool_result("c1", "endCall", "ok", false);
        let tool_msg_id = tool_msg.id.clone();
        ctx.append(tool_msg);

        ctx.truncate(|m| m.id == tool_msg_id);

        let snap = ctx.snapshot();
        let assistant = snap.iter().find(|m| m.role == Role::Assistant).unwrap();
        assert!(assistant.tool_call_ids().is_empty());
    }

    #[test]
    fn messages_for_llm_matches_snapshot_order() {
        let mut ctx = ChatContext::new();
        ctx.append(ChatMessage::system("sys"));
        ctx.append(ChatMessage::user("hi"));
        assert_eq!(ctx.messages_for_llm().len(), 2);
        assert_eq!(ctx.messages_for_llm()[0].role, Role::System);
    }
}
