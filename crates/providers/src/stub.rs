//! An in-memory [`LlmProvider`] that replays a scripted response.
//!
//! Used by `va-session`'s tests and the worker's `doctor` command to
//! exercise the tool loop and streaming state transitions without a
//! live provider credential.

use async_trait::async_trait;

use va_domain::capability::{LlmCapabilities, ToolSupport};
use va_domain::chat::ToolCall;
use va_domain::error::Result;
use va_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

/// One scripted step of a [`StubLlmProvider`] response.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Token(String),
    ToolCall(ToolCall),
}

/// Replays a fixed sequence of tokens and/or tool calls regardless of the
/// request it receives.
pub struct StubLlmProvider {
    script: Vec<ScriptedStep>,
    capabilities: LlmCapabilities,
}

impl StubLlmProvider {
    pub fn text(reply: impl Into<String>) -> Self {
        Self::new(vec![ScriptedStep::Token(reply.into())])
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self::new(vec![ScriptedStep::ToolCall(call)])
    }

    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script,
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::Basic,
                supports_streaming: true,
                ..LlmCapabilities::default()
            },
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlmProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for step in &self.script {
            match step {
                ScriptedStep::Token(t) => content.push_str(t),
                ScriptedStep::ToolCall(c) => tool_calls.push(c.clone()),
            }
        }
        Ok(ChatResponse {
            content,
            tool_calls,
            usage: None,
            model: "stub".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let script = self.script.clone();
        let stream = async_stream::stream! {
            for step in script {
                let event = match step {
                    ScriptedStep::Token(text) => StreamEvent::Token { text },
                    ScriptedStep::ToolCall(call) => StreamEvent::ToolCallFinished {
                        call_id: call.call_id,
                        tool_name: call.tool_name,
                        arguments: call.arguments,
                    },
                };
                yield Ok(event);
            }
            yield Ok(StreamEvent::Done {
                usage: Some(Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 }),
                finish_reason: Some("stop".into()),
            });
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Ok(EmbeddingsResponse { embeddings: vec![] })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_script_streams_token_then_done() {
        use futures_util::StreamExt;

        let provider = StubLlmProvider::text("hello there");
        let mut stream = provider.chat_stream(ChatRequest::default()).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::Token { text } if text == "hello there"));
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, StreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn tool_call_script_streams_tool_call_finished() {
        use futures_util::StreamExt;

        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "endCall".into(),
            arguments: serde_json::json!({}),
        };
        let provider = StubLlmProvider::tool_call(call);
        let mut stream = provider.chat_stream(ChatRequest::default()).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        match first {
            StreamEvent::ToolCallFinished { tool_name, .. } => assert_eq!(tool_name, "endCall"),
            other => panic!("expected ToolCallFinished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_concatenates_scripted_tokens() {
        let provider = StubLlmProvider::new(vec![
            ScriptedStep::Token("hel".into()),
            ScriptedStep::Token("lo".into()),
        ]);
        let resp = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content, "hello");
    }
}
