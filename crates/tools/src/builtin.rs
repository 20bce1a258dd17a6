//! Built-in tools required by the voice-agent use case.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use va_domain::chat::ToolDefinition;
use va_domain::config::ToolsConfig;
use va_domain::error::{Error, Result};

use crate::registry::{ToolContext, ToolHandler, ToolRegistry};

/// `transferCall(transferTo)` — instructs the media server to transfer the
/// SIP participant. On failure the error is surfaced as a tool-result so
/// the LLM can apologize and try something else.
pub struct TransferCallHandler;

#[async_trait]
impl ToolHandler for TransferCallHandler {
    async fn invoke(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let transfer_to = params
            .get("transferTo")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Tool {
                name: "transferCall".into(),
                message: "missing required field 'transferTo'".into(),
            })?;

        ctx.control.transfer_call(transfer_to).await?;
        Ok(serde_json::json!({ "transferred_to": transfer_to }))
    }
}

pub fn transfer_call_definition() -> ToolDefinition {
    ToolDefinition {
        name: "transferCall".into(),
        description: "Transfer the current call to a human agent or another number.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "transferTo": {
                    "type": "string",
                    "description": "E.164 phone number to transfer the call to"
                }
            },
            "required": ["transferTo"]
        }),
    }
}

/// `endCall()` — waits for the current TTS utterance to finish, then
/// triggers the `Ending` transition.
pub struct EndCallHandler;

#[async_trait]
impl ToolHandler for EndCallHandler {
    async fn invoke(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        ctx.control.end_call().await;
        Ok(serde_json::json!({ "ended": true }))
    }
}

pub fn end_call_definition() -> ToolDefinition {
    ToolDefinition {
        name: "endCall".into(),
        description: "End the current call gracefully after the current utterance finishes.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {}
        }),
    }
}

/// `detectedAnsweringMachine()` — immediately triggers `Ending`, no
/// further TTS is produced.
pub struct DetectedAnsweringMachineHandler;

#[async_trait]
impl ToolHandler for DetectedAnsweringMachineHandler {
    async fn invoke(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        ctx.control.mark_answering_machine().await;
        Ok(serde_json::json!({ "ended": true }))
    }
}

pub fn detected_answering_machine_definition() -> ToolDefinition {
    ToolDefinition {
        name: "detectedAnsweringMachine".into(),
        description: "Signal that an answering machine picked up; end the call immediately.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {}
        }),
    }
}

/// Build a registry pre-populated with the three required built-in tools.
pub fn registry_with_builtins(config: &ToolsConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new(config);
    registry.register(transfer_call_definition(), Arc::new(TransferCallHandler))?;
    registry.register(end_call_definition(), Arc::new(EndCallHandler))?;
    registry.register(
        detected_answering_machine_definition(),
        Arc::new(DetectedAnsweringMachineHandler),
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    struct RecordingControl {
        transferred_to: std::sync::Mutex<Option<String>>,
        ended: std::sync::atomic::AtomicBool,
        answering_machine: std::sync::atomic::AtomicBool,
    }

    impl RecordingControl {
        fn new() -> Self {
            Self {
                transferred_to: std::sync::Mutex::new(None),
                ended: std::sync::atomic::AtomicBool::new(false),
                answering_machine: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl crate::control::SessionControl for RecordingControl {
        async fn transfer_call(&self, transfer_to: &str) -> Result<()> {
            *self.transferred_to.lock().unwrap() = Some(transfer_to.to_string());
            Ok(())
        }
        async fn end_call(&self) {
            self.ended.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        async fn mark_answering_machine(&self) {
            self.answering_machine
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn ctx_with(control: Arc<RecordingControl>) -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            cancel: CancellationToken::new(),
            control,
        }
    }

    #[tokio::test]
    async fn transfer_call_invokes_session_control() {
        let control = Arc::new(RecordingControl::new());
        let ctx = ctx_with(control.clone());
        let result = TransferCallHandler
            .invoke(serde_json::json!({ "transferTo": "+14155559999" }), &ctx)
            .await
            .unwrap();
        assert_eq!(result["transferred_to"], "+14155559999");
        assert_eq!(
            control.transferred_to.lock().unwrap().as_deref(),
            Some("+14155559999")
        );
    }

    #[tokio::test]
    async fn transfer_call_without_transfer_to_errors() {
        let control = Arc::new(RecordingControl::new());
        let ctx = ctx_with(control);
        let err = TransferCallHandler
            .invoke(serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transferTo"));
    }

    #[tokio::test]
    async fn end_call_triggers_control_end_call() {
        let control = Arc::new(RecordingControl::new());
        let ctx = ctx_with(control.clone());
        EndCallHandler.invoke(serde_json::json!({}), &ctx).await.unwrap();
        assert!(control.ended.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn detected_answering_machine_triggers_control() {
        let control = Arc::new(RecordingControl::new());
        let ctx = ctx_with(control.clone());
        DetectedAnsweringMachineHandler
            .invoke(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(control
            .answering_machine
            .load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn registry_with_builtins_registers_all_three() {
        let registry = registry_with_builtins(&ToolsConfig::default()).unwrap();
        assert!(registry.contains("transferCall"));
        assert!(registry.contains("endCall"));
        assert!(registry.contains("detectedAnsweringMachine"));
        assert_eq!(registry.len(), 3);
    }
}
