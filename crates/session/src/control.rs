//! Tool-originated control signals and the `SessionControl` bridge
//! (the built-in tools act through here).

use std::sync::Arc;

use tokio::sync::mpsc;

use va_domain::error::Result;
use va_tools::control::SessionControl;

/// Fire-and-forget signals a tool handler raises. Delivered over a
/// bounded channel the session's own event loop drains — `end_call` and
/// `mark_answering_machine` never block on the loop noticing, they just
/// need a free buffer slot.
pub(crate) enum ControlSignal {
    EndCall,
    MarkAnsweringMachine,
    /// A `transferCall` tool invocation completed successfully. Mirrors
    /// `EndCall`: teardown waits for the in-flight reply to finish
    /// speaking rather than cutting the handoff short.
    Transferred,
}

/// Carries out an outbound SIP transfer over the worker's control-plane
/// connection.
///
/// Symmetric to [`va_dialer::Dialer`]'s request/response correlation: a
/// transfer is a round trip to the room-server, not session-local state,
/// so it's handled independently of the session's own event loop rather
/// than by looping a signal back through `ControlSignal` — doing the
/// latter would deadlock the one task that both issues the tool call and
/// would need to answer it.
#[async_trait::async_trait]
pub trait TransferHandler: Send + Sync {
    async fn transfer(&self, transfer_to: &str) -> Result<()>;
}

/// Handed to every tool invocation as `Arc<dyn SessionControl>`.
pub struct SessionHandle {
    pub(crate) control_tx: mpsc::Sender<ControlSignal>,
    pub(crate) transfer: Arc<dyn TransferHandler>,
}

#[async_trait::async_trait]
impl SessionControl for SessionHandle {
    async fn transfer_call(&self, transfer_to: &str) -> Result<()> {
        self.transfer.transfer(transfer_to).await?;
        let _ = self.control_tx.send(ControlSignal::Transferred).await;
        Ok(())
    }

    async fn end_call(&self) {
        let _ = self.control_tx.send(ControlSignal::EndCall).await;
    }

    async fn mark_answering_machine(&self) {
        let _ = self.control_tx.send(ControlSignal::MarkAnsweringMachine).await;
    }
}

#[cfg(test)]
pub(crate) struct AlwaysOkTransferHandler;

#[cfg(test)]
#[async_trait::async_trait]
impl TransferHandler for AlwaysOkTransferHandler {
    async fn transfer(&self, _transfer_to: &str) -> Result<()> {
        Ok(())
    }
}
