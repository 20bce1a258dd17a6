//! Outbound SIP transfer over the worker's control-plane connection
//! (the `transferCall` tool acts through here).
//!
//! Request/response correlation mirrors [`va_dialer::Dialer`]: a pending
//! `oneshot` per in-flight `request_id`, resolved when the room-server's
//! `TransferResult` arrives over the same connection that carried the
//! `TransferSipParticipant` request.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use va_domain::error::{Error, Result};
use va_protocol::WsMessage;
use va_session::TransferHandler;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type TransferResultTx = oneshot::Sender<(bool, Option<String>)>;

/// One instance per active job — `room_name`/`identity` identify which SIP
/// participant to move, so unlike the dialer (which issues one call per
/// request) this handler is scoped to a single call for its whole lifetime.
pub struct ControlPlaneTransferHandler {
    outbound: mpsc::Sender<WsMessage>,
    pending: Mutex<HashMap<String, TransferResultTx>>,
    room_name: String,
    identity: String,
    timeout: Duration,
}

impl ControlPlaneTransferHandler {
    pub fn new(outbound: mpsc::Sender<WsMessage>, room_name: String, identity: String) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            room_name,
            identity,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolve a pending transfer when its `TransferResult` arrives. A miss
    /// is logged, not an error — the result may arrive after the caller
    /// already timed out.
    pub fn complete(&self, request_id: &str, success: bool, error: Option<String>) {
        match self.pending.lock().remove(request_id) {
            Some(tx) => {
                let _ = tx.send((success, error));
            }
            None => {
                tracing::warn!(
                    request_id = %request_id,
                    "transfer_result for unknown or already-resolved transfer"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl TransferHandler for ControlPlaneTransferHandler {
    async fn transfer(&self, transfer_to: &str) -> Result<()> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        let msg = WsMessage::TransferSipParticipant {
            request_id: request_id.clone(),
            room_name: self.room_name.clone(),
            identity: self.identity.clone(),
            transfer_to: transfer_to.to_string(),
        };

        if self.outbound.send(msg).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(Error::Sip("room-server connection unavailable".into()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok((true, _))) => Ok(()),
            Ok(Ok((false, error))) => {
                Err(Error::Sip(error.unwrap_or_else(|| "transfer failed".into())))
            }
            Ok(Err(_)) => Err(Error::Sip("room-server connection unavailable".into())),
            Err(_elapsed) => {
                self.pending.lock().remove(&request_id);
                Err(Error::Timeout(format!("transfer to {transfer_to} timed out")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> (ControlPlaneTransferHandler, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            ControlPlaneTransferHandler::new(tx, "room-1".into(), "sip-out-1".into()),
            rx,
        )
    }

    #[tokio::test]
    async fn successful_transfer_resolves_ok() {
        let (handler, mut rx) = handler();
        let handler = std::sync::Arc::new(handler);
        let h = handler.clone();
        let task = tokio::spawn(async move { h.transfer("+14155559999").await });

        let sent = rx.recv().await.unwrap();
        let request_id = match sent {
            WsMessage::TransferSipParticipant { request_id, transfer_to, .. } => {
                assert_eq!(transfer_to, "+14155559999");
                request_id
            }
            _ => panic!("expected TransferSipParticipant"),
        };
        handler.complete(&request_id, true, None);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_transfer_surfaces_sip_error() {
        let (handler, mut rx) = handler();
        let handler = std::sync::Arc::new(handler);
        let h = handler.clone();
        let task = tokio::spawn(async move { h.transfer("+14155559999").await });

        let sent = rx.recv().await.unwrap();
        let request_id = match sent {
            WsMessage::TransferSipParticipant { request_id, .. } => request_id,
            _ => panic!("expected TransferSipParticipant"),
        };
        handler.complete(&request_id, false, Some("line unreachable".into()));

        let err = task.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("line unreachable"));
    }

    #[tokio::test]
    async fn disconnected_outbound_channel_fails_immediately() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let handler = ControlPlaneTransferHandler::new(tx, "room-1".into(), "sip-out-1".into());
        let err = handler.transfer("+14155559999").await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn late_completion_of_unknown_request_is_a_no_op() {
        let (handler, _rx) = handler();
        handler.complete("no-such-request", true, None);
    }
}
