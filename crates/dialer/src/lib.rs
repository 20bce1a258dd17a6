//! Outbound Dialer.
//!
//! Generalized from the gateway's `ToolRouter` request/response
//! correlation (`crates/gateway::nodes::router`): a `request_id` keyed
//! map of pending `oneshot` senders, one entry per in-flight dial,
//! resolved when the room-server's `SipParticipantResult` arrives over
//! the same control-plane connection that carried the `CreateSipParticipant`
//! request.
//!
//! The dialer never retries. A busy line, no answer, or SIP failure all
//! surface as a typed [`DialError`] and it is up to the caller (the call
//! dispatcher) to decide whether to try again, try a different trunk, or
//! give up.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use va_domain::participant::Participant;
use va_protocol::{SipOutcome, WsMessage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Parameters for one outbound dial attempt.
#[derive(Debug, Clone)]
pub struct DialParams {
    pub trunk_id: String,
    pub callee_e164: String,
    pub room_name: String,
    pub identity: String,
}

/// Why a dial did not end in an answered call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DialError {
    #[error("line busy")]
    Busy,
    #[error("no answer")]
    NoAnswer,
    #[error("call failed: {0}")]
    Failed(String),
    #[error("dial cancelled")]
    Cancelled,
    #[error("dial timed out after {0:?}")]
    TimedOut(Duration),
    #[error("room-server connection unavailable")]
    Disconnected,
}

type DialResultTx = oneshot::Sender<(SipOutcome, Option<String>, Option<String>)>;

/// Correlates outbound `CreateSipParticipant` requests with the
/// room-server's eventual `SipParticipantResult`, over whatever
/// connection `outbound` is wired to (owned and driven by the worker's
/// control-plane client, not by this crate).
pub struct Dialer {
    outbound: mpsc::Sender<WsMessage>,
    pending: Mutex<HashMap<String, DialResultTx>>,
    timeout: Duration,
}

impl Dialer {
    pub fn new(outbound: mpsc::Sender<WsMessage>) -> Self {
        Self::with_timeout(outbound, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(outbound: mpsc::Sender<WsMessage>, timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Place an outbound call and block until it is answered, reaches a
    /// terminal SIP status, times out, or `cancel` fires.
    pub async fn dial(
        &self,
        params: DialParams,
        cancel: &CancellationToken,
    ) -> Result<Participant, DialError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        let msg = WsMessage::CreateSipParticipant {
            request_id: request_id.clone(),
            room_name: params.room_name.clone(),
            trunk_id: params.trunk_id.clone(),
            callee_e164: params.callee_e164.clone(),
            identity: params.identity.clone(),
            wait_until_answered: true,
        };

        if self.outbound.send(msg).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(DialError::Disconnected);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.pending.lock().remove(&request_id);
                Err(DialError::Cancelled)
            }
            outcome = tokio::time::timeout(self.timeout, rx) => {
                match outcome {
                    Ok(Ok((SipOutcome::Answered, participant_identity, _))) => {
                        let identity = participant_identity.unwrap_or(params.identity);
                        Ok(Participant::sip_remote(identity))
                    }
                    Ok(Ok((SipOutcome::Busy, _, _))) => Err(DialError::Busy),
                    Ok(Ok((SipOutcome::NoAnswer, _, _))) => Err(DialError::NoAnswer),
                    Ok(Ok((SipOutcome::Failed, _, detail))) => {
                        Err(DialError::Failed(detail.unwrap_or_else(|| "unspecified".into())))
                    }
                    Ok(Err(_)) => Err(DialError::Disconnected),
                    Err(_elapsed) => {
                        self.pending.lock().remove(&request_id);
                        Err(DialError::TimedOut(self.timeout))
                    }
                }
            }
        }
    }

    /// Resolve a pending dial when its `SipParticipantResult` arrives.
    /// Called by the worker's control-plane reader loop; a miss (unknown
    /// or already-resolved `request_id`) is logged, not an error — the
    /// result may have arrived after the caller gave up and timed out.
    pub fn complete(
        &self,
        request_id: &str,
        outcome: SipOutcome,
        participant_identity: Option<String>,
        status_detail: Option<String>,
    ) {
        match self.pending.lock().remove(request_id) {
            Some(tx) => {
                let _ = tx.send((outcome, participant_identity, status_detail));
            }
            None => {
                tracing::warn!(
                    request_id = %request_id,
                    "sip_participant_result for unknown or already-resolved dial"
                );
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DialParams {
        DialParams {
            trunk_id: "trunk-1".into(),
            callee_e164: "+15551234567".into(),
            room_name: "room-1".into(),
            identity: "sip-out-1".into(),
        }
    }

    #[tokio::test]
    async fn answered_result_resolves_with_participant() {
        let (tx, mut rx) = mpsc::channel(8);
        let dialer = std::sync::Arc::new(Dialer::new(tx));

        let d = dialer.clone();
        let handle = tokio::spawn(async move { d.dial(params(), &CancellationToken::new()).await });

        let sent = rx.recv().await.unwrap();
        let request_id = match sent {
            WsMessage::CreateSipParticipant { request_id, .. } => request_id,
            _ => panic!("expected CreateSipParticipant"),
        };

        dialer.complete(&request_id, SipOutcome::Answered, Some("sip-out-1".into()), None);

        let result = handle.await.unwrap();
        assert_eq!(result.unwrap().identity, "sip-out-1");
    }

    #[tokio::test]
    async fn busy_result_surfaces_busy_error() {
        let (tx, mut rx) = mpsc::channel(8);
        let dialer = std::sync::Arc::new(Dialer::new(tx));

        let d = dialer.clone();
        let handle = tokio::spawn(async move { d.dial(params(), &CancellationToken::new()).await });

        let sent = rx.recv().await.unwrap();
        let request_id = match sent {
            WsMessage::CreateSipParticipant { request_id, .. } => request_id,
            _ => panic!("expected CreateSipParticipant"),
        };
        dialer.complete(&request_id, SipOutcome::Busy, None, None);

        assert_eq!(handle.await.unwrap().unwrap_err(), DialError::Busy);
    }

    #[tokio::test]
    async fn failed_result_carries_status_detail() {
        let (tx, mut rx) = mpsc::channel(8);
        let dialer = std::sync::Arc::new(Dialer::new(tx));

        let d = dialer.clone();
        let handle = tokio::spawn(async move { d.dial(params(), &CancellationToken::new()).await });

        let sent = rx.recv().await.unwrap();
        let request_id = match sent {
            WsMessage::CreateSipParticipant { request_id, .. } => request_id,
            _ => panic!("expected CreateSipParticipant"),
        };
        dialer.complete(
            &request_id,
            SipOutcome::Failed,
            None,
            Some("trunk rejected invite".into()),
        );

        match handle.await.unwrap().unwrap_err() {
            DialError::Failed(detail) => assert_eq!(detail, "trunk rejected invite"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_the_dial_and_clears_pending() {
        let (tx, mut rx) = mpsc::channel(8);
        let dialer = std::sync::Arc::new(Dialer::new(tx));
        let cancel = CancellationToken::new();

        let d = dialer.clone();
        let c = cancel.clone();
        let handle = tokio::spawn(async move { d.dial(params(), &c).await });

        let _sent = rx.recv().await.unwrap();
        assert_eq!(dialer.pending_count(), 1);
        cancel.cancel();

        assert_eq!(handle.await.unwrap().unwrap_err(), DialError::Cancelled);
        assert_eq!(dialer.pending_count(), 0);
    }

    #[tokio::test]
    async fn disconnected_outbound_channel_fails_immediately() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let dialer = Dialer::new(tx);
        let cancel = CancellationToken::new();

        let result = dialer.dial(params(), &cancel).await;
        assert_eq!(result.unwrap_err(), DialError::Disconnected);
    }

    #[tokio::test]
    async fn late_completion_of_unknown_request_is_a_no_op() {
        let (tx, _rx) = mpsc::channel(8);
        let dialer = Dialer::new(tx);
        dialer.complete("no-such-request", SipOutcome::Answered, None, None);
        assert_eq!(dialer.pending_count(), 0);
    }
}
