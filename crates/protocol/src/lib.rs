//! Room-server control-plane protocol: WebSocket message envelope between
//! a worker process and the room-server.
//!
//! A worker connects, registers its identity and capabilities, then
//! receives job assignments and reports job status over the same
//! connection; outbound-dial and transfer requests are correlated by
//! `request_id` the same way a node/gateway pairs `tool_request` with
//! `tool_response`.

use serde::{Deserialize, Serialize};
use va_domain::job::Job;

/// WebSocket message envelope exchanged between a worker and the
/// room-server control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Worker → room-server: initial handshake.
    #[serde(rename = "register_worker")]
    RegisterWorker {
        worker_id: String,
        capabilities: Vec<WorkerCapability>,
        version: String,
    },

    /// Room-server → worker: handshake accepted.
    #[serde(rename = "welcome")]
    Welcome {
        session_id: String,
        server_version: String,
    },

    /// Room-server → worker: a call has been dispatched to this worker.
    #[serde(rename = "job_assignment")]
    JobAssignment { job: Job },

    /// Worker → room-server: lifecycle update for a job.
    #[serde(rename = "job_status")]
    JobStatus {
        job_id: String,
        state: JobState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Worker → room-server: request an outbound SIP participant.
    #[serde(rename = "create_sip_participant")]
    CreateSipParticipant {
        request_id: String,
        room_name: String,
        trunk_id: String,
        callee_e164: String,
        identity: String,
        wait_until_answered: bool,
    },

    /// Room-server → worker: result of a `CreateSipParticipant` request.
    #[serde(rename = "sip_participant_result")]
    SipParticipantResult {
        request_id: String,
        outcome: SipOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        participant_identity: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_detail: Option<String>,
    },

    /// Worker → room-server: transfer an already-connected SIP participant.
    #[serde(rename = "transfer_sip_participant")]
    TransferSipParticipant {
        request_id: String,
        room_name: String,
        identity: String,
        transfer_to: String,
    },

    /// Room-server → worker: result of a transfer request.
    #[serde(rename = "transfer_result")]
    TransferResult {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Worker → room-server: tear down the room once the session ends.
    #[serde(rename = "delete_room")]
    DeleteRoom { room_name: String },

    /// Bidirectional: heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Bidirectional: heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

/// A capability advertised by a worker at registration time (e.g. which
/// agent configs or trunks it can serve).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCapability {
    pub name: String,
    pub description: String,
}

/// Lifecycle states reported via `JobStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Accepted,
    InProgress,
    Normal,
    ParticipantLeft,
    Timeout,
    FatalError,
}

/// Terminal outcome of an outbound dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SipOutcome {
    Answered,
    Busy,
    NoAnswer,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_worker_round_trips() {
        let msg = WsMessage::RegisterWorker {
            worker_id: "worker-1".into(),
            capabilities: vec![WorkerCapability {
                name: "dental-reminder".into(),
                description: "dental appointment confirmation agent".into(),
            }],
            version: "0.1.0".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"register_worker\""));
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        match back {
            WsMessage::RegisterWorker { worker_id, .. } => assert_eq!(worker_id, "worker-1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn job_status_omits_reason_when_none() {
        let msg = WsMessage::JobStatus {
            job_id: "j1".into(),
            state: JobState::Normal,
            reason: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("reason"));
    }

    #[test]
    fn sip_participant_result_round_trips() {
        let msg = WsMessage::SipParticipantResult {
            request_id: "r1".into(),
            outcome: SipOutcome::Answered,
            participant_identity: Some("sip-remote-1".into()),
            status_detail: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        match back {
            WsMessage::SipParticipantResult { outcome, .. } => {
                assert_eq!(outcome, SipOutcome::Answered)
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ping_pong_round_trip() {
        let msg = WsMessage::Ping { timestamp: 42 };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, WsMessage::Ping { timestamp: 42 }));
    }
}
