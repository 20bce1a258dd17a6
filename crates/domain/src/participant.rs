use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A room participant. The remote SIP participant appears asynchronously
/// once the Outbound Dialer's call is answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
    pub kind: ParticipantKind,
    pub joined_at: DateTime<Utc>,
    /// `Some` once the room server publishes an audio track for this
    /// participant.
    #[serde(default)]
    pub audio_track: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Local,
    SipRemote,
}

impl Participant {
    pub fn sip_remote(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            kind: ParticipantKind::SipRemote,
            joined_at: Utc::now(),
            audio_track: None,
        }
    }

    pub fn local(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            kind: ParticipantKind::Local,
            joined_at: Utc::now(),
            audio_track: None,
        }
    }
}
