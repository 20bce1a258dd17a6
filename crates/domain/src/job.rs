use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A telephony job dispatched by the room-server control plane.
///
/// Immutable once received: the worker never mutates a `Job` after
/// dispatch. It is destroyed (dropped) when its session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub room_name: String,
    pub metadata: JobMetadata,
    pub dispatched_at: DateTime<Utc>,
}

/// Parsed form of the job metadata JSON blob bound to the `Job` by the
/// room-server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobMetadata {
    /// E.164 phone number of the callee.
    pub phone_number: String,
    /// E.164 number to transfer to, if the conversation calls for it.
    #[serde(default)]
    pub transfer_to: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    /// Selects a stored `AgentConfig` by id; `None` uses the worker's default.
    #[serde(default)]
    pub agent_config_id: Option<String>,
    /// Opaque fields passed through verbatim to tool handlers.
    #[serde(default)]
    pub custom_fields: HashMap<String, serde_json::Value>,
}

/// Error produced while validating a job's metadata JSON before a session
/// is constructed. The dispatcher reports `fatalError` for these without
/// ever spawning a session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobRejection {
    #[error("job metadata is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("job metadata is missing required field `phone_number`")]
    MissingPhoneNumber,
    #[error("phone_number `{0}` is not a valid E.164 number")]
    InvalidPhoneNumber(String),
}

impl JobMetadata {
    /// Parse and validate a job metadata JSON blob.
    ///
    /// Invalid JSON or a missing/malformed `phone_number` is rejected
    /// before a session is ever constructed.
    pub fn parse(raw: &str) -> Result<Self, JobRejection> {
        let meta: JobMetadata =
            serde_json::from_str(raw).map_err(|e| JobRejection::InvalidJson(e.to_string()))?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn validate(&self) -> Result<(), JobRejection> {
        if self.phone_number.is_empty() {
            return Err(JobRejection::MissingPhoneNumber);
        }
        if !is_e164(&self.phone_number) {
            return Err(JobRejection::InvalidPhoneNumber(self.phone_number.clone()));
        }
        if let Some(transfer_to) = &self.transfer_to {
            if !transfer_to.is_empty() && !is_e164(transfer_to) {
                return Err(JobRejection::InvalidPhoneNumber(transfer_to.clone()));
            }
        }
        Ok(())
    }
}

/// Minimal E.164 validation: a leading `+`, then 8–15 digits.
fn is_e164(s: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"^\+[1-9]\d{7,14}$").unwrap());
    re.is_match(s)
}
