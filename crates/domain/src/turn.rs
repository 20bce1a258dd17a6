use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-turn latency record. Opened at `UserTurnEnded`, populated
/// incrementally as provider events arrive, emitted on turn completion.
///
/// An incomplete record (one that was never finished and emitted) is
/// never persisted — see `finish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub speech_id: String,
    pub user_text: String,
    #[serde(default)]
    pub assistant_text: String,
    pub stt_final_at: DateTime<Utc>,
    #[serde(default)]
    pub llm_first_token_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub llm_done_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tts_first_byte_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tts_done_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_latency_ms: Option<i64>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl TurnRecord {
    pub fn open(speech_id: impl Into<String>, user_text: impl Into<String>, stt_final_at: DateTime<Utc>) -> Self {
        Self {
            speech_id: speech_id.into(),
            user_text: user_text.into(),
            assistant_text: String::new(),
            stt_final_at,
            llm_first_token_at: None,
            llm_done_at: None,
            tts_first_byte_at: None,
            tts_done_at: None,
            total_latency_ms: None,
            interrupted: false,
            error: None,
        }
    }

    pub fn mark_llm_first_token(&mut self, at: DateTime<Utc>) {
        self.llm_first_token_at.get_or_insert(at);
    }

    pub fn mark_llm_done(&mut self, at: DateTime<Utc>) {
        self.llm_done_at = Some(at);
    }

    pub fn mark_tts_first_byte(&mut self, at: DateTime<Utc>) {
        self.tts_first_byte_at.get_or_insert(at);
    }

    pub fn mark_tts_done(&mut self, at: DateTime<Utc>) {
        self.tts_done_at = Some(at);
    }

    /// Close the record for emission: computes `total_latency_ms` from
    /// `ttsFirstByteAt − sttFinalAt` when both are known, and marks it
    /// `interrupted` if the turn was cut short by barge-in.
    pub fn finish(mut self, interrupted: bool) -> Self {
        self.interrupted = interrupted;
        if let Some(tts_first_byte_at) = self.tts_first_byte_at {
            self.total_latency_ms =
                Some((tts_first_byte_at - self.stt_final_at).num_milliseconds());
        }
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// `sttFinalAt ≤ llmFirstTokenAt ≤ ttsFirstByteAt ≤ ttsDoneAt` whenever
    /// all of the relevant fields are set.
    pub fn timings_are_monotonic(&self) -> bool {
        let mut prev = self.stt_final_at;
        for next in [self.llm_first_token_at, self.tts_first_byte_at, self.tts_done_at]
            .into_iter()
            .flatten()
        {
            if next < prev {
                return false;
            }
            prev = next;
        }
        true
    }
}
