use serde::Serialize;

/// Structured trace events emitted across all voice-agent-runtime crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    JobReceived {
        job_id: String,
        room_name: String,
    },
    JobRejected {
        room_name: String,
        reason: String,
    },
    SessionStarted {
        session_id: String,
        job_id: String,
    },
    SessionEnded {
        session_id: String,
        reason: String,
        duration_ms: u64,
        turn_count: u32,
    },
    StateTransition {
        session_id: String,
        from: String,
        to: String,
    },
    TurnCompleted {
        session_id: String,
        speech_id: String,
        total_latency_ms: Option<u64>,
        interrupted: bool,
        error: Option<String>,
    },
    BargeIn {
        session_id: String,
        detected_at_ms: u64,
        cancelled_within_ms: u64,
    },
    ToolDispatched {
        session_id: String,
        tool_name: String,
        call_id: String,
        duration_ms: u64,
        is_error: bool,
    },
    VoiceAdaptationDecision {
        session_id: String,
        sentiment: String,
        speed: f64,
        stage: String,
    },
    ProviderError {
        session_id: String,
        component: String,
        provider: String,
        message: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    DispatcherReconnect {
        attempt: u32,
        delay_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "va_event");
    }
}
