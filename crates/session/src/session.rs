//! The per-call Session State Machine.
//!
//! A session cycles through `listen()` (wait for and transcribe a user
//! turn), `think()` (run the LLM, including any tool-call loop), and
//! `speak()` (synthesize and play the reply), in that order. The ordering
//! is not incidental: exactly one of {LLM inference, TTS synthesis} is
//! ever active at a time, so `think()` fully drains the model's reply —
//! tool calls and all — before `speak()` opens a TTS stream on the final
//! text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use va_audio::{SttProvider, TtsProvider, VadProvider};
use va_context::ChatContext;
use va_domain::agent_config::AgentConfig;
use va_domain::chat::{ChatMessage, ToolCall};
use va_domain::config::{SessionConfig, VoiceAdaptationConfig};
use va_domain::error::Result;
use va_domain::session_state::SessionState;
use va_domain::stream::StreamEvent;
use va_domain::trace::TraceEvent;
use va_domain::turn::TurnRecord;
use va_metrics::MetricsSink;
use va_providers::traits::{ChatRequest, LlmProvider};
use va_tools::control::SessionControl;
use va_tools::registry::{ToolContext, ToolRegistry};
use va_turndetect::{TurnDetector, TurnEvent};
use va_voiceadapt::VoiceAdaptationEngine;

use crate::control::{ControlSignal, SessionHandle, TransferHandler};
use crate::feed::run_turn_feed;

/// Bound on LLM <-> tool-dispatch round trips within a single turn, to
/// guarantee a turn always eventually reaches `speak()` or an error.
const MAX_TOOL_LOOPS: usize = 25;

/// An estimate of how many characters a TTS voice speaks per second at
/// `speed == 1.0`. Used only to approximate how much of a reply was
/// audible before a barge-in cut it off — there's no frame-to-text
/// alignment coming back from the provider to measure this exactly.
const BASE_CHARS_PER_SEC: f64 = 15.0;

/// Said in place of the reply when an LLM or TTS provider keeps failing
/// after one retry within the turn.
const CANNED_PROVIDER_TROUBLE: &str = "I'm having trouble hearing you; could you repeat that?";

/// Said in place of the reply when the model finishes with no tool calls
/// and no text at all.
const CANNED_EMPTY_REPLY: &str = "Sorry, could you say that one more time?";

/// Why a session stopped running.
#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    /// The `endCall` tool was invoked and the reply TTS finished.
    Normal,
    /// The `detectedAnsweringMachine` tool was invoked; teardown is
    /// immediate, no further TTS is produced.
    AnsweringMachine,
    /// The `transferCall` tool succeeded.
    Transferred,
    /// `SessionConfig::call_timeout_ms` elapsed.
    CallTimeout,
    /// The session's `CancellationToken` fired (worker shutdown, job
    /// cancellation from the control plane).
    Cancelled,
    Error(String),
}

/// Everything a [`Session`] needs from outside itself.
pub struct SessionDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub stt: Arc<dyn SttProvider>,
    pub tts: Arc<dyn TtsProvider>,
    pub vad: Arc<dyn VadProvider>,
    pub metrics: Arc<MetricsSink>,
    pub transfer: Arc<dyn TransferHandler>,
    /// Inbound call audio, forked to both the STT and VAD streams. `None`
    /// once consumed by [`Session::run`].
    pub audio_in: Option<mpsc::Receiver<Vec<u8>>>,
    /// Outbound TTS audio, bound for the room's media track.
    pub audio_out: mpsc::Sender<Vec<u8>>,
}

struct ThinkReply {
    text: String,
    params: va_audio::TtsParams,
    record: TurnRecord,
}

enum ListenOutcome {
    Turn(String),
    End(EndReason),
}

enum ThinkOutcome {
    Reply(ThinkReply),
    End(EndReason),
}

enum SpeakOutcome {
    Completed,
    Interrupted,
}

/// Result of a single (non-retried) attempt to run the LLM to completion.
enum LlmAttempt {
    Reply { content: String, tool_calls: Vec<ToolCall> },
    Cancelled,
    Timeout,
    ProviderError(String),
}

/// Result of a single (non-retried) attempt to open a TTS stream and pull
/// its first frame, bounded by `agent.tts.timeout_ms`.
enum TtsOpenOutcome {
    Ready {
        stream: va_audio::TtsStream,
        first_frame: Option<Result<Vec<u8>>>,
    },
    Timeout,
    ProviderError(String),
}

/// One call's Session State Machine.
pub struct Session {
    id: String,
    state: SessionState,
    agent: AgentConfig,
    session_config: SessionConfig,
    deps: SessionDeps,
    tools: ToolRegistry,
    context: ChatContext,
    voice_adapt: VoiceAdaptationEngine,
    cancel: CancellationToken,
    control_tx: mpsc::Sender<ControlSignal>,
    control_rx: mpsc::Receiver<ControlSignal>,
    /// Set when the `endCall` tool fires mid-turn: teardown waits for the
    /// in-flight reply to finish speaking rather than cutting it off.
    pending_end: Option<EndReason>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        agent: AgentConfig,
        session_config: SessionConfig,
        deps: SessionDeps,
        tools: ToolRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let va_config = agent.voice_adaptation.clone().unwrap_or(VoiceAdaptationConfig {
            enabled: false,
            ..VoiceAdaptationConfig::default()
        });

        let mut context = ChatContext::new();
        context.append(ChatMessage::system(agent.instructions.clone()));

        let (control_tx, control_rx) = mpsc::channel(8);

        Self {
            id: id.into(),
            state: SessionState::Idle,
            agent,
            session_config,
            deps,
            tools,
            context,
            voice_adapt: VoiceAdaptationEngine::new(va_config),
            cancel,
            control_tx,
            control_rx,
            pending_end: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The handle tool handlers use to reach this session's side effects.
    pub fn control_handle(&self) -> Arc<dyn SessionControl> {
        Arc::new(SessionHandle {
            control_tx: self.control_tx.clone(),
            transfer: self.deps.transfer.clone(),
        })
    }

    fn transition(&mut self, to: SessionState) {
        if !self.state.can_transition_to(to) {
            tracing::warn!(
                session_id = %self.id,
                from = ?self.state,
                to = ?to,
                "illegal session state transition attempted, ignoring"
            );
            return;
        }
        TraceEvent::StateTransition {
            session_id: self.id.clone(),
            from: format!("{:?}", self.state),
            to: format!("{:?}", to),
        }
        .emit();
        self.state = to;
    }

    /// Drive the call to completion. Consumes `self`: a `Session` is
    /// single-use, one per call.
    pub async fn run(mut self) -> (EndReason, Vec<TurnRecord>) {
        TraceEvent::SessionStarted {
            session_id: self.id.clone(),
            job_id: self.id.clone(),
        }
        .emit();
        let started = Instant::now();
        let mut turns = Vec::new();

        let reason = self.run_inner(&mut turns).await;

        self.transition(SessionState::Ending);
        self.transition(SessionState::Terminated);

        TraceEvent::SessionEnded {
            session_id: self.id.clone(),
            reason: format!("{reason:?}"),
            duration_ms: started.elapsed().as_millis() as u64,
            turn_count: turns.len() as u32,
        }
        .emit();

        (reason, turns)
    }

    async fn run_inner(&mut self, turns: &mut Vec<TurnRecord>) -> EndReason {
        let stt_stream = match self.deps.stt.open(&self.agent.stt).await {
            Ok(s) => s,
            Err(e) => return EndReason::Error(e.to_string()),
        };
        let vad_stream = match self.deps.vad.open(&self.agent.vad).await {
            Ok(s) => s,
            Err(e) => return EndReason::Error(e.to_string()),
        };

        let stt_frames = stt_stream.frames;
        let vad_frames = vad_stream.frames;

        if let Some(mut audio_in) = self.deps.audio_in.take() {
            let stt_frames_fwd = stt_frames.clone();
            let vad_frames_fwd = vad_frames.clone();
            let fwd_cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        biased;
                        _ = fwd_cancel.cancelled() => break,
                        frame = audio_in.recv() => frame,
                    };
                    let Some(frame) = frame else { break };
                    // Backpressure policy: drop rather than
                    // block on a full channel; input audio is live, a
                    // stale frame is worse than a dropped one.
                    let _ = stt_frames_fwd.try_send(frame.clone());
                    let _ = vad_frames_fwd.try_send(frame);
                }
            });
        }

        let detector = TurnDetector::new(&self.agent.stt, &self.session_config);
        let (turn_tx, mut turn_rx) = mpsc::channel(64);
        let (agent_speaking_tx, agent_speaking_rx) = mpsc::channel(4);
        let session_start = Instant::now();
        let feed_cancel = self.cancel.child_token();

        let feed_task = tokio::spawn(run_turn_feed(
            vad_stream.events,
            stt_stream.events,
            detector,
            turn_tx,
            session_start,
            agent_speaking_rx,
            feed_cancel.clone(),
        ));

        self.transition(SessionState::Listening);

        let deadline = self
            .session_config
            .call_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let audio_out = self.deps.audio_out.clone();
        let mut already_speaking = false;

        let reason = loop {
            if self.cancel.is_cancelled() {
                break EndReason::Cancelled;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break EndReason::CallTimeout;
            }

            let utterance = match self.listen(&mut turn_rx, already_speaking).await {
                ListenOutcome::Turn(text) => text,
                ListenOutcome::End(reason) => break reason,
            };
            already_speaking = false;

            let reply = match self.think(&utterance).await {
                ThinkOutcome::Reply(reply) => reply,
                ThinkOutcome::End(reason) => break reason,
            };

            let (outcome, record) = self
                .speak(reply, &mut turn_rx, &agent_speaking_tx, &audio_out)
                .await;

            // Emitted here, on every Speaking -> Listening transition
            // (normal or interrupted), so live subscribers see a turn as
            // soon as it closes rather than waiting for the whole call.
            self.deps.metrics.emit(record.clone());
            TraceEvent::TurnCompleted {
                session_id: self.id.clone(),
                speech_id: record.speech_id.clone(),
                total_latency_ms: record.total_latency_ms.map(|ms| ms.max(0) as u64),
                interrupted: record.interrupted,
                error: record.error.clone(),
            }
            .emit();
            turns.push(record);

            match outcome {
                SpeakOutcome::Interrupted => already_speaking = true,
                SpeakOutcome::Completed => {}
            }

            if let Some(reason) = self.pending_end.take() {
                break reason;
            }
        };

        feed_cancel.cancel();
        drop(stt_frames);
        drop(vad_frames);
        let _ = feed_task.await;

        reason
    }

    /// Wait for a user turn boundary. When `already_speaking` is `true`
    /// the caller already knows the user is mid-utterance (a barge-in cut
    /// the previous `speak()` short) so the initial `UserTurnStarted` wait
    /// is skipped — that event was already consumed as a barge-in signal.
    async fn listen(
        &mut self,
        turn_rx: &mut mpsc::Receiver<TurnEvent>,
        already_speaking: bool,
    ) -> ListenOutcome {
        if !already_speaking {
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return ListenOutcome::End(EndReason::Cancelled),
                    event = turn_rx.recv() => match event {
                        None => return ListenOutcome::End(EndReason::Error("turn feed closed".into())),
                        Some(TurnEvent::UserTurnStarted) => break,
                        Some(_) => continue,
                    },
                }
            }
        }

        self.transition(SessionState::UserSpeaking);

        let mut last_partial = String::new();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ListenOutcome::End(EndReason::Cancelled),
                event = turn_rx.recv() => match event {
                    None => return ListenOutcome::End(EndReason::Error("turn feed closed".into())),
                    Some(TurnEvent::PartialTranscript { text }) => {
                        last_partial = text;
                    }
                    Some(TurnEvent::UserTurnEnded { text, .. }) => {
                        let text = if text.is_empty() { last_partial } else { text };
                        return ListenOutcome::Turn(text);
                    }
                    Some(_) => {}
                },
            }
        }
    }

    async fn think(&mut self, utterance: &str) -> ThinkOutcome {
        let stt_final_at = Utc::now();
        let mut record = TurnRecord::open(Uuid::new_v4().to_string(), utterance, stt_final_at);

        let params = match self.voice_adapt.evaluate(utterance, Instant::now()) {
            Some(decision) => {
                TraceEvent::VoiceAdaptationDecision {
                    session_id: self.id.clone(),
                    sentiment: format!("{:?}", va_voiceadapt::classify_sentiment(utterance)),
                    speed: decision.params.speed,
                    stage: format!("{:?}", decision.stage),
                }
                .emit();
                decision.params
            }
            None => self.voice_adapt.current_params(),
        };

        self.context.append(ChatMessage::user(utterance));
        self.transition(SessionState::Thinking);

        let mut content = String::new();

        for _ in 0..MAX_TOOL_LOOPS {
            let req = ChatRequest {
                messages: self.context.snapshot(),
                tools: self.tools.definitions(),
                temperature: Some(self.agent.llm.temperature),
                max_tokens: None,
                json_mode: false,
                model: None,
            };

            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut retried = false;
            loop {
                match self.call_llm(req.clone(), &mut record).await {
                    LlmAttempt::Reply { content: c, tool_calls: tc } => {
                        content = c;
                        tool_calls = tc;
                        break;
                    }
                    LlmAttempt::Cancelled => return ThinkOutcome::End(EndReason::Cancelled),
                    LlmAttempt::Timeout => {
                        tracing::warn!(session_id = %self.id, "llm call timed out");
                        record = record.with_error("llm_timeout");
                        return ThinkOutcome::Reply(self.apology_reply(params, record));
                    }
                    LlmAttempt::ProviderError(e) => {
                        TraceEvent::ProviderError {
                            session_id: self.id.clone(),
                            component: "llm".into(),
                            provider: self.deps.llm.provider_id().to_string(),
                            message: e.clone(),
                        }
                        .emit();
                        if !retried {
                            retried = true;
                            continue;
                        }
                        record = record.with_error(e);
                        return ThinkOutcome::Reply(self.apology_reply(params, record));
                    }
                }
            }
            record.mark_llm_done(Utc::now());

            if tool_calls.is_empty() {
                let spoken = if content.trim().is_empty() {
                    CANNED_EMPTY_REPLY.to_string()
                } else {
                    content.clone()
                };
                record.assistant_text = spoken.clone();
                self.context.append(ChatMessage::assistant(content.clone()));
                return ThinkOutcome::Reply(ThinkReply { text: spoken, params, record });
            }

            self.context
                .append(ChatMessage::assistant_with_tool_calls(content.clone(), &tool_calls));
            self.transition(SessionState::ToolRunning);

            let ctx = ToolContext {
                session_id: self.id.clone(),
                cancel: self.cancel.clone(),
                control: self.control_handle(),
            };

            for call in &tool_calls {
                let started = Instant::now();
                let result = self.tools.dispatch(call, &ctx).await;
                let is_error = matches!(
                    &result.content,
                    va_domain::chat::MessageContent::Parts(parts)
                        if parts.iter().any(|p| matches!(p, va_domain::chat::ContentPart::ToolResult { is_error: true, .. }))
                );
                TraceEvent::ToolDispatched {
                    session_id: self.id.clone(),
                    tool_name: call.tool_name.clone(),
                    call_id: call.call_id.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    is_error,
                }
                .emit();
                self.context.append(result);

                while let Ok(signal) = self.control_rx.try_recv() {
                    match signal {
                        ControlSignal::EndCall => self.pending_end = Some(EndReason::Normal),
                        ControlSignal::MarkAnsweringMachine => {
                            return ThinkOutcome::End(EndReason::AnsweringMachine);
                        }
                        ControlSignal::Transferred => {
                            self.pending_end = Some(EndReason::Transferred);
                        }
                    }
                }
            }

            self.transition(SessionState::Thinking);
        }

        tracing::warn!(session_id = %self.id, "tool loop exceeded max iterations, replying with partial content");
        record.assistant_text = content.clone();
        self.context.append(ChatMessage::assistant(content.clone()));
        ThinkOutcome::Reply(ThinkReply { text: content, params, record })
    }

    /// Run one LLM request to completion (or failure), bounded by
    /// `agent.llm.timeout_ms`. Does not retry — callers decide whether to
    /// try again, since only they know how many attempts this turn has
    /// already spent.
    async fn call_llm(&mut self, req: ChatRequest, record: &mut TurnRecord) -> LlmAttempt {
        let timeout = Duration::from_millis(self.agent.llm.timeout_ms);
        let cancel = self.cancel.clone();
        let llm = self.deps.llm.clone();

        let attempt = async move {
            let mut stream = match llm.chat_stream(req).await {
                Ok(s) => s,
                Err(e) => return LlmAttempt::ProviderError(e.to_string()),
            };

            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut first_token_seen = false;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return LlmAttempt::Cancelled,
                    item = stream.next() => item,
                };
                match next {
                    None => break,
                    Some(Err(e)) => return LlmAttempt::ProviderError(e.to_string()),
                    Some(Ok(StreamEvent::Token { text })) => {
                        if !first_token_seen {
                            record.mark_llm_first_token(Utc::now());
                            first_token_seen = true;
                        }
                        content.push_str(&text);
                    }
                    Some(Ok(StreamEvent::ToolCallStarted { .. })) => {}
                    Some(Ok(StreamEvent::ToolCallDelta { .. })) => {}
                    Some(Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments })) => {
                        tool_calls.push(ToolCall { call_id, tool_name, arguments });
                    }
                    Some(Ok(StreamEvent::Done { .. })) => break,
                    Some(Ok(StreamEvent::Error { message })) => return LlmAttempt::ProviderError(message),
                }
            }

            LlmAttempt::Reply { content, tool_calls }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => LlmAttempt::Timeout,
        }
    }

    /// Build the canned-apology reply used when the LLM keeps failing or
    /// times out. Reuses the normal `speak()` path so the apology gets
    /// the same barge-in handling and metrics emission as any other turn.
    fn apology_reply(&self, params: va_audio::TtsParams, mut record: TurnRecord) -> ThinkReply {
        record.assistant_text = CANNED_PROVIDER_TROUBLE.to_string();
        ThinkReply { text: CANNED_PROVIDER_TROUBLE.to_string(), params, record }
    }

    /// Open a TTS stream for `text` and pull its first frame, bounded by
    /// `agent.tts.timeout_ms`. Does not retry, for the same reason
    /// `call_llm` doesn't: only the caller knows how many attempts this
    /// turn has already spent.
    async fn open_tts(&self, text: String, params: &va_audio::TtsParams) -> TtsOpenOutcome {
        let timeout = Duration::from_millis(self.agent.tts.timeout_ms);
        let tts = self.deps.tts.clone();
        let params = params.clone();
        let config = self.agent.tts.clone();

        let attempt = async move {
            let text_stream: va_domain::stream::BoxStream<'static, String> =
                Box::pin(futures_util::stream::once(async move { text }));
            let mut stream = match tts.synthesize(text_stream, &params, &config).await {
                Ok(s) => s,
                Err(e) => return TtsOpenOutcome::ProviderError(e.to_string()),
            };
            let first_frame = stream.frames.next().await;
            TtsOpenOutcome::Ready { stream, first_frame }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => TtsOpenOutcome::Timeout,
        }
    }

    async fn speak(
        &mut self,
        reply: ThinkReply,
        turn_rx: &mut mpsc::Receiver<TurnEvent>,
        agent_speaking_tx: &mpsc::Sender<bool>,
        audio_out: &mpsc::Sender<Vec<u8>>,
    ) -> (SpeakOutcome, TurnRecord) {
        let ThinkReply { text, params, mut record } = reply;

        self.transition(SessionState::Speaking);
        let _ = agent_speaking_tx.send(true).await;

        let mut retried = false;
        let (mut tts_stream, first_frame) = loop {
            match self.open_tts(text.clone(), &params).await {
                TtsOpenOutcome::Ready { stream, first_frame } => break (stream, first_frame),
                TtsOpenOutcome::Timeout => {
                    tracing::warn!(session_id = %self.id, "tts call timed out");
                    let _ = agent_speaking_tx.send(false).await;
                    self.transition(SessionState::Listening);
                    return (SpeakOutcome::Completed, record.with_error("tts_timeout").finish(false));
                }
                TtsOpenOutcome::ProviderError(e) => {
                    TraceEvent::ProviderError {
                        session_id: self.id.clone(),
                        component: "tts".into(),
                        provider: self.agent.tts.model.clone(),
                        message: e.clone(),
                    }
                    .emit();
                    if !retried {
                        retried = true;
                        continue;
                    }
                    // TTS itself is the thing failing: there's no working
                    // channel left to speak an apology through, so the
                    // turn ends silently rather than looping back into
                    // the same broken synthesize() call.
                    let _ = agent_speaking_tx.send(false).await;
                    self.transition(SessionState::Listening);
                    return (SpeakOutcome::Completed, record.with_error(e).finish(false));
                }
            }
        };

        let tts_start = Instant::now();
        let mut interrupted = false;
        // Once the turn feed closes there's no more barge-in signal to
        // watch for — that's the normal shape of "no more turns expected",
        // not an interruption of this one, so the branch is just dropped.
        let mut turn_feed_closed = false;

        match first_frame {
            Some(Ok(bytes)) => {
                record.mark_tts_first_byte(Utc::now());
                if audio_out.send(bytes).await.is_err() {
                    interrupted = true;
                }
            }
            Some(Err(e)) => {
                record = record.with_error(e.to_string());
            }
            None => {}
        }

        loop {
            if interrupted || record.error.is_some() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                event = turn_rx.recv(), if !turn_feed_closed => match event {
                    Some(TurnEvent::AgentBargeInRequested) => {
                        interrupted = true;
                        break;
                    }
                    None => {
                        turn_feed_closed = true;
                    }
                    Some(_) => {}
                },
                frame = tts_stream.frames.next() => match frame {
                    Some(Ok(bytes)) => {
                        record.mark_tts_first_byte(Utc::now());
                        if audio_out.send(bytes).await.is_err() {
                            interrupted = true;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        record = record.with_error(e.to_string());
                        break;
                    }
                    None => break,
                },
            }
        }

        if !interrupted {
            let _ = (&mut tts_stream.done).await;
        }
        record.mark_tts_done(Utc::now());

        let _ = agent_speaking_tx.send(false).await;
        self.transition(SessionState::Listening);

        if interrupted {
            let spoken = estimate_spoken_prefix(&text, params.speed, tts_start.elapsed());
            self.context.truncate_last_assistant(spoken);
            TraceEvent::BargeIn {
                session_id: self.id.clone(),
                detected_at_ms: tts_start.elapsed().as_millis() as u64,
                cancelled_within_ms: 0,
            }
            .emit();
            (SpeakOutcome::Interrupted, record.finish(true))
        } else {
            (SpeakOutcome::Completed, record.finish(false))
        }
    }
}

/// Approximate how much of `text` had likely been spoken after `elapsed`
/// of playback at the given `speed`, for truncating the chat history on
/// barge-in. There's no frame-to-text alignment from the TTS provider to
/// measure this exactly, so this assumes a constant speaking rate.
fn estimate_spoken_prefix(text: &str, speed: f64, elapsed: Duration) -> String {
    let rate = BASE_CHARS_PER_SEC * speed.max(0.1);
    let char_count = text.chars().count();
    let total_estimated_secs = (char_count as f64 / rate).max(0.001);
    let fraction = (elapsed.as_secs_f64() / total_estimated_secs).clamp(0.0, 1.0);
    let spoken_chars = (char_count as f64 * fraction).round() as usize;
    text.chars().take(spoken_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::{mpsc, oneshot};

    use va_audio::stub::{StubSttProvider, StubTtsProvider, StubVadProvider};
    use va_audio::{SttEvent, TtsParams, VadEvent};
    use va_domain::agent_config::AgentConfig;
    use va_domain::capability::{LlmCapabilities, ToolSupport};
    use va_domain::config::{Config, TtsConfig};
    use va_domain::error::Error;
    use va_domain::stream::BoxStream;
    use va_providers::traits::{ChatResponse, EmbeddingsRequest, EmbeddingsResponse};
    use va_providers::{ScriptedStep, StubLlmProvider};
    use va_tools::registry::ToolRegistry;

    use crate::control::AlwaysOkTransferHandler;

    fn deps(llm: StubLlmProvider, stt_script: Vec<SttEvent>, vad_script: Vec<VadEvent>) -> (SessionDeps, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        let (audio_in_tx, audio_in_rx) = mpsc::channel(8);
        let (audio_out_tx, audio_out_rx) = mpsc::channel(8);
        let deps = SessionDeps {
            llm: Arc::new(llm),
            stt: Arc::new(StubSttProvider::new(stt_script)),
            tts: Arc::new(StubTtsProvider),
            vad: Arc::new(StubVadProvider::new(vad_script)),
            metrics: Arc::new(MetricsSink::new(32)),
            transfer: Arc::new(AlwaysOkTransferHandler),
            audio_in: Some(audio_in_rx),
            audio_out: audio_out_tx,
        };
        (deps, audio_in_tx, audio_out_rx)
    }

    fn agent() -> AgentConfig {
        AgentConfig::from_defaults(&Config::default())
    }

    #[tokio::test]
    async fn a_full_turn_reaches_speaking_and_returns_to_listening() {
        let (deps, audio_in_tx, mut audio_out_rx) = deps(
            StubLlmProvider::text("Sure, I can help with that."),
            vec![SttEvent::Final { text: "hello there".into() }],
            vec![VadEvent::VoiceStarted { at_ms: 0 }, VadEvent::VoiceStopped { at_ms: 400 }],
        );

        let session = Session::new(
            "s1",
            agent(),
            SessionConfig {
                call_timeout_ms: Some(2_000),
                ..SessionConfig::default()
            },
            deps,
            ToolRegistry::new(&va_domain::config::ToolsConfig::default()),
            CancellationToken::new(),
        );

        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        // The stub VAD/STT streams replay one scripted turn and then end,
        // which closes the turn feed — with no second utterance queued up,
        // the next `listen()` sees the feed closed rather than the call
        // timeout actually elapsing.
        assert!(matches!(reason, EndReason::Error(_)), "unexpected reason: {reason:?}");
        assert_eq!(turns.len(), 1);
        assert!(turns[0].total_latency_ms.is_some());
        assert!(audio_out_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn end_call_tool_ends_session_normally_after_the_reply_is_spoken() {
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "endCall".into(),
            arguments: serde_json::json!({}),
        };
        let (deps, audio_in_tx, _audio_out_rx) = deps(
            StubLlmProvider::tool_call(call),
            vec![SttEvent::Final { text: "goodbye".into() }],
            vec![VadEvent::VoiceStarted { at_ms: 0 }, VadEvent::VoiceStopped { at_ms: 400 }],
        );

        let mut tools = ToolRegistry::new(&va_domain::config::ToolsConfig::default());
        tools
            .register(
                va_domain::chat::ToolDefinition {
                    name: "endCall".into(),
                    description: "end the call".into(),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                },
                Arc::new(EndCallHandler),
            )
            .unwrap();

        let session = Session::new("s2", agent(), SessionConfig::default(), deps, tools, CancellationToken::new());

        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(reason, EndReason::Normal);
        assert_eq!(turns.len(), 1);
    }

    struct EndCallHandler;

    #[async_trait::async_trait]
    impl va_tools::registry::ToolHandler for EndCallHandler {
        async fn invoke(
            &self,
            _params: serde_json::Value,
            ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            ctx.control.end_call().await;
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[test]
    fn estimate_spoken_prefix_returns_full_text_when_elapsed_exceeds_estimate() {
        let text = "a short reply";
        let spoken = estimate_spoken_prefix(text, 1.0, Duration::from_secs(60));
        assert_eq!(spoken, text);
    }

    #[test]
    fn estimate_spoken_prefix_returns_empty_at_zero_elapsed() {
        let text = "a short reply";
        let spoken = estimate_spoken_prefix(text, 1.0, Duration::from_secs(0));
        assert!(spoken.is_empty());
    }

    /// Errors its first `fail_times` calls, then replays `reply`.
    struct FlakyLlmProvider {
        fail_times: usize,
        calls: AtomicUsize,
        reply: String,
        capabilities: LlmCapabilities,
    }

    impl FlakyLlmProvider {
        fn new(fail_times: usize, reply: impl Into<String>) -> Self {
            Self {
                fail_times,
                calls: AtomicUsize::new(0),
                reply: reply.into(),
                capabilities: LlmCapabilities {
                    supports_tools: ToolSupport::Basic,
                    supports_streaming: true,
                    ..LlmCapabilities::default()
                },
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for FlakyLlmProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            unimplemented!("these tests only exercise the streaming path")
        }

        async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(Error::Provider { provider: "flaky".into(), message: "connection reset".into() });
            }
            let events = vec![
                Ok(StreamEvent::Token { text: self.reply.clone() }),
                Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) }),
            ];
            Ok(Box::pin(futures_util::stream::iter(events)))
        }

        async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            Ok(EmbeddingsResponse { embeddings: vec![] })
        }

        fn capabilities(&self) -> &LlmCapabilities {
            &self.capabilities
        }

        fn provider_id(&self) -> &str {
            "flaky"
        }
    }

    /// Never returns from `chat_stream` within any reasonable test
    /// timeout, to exercise `llmTimeoutMs`.
    struct SlowLlmProvider {
        delay_ms: u64,
        capabilities: LlmCapabilities,
    }

    impl SlowLlmProvider {
        fn new(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                capabilities: LlmCapabilities {
                    supports_tools: ToolSupport::Basic,
                    supports_streaming: true,
                    ..LlmCapabilities::default()
                },
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for SlowLlmProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            unimplemented!("these tests only exercise the streaming path")
        }

        async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            unreachable!("call_llm's timeout should fire long before this resolves")
        }

        async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            Ok(EmbeddingsResponse { embeddings: vec![] })
        }

        fn capabilities(&self) -> &LlmCapabilities {
            &self.capabilities
        }

        fn provider_id(&self) -> &str {
            "slow"
        }
    }

    /// Fails its first `fail_times` calls to `synthesize`, then succeeds
    /// with a single dummy frame.
    struct FlakyTtsProvider {
        fail_times: usize,
        calls: AtomicUsize,
    }

    impl FlakyTtsProvider {
        fn new(fail_times: usize) -> Self {
            Self { fail_times, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl TtsProvider for FlakyTtsProvider {
        async fn synthesize(
            &self,
            mut text: BoxStream<'static, String>,
            _params: &TtsParams,
            _config: &TtsConfig,
        ) -> Result<va_audio::TtsStream> {
            while text.next().await.is_some() {}
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(Error::Provider { provider: "flaky-tts".into(), message: "synth failed".into() });
            }
            let (done_tx, done_rx) = oneshot::channel();
            let _ = done_tx.send(());
            let frames: BoxStream<'static, Result<Vec<u8>>> =
                Box::pin(futures_util::stream::iter(vec![Ok(vec![0u8; 4])]));
            Ok(va_audio::TtsStream { frames, done: done_rx })
        }
    }

    /// Never returns from `synthesize` within any reasonable test timeout,
    /// to exercise `ttsTimeoutMs`.
    struct SlowTtsProvider {
        delay_ms: u64,
    }

    #[async_trait::async_trait]
    impl TtsProvider for SlowTtsProvider {
        async fn synthesize(
            &self,
            _text: BoxStream<'static, String>,
            _params: &TtsParams,
            _config: &TtsConfig,
        ) -> Result<va_audio::TtsStream> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            unreachable!("open_tts's timeout should fire long before this resolves")
        }
    }

    fn deps_with_llm_tts(
        llm: impl LlmProvider + 'static,
        tts: impl TtsProvider + 'static,
        stt_script: Vec<SttEvent>,
        vad_script: Vec<VadEvent>,
    ) -> (SessionDeps, mpsc::Sender<Vec<u8>>) {
        let (audio_in_tx, audio_in_rx) = mpsc::channel(8);
        let (audio_out_tx, audio_out_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut rx = audio_out_rx;
            while rx.recv().await.is_some() {}
        });
        let deps = SessionDeps {
            llm: Arc::new(llm),
            stt: Arc::new(StubSttProvider::new(stt_script)),
            tts: Arc::new(tts),
            vad: Arc::new(StubVadProvider::new(vad_script)),
            metrics: Arc::new(MetricsSink::new(32)),
            transfer: Arc::new(AlwaysOkTransferHandler),
            audio_in: Some(audio_in_rx),
            audio_out: audio_out_tx,
        };
        (deps, audio_in_tx)
    }

    fn one_turn_script() -> (Vec<SttEvent>, Vec<VadEvent>) {
        (
            vec![SttEvent::Final { text: "hello there".into() }],
            vec![VadEvent::VoiceStarted { at_ms: 0 }, VadEvent::VoiceStopped { at_ms: 400 }],
        )
    }

    #[tokio::test]
    async fn llm_error_is_retried_once_and_recovers_within_the_turn() {
        let (stt, vad) = one_turn_script();
        let (deps, audio_in_tx) =
            deps_with_llm_tts(FlakyLlmProvider::new(1, "Sure, I can help with that."), StubTtsProvider, stt, vad);

        let session = Session::new("s3", agent(), SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (_reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(turns.len(), 1);
        assert!(turns[0].error.is_none());
        assert_eq!(turns[0].assistant_text, "Sure, I can help with that.");
    }

    #[tokio::test]
    async fn llm_error_exhausting_the_retry_apologizes_and_returns_to_listening() {
        let (stt, vad) = one_turn_script();
        // Always fails: the one retry the turn is allowed is used up too.
        let (deps, audio_in_tx) = deps_with_llm_tts(FlakyLlmProvider::new(1_000, "unused"), StubTtsProvider, stt, vad);

        let session = Session::new("s4", agent(), SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (_reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(turns.len(), 1);
        assert!(turns[0].error.is_some());
        assert_eq!(turns[0].assistant_text, CANNED_PROVIDER_TROUBLE);
    }

    #[tokio::test]
    async fn llm_timeout_apologizes_with_llm_timeout_error() {
        let (stt, vad) = one_turn_script();
        let (deps, audio_in_tx) = deps_with_llm_tts(SlowLlmProvider::new(2_000), StubTtsProvider, stt, vad);

        let mut a = agent();
        a.llm.timeout_ms = 30;
        let session = Session::new("s5", a, SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (_reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].error.as_deref(), Some("llm_timeout"));
        assert_eq!(turns[0].assistant_text, CANNED_PROVIDER_TROUBLE);
    }

    #[tokio::test]
    async fn tts_error_is_retried_once_and_recovers_within_the_turn() {
        let (stt, vad) = one_turn_script();
        let (deps, audio_in_tx) =
            deps_with_llm_tts(StubLlmProvider::text("Sure, I can help with that."), FlakyTtsProvider::new(1), stt, vad);

        let session = Session::new("s6", agent(), SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (_reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(turns.len(), 1);
        assert!(turns[0].error.is_none());
    }

    #[tokio::test]
    async fn tts_error_exhausting_the_retry_returns_to_listening_without_ending_session() {
        let (stt, vad) = one_turn_script();
        let (deps, audio_in_tx) =
            deps_with_llm_tts(StubLlmProvider::text("Sure, I can help with that."), FlakyTtsProvider::new(1_000), stt, vad);

        let session = Session::new("s7", agent(), SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(turns.len(), 1);
        assert!(turns[0].error.is_some());
        // Not EndReason::Error from a tts failure directly -- the turn
        // feed closing after the single scripted turn is what ends it.
        assert!(matches!(reason, EndReason::Error(_)));
    }

    #[tokio::test]
    async fn tts_timeout_marks_the_turn_with_tts_timeout_error() {
        let (stt, vad) = one_turn_script();
        let (deps, audio_in_tx) =
            deps_with_llm_tts(StubLlmProvider::text("Sure, I can help with that."), SlowTtsProvider { delay_ms: 2_000 }, stt, vad);

        let mut a = agent();
        a.tts.timeout_ms = 30;
        let session = Session::new("s8", a, SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (_reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].error.as_deref(), Some("tts_timeout"));
    }

    #[tokio::test]
    async fn empty_llm_reply_falls_back_to_a_canned_utterance() {
        let (stt, vad) = one_turn_script();
        let (deps, audio_in_tx) = deps_with_llm_tts(StubLlmProvider::new(Vec::new()), StubTtsProvider, stt, vad);

        let session = Session::new("s9", agent(), SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (_reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].assistant_text, CANNED_EMPTY_REPLY);
    }

    #[tokio::test]
    async fn successful_transfer_ends_the_session_with_transferred() {
        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "transferCall".into(),
            arguments: serde_json::json!({"transfer_to": "+14155550123"}),
        };
        let (stt, vad) = one_turn_script();
        let (deps, audio_in_tx) = deps_with_llm_tts(StubLlmProvider::tool_call(call), StubTtsProvider, stt, vad);

        let mut tools = ToolRegistry::new(&va_domain::config::ToolsConfig::default());
        tools
            .register(
                va_domain::chat::ToolDefinition {
                    name: "transferCall".into(),
                    description: "transfer the call".into(),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                },
                Arc::new(TransferCallHandler),
            )
            .unwrap();

        let session = Session::new("s10", agent(), SessionConfig::default(), deps, tools, CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let (reason, turns) = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        assert_eq!(reason, EndReason::Transferred);
        assert_eq!(turns.len(), 1);
    }

    struct TransferCallHandler;

    #[async_trait::async_trait]
    impl va_tools::registry::ToolHandler for TransferCallHandler {
        async fn invoke(
            &self,
            _params: serde_json::Value,
            ctx: &ToolContext,
        ) -> Result<serde_json::Value> {
            ctx.control.transfer_call("+14155550123").await?;
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn metrics_are_emitted_live_on_the_broadcast_channel() {
        let (deps, audio_in_tx, mut _audio_out_rx) = deps(
            StubLlmProvider::text("Sure, I can help with that."),
            vec![SttEvent::Final { text: "hello there".into() }],
            vec![VadEvent::VoiceStarted { at_ms: 0 }, VadEvent::VoiceStopped { at_ms: 400 }],
        );
        let metrics = deps.metrics.clone();
        let mut sub = metrics.subscribe();

        let session = Session::new("s11", agent(), SessionConfig::default(), deps, ToolRegistry::new(&va_domain::config::ToolsConfig::default()), CancellationToken::new());
        let _ = audio_in_tx.send(vec![0u8; 160]).await;

        let _ = tokio::time::timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session did not finish in time");

        let received = sub.recv().await.expect("expected a turn record on the broadcast channel");
        assert_eq!(received.assistant_text, "Sure, I can help with that.");
    }
}
