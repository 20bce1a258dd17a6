//! Worker Dispatcher: the long-lived room-server control-plane
//! client.
//!
//! Grounded on `sa-node-sdk::client::NodeClient::run` — connect, handshake,
//! enter a message loop with heartbeat ping/pong, reconnect with jittered
//! exponential back-off on disconnect — re-pointed at the room-server's
//! job-dispatch protocol (`va_protocol::WsMessage`) instead of a gateway's
//! tool-request protocol: one task per dispatched job instead of one task
//! per tool call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use va_audio::stub::{StubSttProvider, StubTtsProvider, StubVadProvider};
use va_domain::agent_config::AgentConfig;
use va_domain::config::Config;
use va_domain::job::Job;
use va_dialer::{DialError, DialParams, Dialer};
use va_metrics::MetricsSink;
use va_protocol::{JobState, WorkerCapability, WsMessage};
use va_providers::ProviderRegistry;
use va_session::{EndReason, Session, SessionDeps};
use va_tools::builtin::registry_with_builtins;

use crate::reconnect::ReconnectBackoff;
use crate::transfer::ControlPlaneTransferHandler;

/// Shared state every job needs that outlives any single connection.
pub struct WorkerDeps {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub metrics: Arc<MetricsSink>,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("shutdown requested")]
    Shutdown,
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

/// A fully-configured control-plane client ready to connect to the
/// room-server.
pub struct WorkerClient {
    pub ws_url: String,
    pub worker_id: String,
    pub version: String,
    pub capabilities: Vec<WorkerCapability>,
    pub heartbeat_interval: Duration,
    pub reconnect_backoff: ReconnectBackoff,
}

impl WorkerClient {
    /// Run the worker client. Connects to the room-server, registers, and
    /// enters the job-dispatch loop. On disconnection, automatically
    /// reconnects according to the [`ReconnectBackoff`] policy.
    ///
    /// Returns only on fatal error, `max_attempts` exhaustion, or when
    /// `shutdown` fires.
    pub async fn run(self, deps: WorkerDeps, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let deps = Arc::new(deps);
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(WorkerError::Shutdown);
            }

            let result = tokio::select! {
                r = self.connect_and_run(&deps) => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id = %self.worker_id, "shutdown requested");
                    return Err(WorkerError::Shutdown);
                }
            };

            match result {
                Ok(handshake_completed) => {
                    tracing::info!(
                        worker_id = %self.worker_id,
                        handshake_completed,
                        "control-plane connection closed"
                    );
                    if handshake_completed {
                        attempt = 0;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        attempt,
                        error = %e,
                        "control-plane connection lost"
                    );
                }
            }

            if self.reconnect_backoff.should_give_up(attempt) {
                tracing::error!(
                    worker_id = %self.worker_id,
                    attempts = attempt,
                    "max reconnect attempts exhausted"
                );
                return Err(WorkerError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect_backoff.delay_for_attempt(attempt);
            tracing::info!(
                worker_id = %self.worker_id,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(WorkerError::Shutdown),
            }

            attempt += 1;
        }
    }

    /// Single connection lifecycle: connect -> register -> welcome ->
    /// job-dispatch loop. Returns `Ok(true)` if the handshake completed
    /// (welcome received) before the connection closed, `Ok(false)`
    /// otherwise.
    async fn connect_and_run(&self, deps: &Arc<WorkerDeps>) -> Result<bool, anyhow::Error> {
        tracing::info!(url = %self.ws_url, worker_id = %self.worker_id, "connecting to room-server");
        let (ws, _response) = tokio_tungstenite::connect_async(&self.ws_url).await?;
        let (mut sink, mut stream) = ws.split();

        let hello = WsMessage::RegisterWorker {
            worker_id: self.worker_id.clone(),
            capabilities: self.capabilities.clone(),
            version: self.version.clone(),
        };
        sink.send(Message::Text(serde_json::to_string(&hello)?)).await?;

        let welcome_timeout = Duration::from_secs(10);
        let welcome = tokio::time::timeout(welcome_timeout, async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    if let Ok(WsMessage::Welcome { server_version, .. }) =
                        serde_json::from_str(&text)
                    {
                        return Ok(server_version);
                    }
                }
            }
            Err(anyhow::anyhow!("connection closed before welcome"))
        })
        .await;

        let server_version = match welcome {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("welcome timeout")),
        };
        tracing::info!(
            server_version = %server_version,
            worker_id = %self.worker_id,
            "room-server welcomed us"
        );

        let ws = sink
            .reunite(stream)
            .map_err(|e| anyhow::anyhow!("failed to reunite WebSocket halves: {e}"))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(64);
        let dialer = Arc::new(Dialer::new(outbound_tx.clone()));
        let jobs_cancel = CancellationToken::new();

        let ping_tx = outbound_tx.clone();
        let ping_interval = self.heartbeat_interval;
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            loop {
                interval.tick().await;
                let msg = WsMessage::Ping {
                    timestamp: Utc::now().timestamp_millis(),
                };
                if ping_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(ref text) => match serde_json::from_str::<WsMessage>(text) {
                    Ok(WsMessage::JobAssignment { job }) => {
                        let deps = deps.clone();
                        let dialer = dialer.clone();
                        let outbound = outbound_tx.clone();
                        let job_cancel = jobs_cancel.child_token();
                        tokio::spawn(async move {
                            run_job(job, deps, dialer, outbound, job_cancel).await;
                        });
                    }
                    Ok(WsMessage::SipParticipantResult {
                        request_id,
                        outcome,
                        participant_identity,
                        status_detail,
                    }) => {
                        dialer.complete(&request_id, outcome, participant_identity, status_detail);
                    }
                    Ok(WsMessage::Ping { timestamp }) => {
                        let _ = outbound_tx.send(WsMessage::Pong { timestamp }).await;
                    }
                    Ok(WsMessage::Pong { .. }) => {
                        tracing::trace!("received pong");
                    }
                    Ok(other) => {
                        tracing::debug!(message = ?other, "ignoring message not handled here");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to parse control-plane message");
                    }
                },
                Message::Close(_) => {
                    tracing::info!("room-server closed connection");
                    break;
                }
                _ => {}
            }
        }

        jobs_cancel.cancel();
        ping_task.abort();
        writer_task.abort();

        Ok(true)
    }
}

/// Carry out one dispatched job end-to-end: dial, run the session, tear
/// down the room, report the final status. Never propagates an error back
/// to the dispatch loop — every failure becomes a `JobStatus`.
async fn run_job(
    job: Job,
    deps: Arc<WorkerDeps>,
    dialer: Arc<Dialer>,
    outbound: mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
) {
    let span = tracing::info_span!("job", job_id = %job.id, room_name = %job.room_name);
    let _enter = span.enter();

    if let Err(e) = job.metadata.validate() {
        tracing::warn!(error = %e, "rejecting job: invalid metadata");
        let _ = outbound
            .send(WsMessage::JobStatus {
                job_id: job.id.clone(),
                state: JobState::FatalError,
                reason: Some(e.to_string()),
            })
            .await;
        return;
    }

    let _ = outbound
        .send(WsMessage::JobStatus {
            job_id: job.id.clone(),
            state: JobState::Accepted,
            reason: None,
        })
        .await;

    let identity = format!("sip-out-{}", job.id);
    let dial_params = DialParams {
        trunk_id: deps
            .config
            .dialer
            .outbound_trunk_id
            .clone()
            .unwrap_or_default(),
        callee_e164: job.metadata.phone_number.clone(),
        room_name: job.room_name.clone(),
        identity: identity.clone(),
    };

    let participant = match dialer.dial(dial_params, &cancel).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "dial failed, job will not be answered");
            let state = match e {
                DialError::Cancelled => JobState::ParticipantLeft,
                _ => JobState::FatalError,
            };
            let _ = outbound
                .send(WsMessage::JobStatus {
                    job_id: job.id.clone(),
                    state,
                    reason: Some(e.to_string()),
                })
                .await;
            return;
        }
    };

    let _ = outbound
        .send(WsMessage::JobStatus {
            job_id: job.id.clone(),
            state: JobState::InProgress,
            reason: None,
        })
        .await;

    let agent = AgentConfig::from_defaults(&deps.config);
    if job.metadata.agent_config_id.is_some() {
        tracing::debug!(
            agent_config_id = ?job.metadata.agent_config_id,
            "per-job agent config overrides are not yet stored anywhere; using bundled defaults"
        );
    }

    let llm = deps
        .llm
        .for_role(&agent.llm.role)
        .or_else(|| deps.llm.iter().next().map(|(_, p)| p.clone()));
    let Some(llm) = llm else {
        tracing::error!(role = %agent.llm.role, "no LLM provider available for this job's role");
        let _ = outbound
            .send(WsMessage::JobStatus {
                job_id: job.id.clone(),
                state: JobState::FatalError,
                reason: Some(format!("no LLM provider for role '{}'", agent.llm.role)),
            })
            .await;
        let _ = outbound
            .send(WsMessage::DeleteRoom {
                room_name: job.room_name.clone(),
            })
            .await;
        return;
    };

    let tools = match registry_with_builtins(&deps.config.tools) {
        Ok(registry) => {
            for spec in &agent.tools {
                tracing::debug!(
                    tool = %spec.name,
                    "per-job tool handlers aren't wired up yet; declared but not dispatchable"
                );
            }
            registry
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to build tool registry");
            let _ = outbound
                .send(WsMessage::JobStatus {
                    job_id: job.id.clone(),
                    state: JobState::FatalError,
                    reason: Some(e.to_string()),
                })
                .await;
            return;
        }
    };

    // `audio_in`/`audio_out` bridge to the room's live media track. Wiring
    // that track is the room/media server's job (out of scope here); the
    // sender side is drained so a session can still run end-to-end against
    // whichever STT/TTS/VAD adapters are configured.
    let (audio_out_tx, mut audio_out_rx) = mpsc::channel::<Vec<u8>>(32);
    tokio::spawn(async move { while audio_out_rx.recv().await.is_some() {} });

    let transfer = Arc::new(ControlPlaneTransferHandler::new(
        outbound.clone(),
        job.room_name.clone(),
        participant.identity.clone(),
    ));

    let session_deps = SessionDeps {
        llm,
        stt: Arc::new(StubSttProvider::new(Vec::new())),
        tts: Arc::new(StubTtsProvider),
        vad: Arc::new(StubVadProvider::new(Vec::new())),
        metrics: deps.metrics.clone(),
        transfer,
        audio_in: None,
        audio_out: audio_out_tx,
    };

    let session = Session::new(
        job.id.clone(),
        agent,
        deps.config.session.clone(),
        session_deps,
        tools,
        cancel,
    );

    let (reason, turns) = session.run().await;
    tracing::info!(turns = turns.len(), reason = ?reason, "session ended");

    let (state, job_reason) = end_reason_to_job_state(&reason);
    let _ = outbound
        .send(WsMessage::DeleteRoom {
            room_name: job.room_name.clone(),
        })
        .await;
    let _ = outbound
        .send(WsMessage::JobStatus {
            job_id: job.id,
            state,
            reason: job_reason,
        })
        .await;
}

/// Map a session's [`EndReason`] onto the room-server's coarser
/// [`JobState`] enum. `JobState` has no dedicated answering-machine or
/// transfer variant, so both fold into `Normal` with a `reason` string —
/// the call ended the way the conversation wanted it to, just not via the
/// plain hang-up path. A worker-initiated cancellation (shutdown mid-call)
/// folds into `ParticipantLeft`: from the room-server's perspective the
/// room is being torn down the same way it would be if the remote side
/// had hung up.
fn end_reason_to_job_state(reason: &EndReason) -> (JobState, Option<String>) {
    match reason {
        EndReason::Normal => (JobState::Normal, None),
        EndReason::AnsweringMachine => (JobState::Normal, Some("answering_machine".into())),
        EndReason::Transferred => (JobState::Normal, Some("transferred".into())),
        EndReason::CallTimeout => (JobState::Timeout, None),
        EndReason::Cancelled => (JobState::ParticipantLeft, Some("cancelled".into())),
        EndReason::Error(msg) => (JobState::FatalError, Some(msg.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc as ChronoUtc;

    use va_domain::job::JobMetadata;
    use va_providers::ProviderRegistry;

    fn deps() -> Arc<WorkerDeps> {
        let config = Config::default();
        let llm = ProviderRegistry::from_config(&config.llm).unwrap();
        Arc::new(WorkerDeps {
            config: Arc::new(config),
            llm: Arc::new(llm),
            metrics: Arc::new(MetricsSink::new(32)),
        })
    }

    fn job(metadata: JobMetadata) -> Job {
        Job {
            id: "job-1".into(),
            room_name: "room-1".into(),
            metadata,
            dispatched_at: ChronoUtc::now(),
        }
    }

    #[test]
    fn end_reason_to_job_state_maps_every_variant() {
        assert_eq!(end_reason_to_job_state(&EndReason::Normal), (JobState::Normal, None));
        assert_eq!(
            end_reason_to_job_state(&EndReason::AnsweringMachine),
            (JobState::Normal, Some("answering_machine".into()))
        );
        assert_eq!(
            end_reason_to_job_state(&EndReason::Transferred),
            (JobState::Normal, Some("transferred".into()))
        );
        assert_eq!(end_reason_to_job_state(&EndReason::CallTimeout), (JobState::Timeout, None));
        assert_eq!(
            end_reason_to_job_state(&EndReason::Cancelled),
            (JobState::ParticipantLeft, Some("cancelled".into()))
        );
        assert_eq!(
            end_reason_to_job_state(&EndReason::Error("boom".into())),
            (JobState::FatalError, Some("boom".into()))
        );
    }

    #[tokio::test]
    async fn invalid_metadata_is_rejected_before_any_dial_attempt() {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let (dialer_tx, dialer_rx) = mpsc::channel(8);
        drop(dialer_rx);
        let dialer = Arc::new(Dialer::new(dialer_tx));

        let bad_job = job(JobMetadata {
            phone_number: "not-e164".into(),
            ..JobMetadata::default()
        });

        run_job(bad_job, deps(), dialer, outbound_tx, CancellationToken::new()).await;

        match outbound_rx.recv().await.unwrap() {
            WsMessage::JobStatus { state, reason, .. } => {
                assert_eq!(state, JobState::FatalError);
                assert!(reason.unwrap().contains("E.164"));
            }
            other => panic!("expected JobStatus, got {other:?}"),
        }
        assert!(outbound_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dial_failure_reports_fatal_error_and_skips_the_session() {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let (dialer_tx, dialer_rx) = mpsc::channel(8);
        drop(dialer_rx);
        let dialer = Arc::new(Dialer::new(dialer_tx));

        let good_job = job(JobMetadata {
            phone_number: "+14155550123".into(),
            ..JobMetadata::default()
        });

        run_job(good_job, deps(), dialer, outbound_tx, CancellationToken::new()).await;

        match outbound_rx.recv().await.unwrap() {
            WsMessage::JobStatus { state, .. } => assert_eq!(state, JobState::Accepted),
            other => panic!("expected Accepted JobStatus, got {other:?}"),
        }
        match outbound_rx.recv().await.unwrap() {
            WsMessage::JobStatus { state, reason, .. } => {
                assert_eq!(state, JobState::FatalError);
                assert_eq!(reason.as_deref(), Some(DialError::Disconnected.to_string().as_str()));
            }
            other => panic!("expected FatalError JobStatus, got {other:?}"),
        }
        assert!(outbound_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_dial_reports_participant_left() {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let (dialer_tx, _dialer_rx) = mpsc::channel(8);
        let dialer = Arc::new(Dialer::new(dialer_tx));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let good_job = job(JobMetadata {
            phone_number: "+14155550123".into(),
            ..JobMetadata::default()
        });

        run_job(good_job, deps(), dialer, outbound_tx, cancel).await;

        let _ = outbound_rx.recv().await.unwrap(); // Accepted
        match outbound_rx.recv().await.unwrap() {
            WsMessage::JobStatus { state, .. } => assert_eq!(state, JobState::ParticipantLeft),
            other => panic!("expected ParticipantLeft JobStatus, got {other:?}"),
        }
    }
}

