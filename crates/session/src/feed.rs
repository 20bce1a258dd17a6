//! Background task that owns the [`TurnDetector`] exclusively and merges
//! VAD + STT events into [`TurnEvent`]s for the session loop.
//!
//! The detector isn't driven by the main session loop directly because
//! `listen()`/`think()`/`speak()` each await a single phase at a time
//! while VAD/STT events keep arriving throughout — particularly during
//! `speak()`, where a barge-in can land while the loop is busy awaiting a
//! TTS frame. Owning the detector here and forwarding events over a
//! channel lets the session read turn boundaries without itself having
//! to poll three sources every iteration.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use va_audio::{SttEvent, VadEvent};
use va_domain::error::Result;
use va_domain::stream::BoxStream;
use va_turndetect::{TurnDetector, TurnEvent};

fn sleep_branch(deadline: Option<Instant>) -> tokio::time::Sleep {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)),
        // Never polled: the select branch below is gated on `deadline.is_some()`.
        None => tokio::time::sleep(Duration::from_secs(0)),
    }
}

pub(crate) async fn run_turn_feed(
    mut vad_events: BoxStream<'static, Result<VadEvent>>,
    mut stt_events: BoxStream<'static, Result<SttEvent>>,
    mut detector: TurnDetector,
    tx: mpsc::Sender<TurnEvent>,
    session_start: Instant,
    mut agent_speaking_rx: mpsc::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut vad_done = false;
    let mut stt_done = false;

    loop {
        if vad_done && stt_done && detector.next_deadline().is_none() {
            return;
        }
        let deadline = detector.next_deadline();

        let fired = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            Some(speaking) = agent_speaking_rx.recv() => {
                detector.set_agent_speaking(speaking);
                continue;
            }
            maybe = vad_events.next(), if !vad_done => {
                match maybe {
                    Some(Ok(event)) => detector.on_vad_event(event, session_start),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "vad stream error");
                        continue;
                    }
                    None => {
                        vad_done = true;
                        continue;
                    }
                }
            }
            maybe = stt_events.next(), if !stt_done => {
                match maybe {
                    Some(Ok(event)) => detector.on_stt_event(event, Instant::now()),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "stt stream error");
                        continue;
                    }
                    None => {
                        stt_done = true;
                        continue;
                    }
                }
            }
            _ = sleep_branch(deadline), if deadline.is_some() => {
                detector.tick(Instant::now())
            }
        };

        for event in fired {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}
