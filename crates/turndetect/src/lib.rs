//! Turn Detector.
//!
//! Fuses VAD voice/silence edges with STT partial/final events into turn
//! boundaries. Every transition is a pure evaluation against an explicit
//! timestamp rather than a self-driven timer task — callers
//! (`va-session`'s orchestrator) own the clock and call in on every
//! provider event plus on [`TurnDetector::tick`] at
//! [`TurnDetector::next_deadline`], keeping the detector deterministic and
//! cheap to test.

use std::time::{Duration, Instant};

use va_audio::{SttEvent, VadEvent};
use va_domain::config::{SessionConfig, SttConfig};

/// Events the Turn Detector emits for the session state machine to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    UserTurnStarted,
    PartialTranscript { text: String },
    UserTurnEnded { text: String, ended_at: Instant },
    AgentBargeInRequested,
}

struct HeldFinal {
    text: String,
    /// Once `now` passes this, we stop watching for a superseding partial —
    /// the held text is still used whenever silence actually arrives.
    watch_until: Instant,
}

/// Fuses VAD + STT events into `TurnEvent`s.
pub struct TurnDetector {
    endpointing_ms: u64,
    final_debounce_ms: u64,
    voice_active: bool,
    agent_speaking: bool,
    hangover_deadline: Option<Instant>,
    held_final: Option<HeldFinal>,
}

impl TurnDetector {
    pub fn new(stt: &SttConfig, session: &SessionConfig) -> Self {
        Self {
            endpointing_ms: stt.endpointing_ms,
            final_debounce_ms: session.final_debounce_ms,
            voice_active: false,
            agent_speaking: false,
            hangover_deadline: None,
            held_final: None,
        }
    }

    /// Tell the detector whether the agent is currently in `Speaking`.
    /// Voice detected while this is true is a barge-in, not a new turn.
    pub fn set_agent_speaking(&mut self, speaking: bool) {
        self.agent_speaking = speaking;
    }

    pub fn on_vad_voice_started(&mut self, _at: Instant) -> Vec<TurnEvent> {
        self.voice_active = true;
        self.hangover_deadline = None;
        if self.agent_speaking {
            vec![TurnEvent::AgentBargeInRequested]
        } else {
            vec![TurnEvent::UserTurnStarted]
        }
    }

    pub fn on_vad_voice_stopped(&mut self, at: Instant) -> Vec<TurnEvent> {
        self.voice_active = false;
        if let Some(held) = self.held_final.take() {
            return vec![TurnEvent::UserTurnEnded {
                text: held.text,
                ended_at: at,
            }];
        }
        self.hangover_deadline = Some(at + Duration::from_millis(self.endpointing_ms));
        Vec::new()
    }

    /// A new partial transcript. Never ends a turn; supersedes any final
    /// still being held for debounce, since new speech content means the
    /// held final no longer reflects the whole utterance.
    pub fn on_stt_partial(&mut self, text: String) -> Vec<TurnEvent> {
        self.held_final = None;
        vec![TurnEvent::PartialTranscript { text }]
    }

    /// A finalized transcript. Short-circuits the hangover timer when VAD
    /// already reports silence; otherwise held until the next silence edge.
    pub fn on_stt_final(&mut self, text: String, at: Instant) -> Vec<TurnEvent> {
        if self.voice_active {
            self.held_final = Some(HeldFinal {
                text,
                watch_until: at + Duration::from_millis(self.final_debounce_ms),
            });
            Vec::new()
        } else {
            self.hangover_deadline = None;
            vec![TurnEvent::UserTurnEnded { text, ended_at: at }]
        }
    }

    /// Advance the clock. Call at [`Self::next_deadline`] (or on any event
    /// above, which already checks relevant state inline).
    pub fn tick(&mut self, now: Instant) -> Vec<TurnEvent> {
        if let Some(deadline) = self.hangover_deadline {
            if now >= deadline {
                self.hangover_deadline = None;
                // Hangover elapsed with no STT final: end the turn on
                // whatever partial text was last seen. The session owns
                // the running partial text; the detector itself only
                // reports the boundary.
                return vec![TurnEvent::UserTurnEnded {
                    text: String::new(),
                    ended_at: now,
                }];
            }
        }
        Vec::new()
    }

    /// When the orchestrator should next call [`Self::tick`], if ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.hangover_deadline
    }

    pub fn is_holding_final(&self) -> bool {
        self.held_final.is_some()
    }

    /// Feed a [`VadEvent`] straight from an open `va-audio` VAD stream.
    /// `at_ms` is an offset from stream open, anchored by `session_start`.
    pub fn on_vad_event(&mut self, event: VadEvent, session_start: Instant) -> Vec<TurnEvent> {
        match event {
            VadEvent::VoiceStarted { at_ms } => {
                self.on_vad_voice_started(session_start + Duration::from_millis(at_ms))
            }
            VadEvent::VoiceStopped { at_ms } => {
                self.on_vad_voice_stopped(session_start + Duration::from_millis(at_ms))
            }
        }
    }

    /// Feed an [`SttEvent`] straight from an open `va-audio` STT stream.
    pub fn on_stt_event(&mut self, event: SttEvent, at: Instant) -> Vec<TurnEvent> {
        match event {
            SttEvent::Partial { text } => self.on_stt_partial(text),
            SttEvent::Final { text } => self.on_stt_final(text, at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(endpointing_ms: u64, final_debounce_ms: u64) -> TurnDetector {
        TurnDetector::new(
            &SttConfig {
                endpointing_ms,
                ..SttConfig::default()
            },
            &SessionConfig {
                final_debounce_ms,
                ..SessionConfig::default()
            },
        )
    }

    #[test]
    fn voice_started_emits_user_turn_started() {
        let mut d = detector(150, 200);
        let events = d.on_vad_voice_started(Instant::now());
        assert_eq!(events, vec![TurnEvent::UserTurnStarted]);
    }

    #[test]
    fn voice_started_while_agent_speaking_requests_barge_in() {
        let mut d = detector(150, 200);
        d.set_agent_speaking(true);
        let events = d.on_vad_voice_started(Instant::now());
        assert_eq!(events, vec![TurnEvent::AgentBargeInRequested]);
    }

    #[test]
    fn final_during_silence_ends_turn_immediately() {
        let mut d = detector(150, 200);
        let now = Instant::now();
        d.on_vad_voice_started(now);
        d.on_vad_voice_stopped(now);
        let events = d.on_stt_final("hello".into(), now);
        assert_eq!(
            events,
            vec![TurnEvent::UserTurnEnded {
                text: "hello".into(),
                ended_at: now
            }]
        );
    }

    #[test]
    fn hangover_elapses_without_final() {
        let mut d = detector(150, 200);
        let t0 = Instant::now();
        d.on_vad_voice_started(t0);
        d.on_vad_voice_stopped(t0);
        assert!(d.next_deadline().is_some());

        let after = t0 + Duration::from_millis(151);
        let events = d.tick(after);
        assert!(matches!(events.as_slice(), [TurnEvent::UserTurnEnded { .. }]));
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn tick_before_deadline_emits_nothing() {
        let mut d = detector(150, 200);
        let t0 = Instant::now();
        d.on_vad_voice_stopped(t0);
        let events = d.tick(t0 + Duration::from_millis(10));
        assert!(events.is_empty());
    }

    #[test]
    fn final_while_voice_active_is_held_then_emitted_on_silence() {
        let mut d = detector(150, 200);
        let t0 = Instant::now();
        d.on_vad_voice_started(t0);
        let events = d.on_stt_final("brief pause".into(), t0);
        assert!(events.is_empty());
        assert!(d.is_holding_final());

        let events = d.on_vad_voice_stopped(t0 + Duration::from_millis(50));
        assert_eq!(
            events,
            vec![TurnEvent::UserTurnEnded {
                text: "brief pause".into(),
                ended_at: t0 + Duration::from_millis(50),
            }]
        );
    }

    #[test]
    fn new_partial_discards_held_final() {
        let mut d = detector(150, 200);
        let t0 = Instant::now();
        d.on_vad_voice_started(t0);
        d.on_stt_final("stale".into(), t0);
        assert!(d.is_holding_final());

        d.on_stt_partial("continuing...".into());
        assert!(!d.is_holding_final());
    }

    #[test]
    fn on_vad_event_wraps_voice_started() {
        let mut d = detector(150, 200);
        let start = Instant::now();
        let events = d.on_vad_event(VadEvent::VoiceStarted { at_ms: 0 }, start);
        assert_eq!(events, vec![TurnEvent::UserTurnStarted]);
    }

    #[test]
    fn on_stt_event_wraps_final() {
        let mut d = detector(150, 200);
        let now = Instant::now();
        let events = d.on_stt_event(SttEvent::Final { text: "hi".into() }, now);
        assert_eq!(
            events,
            vec![TurnEvent::UserTurnEnded {
                text: "hi".into(),
                ended_at: now
            }]
        );
    }

    #[test]
    fn partial_transcript_never_ends_turn() {
        let mut d = detector(150, 200);
        let events = d.on_stt_partial("still talking".into());
        assert_eq!(
            events,
            vec![TurnEvent::PartialTranscript {
                text: "still talking".into()
            }]
        );
    }
}
