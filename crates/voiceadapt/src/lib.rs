//! Voice Adaptation Engine.
//!
//! Lightweight, dependency-free keyword/lexicon scoring: a score →
//! threshold → decision pipeline with no embeddings or HTTP calls —
//! sentiment, urgency, and complexity are all computed from the utterance
//! text alone.
//!
//! Every public entry point is infallible by construction — there is no
//! `Result` to propagate, so a caller can never see this engine "throw".
//! Voice adaptation is advisory, so its interface cannot fail.

use std::collections::VecDeque;
use std::time::Instant;

use va_audio::{EmotionParam, TtsParams};
use va_domain::config::VoiceAdaptationConfig;

// ── Lexicons ────────────────────────────────────────────────────────

const POSITIVE_WORDS: &[&str] = &[
    "great", "thanks", "thank", "awesome", "perfect", "good", "yes", "love", "appreciate",
    "wonderful", "happy", "glad",
];

const NEGATIVE_WORDS: &[&str] = &[
    "angry", "upset", "frustrated", "terrible", "awful", "bad", "no", "hate", "annoyed",
    "unacceptable", "ridiculous", "worst",
];

const URGENCY_WORDS: &[&str] = &[
    "now", "immediately", "urgent", "asap", "emergency", "right away", "hurry", "quickly",
];

// ── Scoring ─────────────────────────────────────────────────────────

/// Coarse sentiment bucket for an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Count lexicon hits in `text`, case-insensitively, as a fraction of
/// words scanned (capped at 1.0).
fn lexicon_hit_ratio(text: &str, lexicon: &[&str]) -> f64 {
    let lower = text.to_lowercase();
    let hits = lexicon.iter().filter(|w| lower.contains(*w)).count();
    (hits as f64 / 4.0).min(1.0)
}

/// Classify sentiment via positive/negative lexicon hit counts.
pub fn classify_sentiment(text: &str) -> Sentiment {
    let pos = lexicon_hit_ratio(text, POSITIVE_WORDS);
    let neg = lexicon_hit_ratio(text, NEGATIVE_WORDS);
    if neg > pos && neg > 0.0 {
        Sentiment::Negative
    } else if pos > neg && pos > 0.0 {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

/// Urgency score in `[0, 1]`: lexicon hits plus short-imperative-clause
/// detection (a short sentence ending without a question mark).
pub fn score_urgency(text: &str) -> f64 {
    let lexicon = lexicon_hit_ratio(text, URGENCY_WORDS);
    let trimmed = text.trim();
    let word_count = trimmed.split_whitespace().count();
    let imperative = word_count > 0 && word_count <= 5 && !trimmed.ends_with('?');
    let imperative_score = if imperative { 0.3 } else { 0.0 };
    (lexicon + imperative_score).min(1.0)
}

/// Complexity score in `[0, 1]`: average sentence length and question
/// density.
pub fn score_complexity(text: &str) -> f64 {
    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return 0.0;
    }

    let total_words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();
    let avg_len = total_words as f64 / sentences.len() as f64;
    let length_score = (avg_len / 20.0).min(1.0);

    let question_count = text.matches('?').count();
    let question_density = (question_count as f64 / sentences.len() as f64).min(1.0);

    (length_score * 0.7 + question_density * 0.3).min(1.0)
}

// ── Conversation stage ──────────────────────────────────────────────

/// Coarse conversation stage, advanced by the session rather than
/// inferred from text — greeting/appAction/endCall are driven by state
/// machine transitions the engine has no visibility into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Greeting,
    Conversation,
    AppAction,
    EndCall,
}

/// A full voice-adaptation decision: TTS parameters plus the current stage.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceAdaptationDecision {
    pub params: TtsParams,
    pub stage: Stage,
}

// ── Engine ──────────────────────────────────────────────────────────

/// Per-session engine: rate-limits updates and mirrors a moving average
/// of recent decisions so parameters don't swing turn to turn.
pub struct VoiceAdaptationEngine {
    config: VoiceAdaptationConfig,
    history: VecDeque<TtsParams>,
    last_update: Option<Instant>,
    stage: Stage,
}

impl VoiceAdaptationEngine {
    pub fn new(config: VoiceAdaptationConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            last_update: None,
            stage: Stage::default(),
        }
    }

    pub fn current_stage(&self) -> Stage {
        self.stage
    }

    /// The last-applied parameters, or the default vector before the
    /// first decision. Used by the session when [`Self::evaluate`]
    /// returns `None` (disabled, or rate-limited) so a skipped decision
    /// still coalesces into "keep what we had" rather than resetting.
    pub fn current_params(&self) -> TtsParams {
        self.history.back().cloned().unwrap_or_default()
    }

    /// Advance the conversation stage. Driven by the session, not by text.
    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Evaluate the next decision for `utterance`.
    ///
    /// Returns `None` when the engine is disabled or a previous update
    /// landed within `rate_limit_seconds` — a skipped decision simply
    /// coalesces into the next allowed one rather than queuing. The
    /// session keeps using its last-applied parameters in that case.
    pub fn evaluate(&mut self, utterance: &str, now: Instant) -> Option<VoiceAdaptationDecision> {
        if !self.config.enabled {
            return None;
        }
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last).as_secs_f64() < self.config.rate_limit_seconds {
                return None;
            }
        }

        let raw = self.compute_raw(utterance);
        let blended = self.blend_with_history(raw);
        self.push_history(blended.clone());
        self.last_update = Some(now);

        Some(VoiceAdaptationDecision {
            params: blended,
            stage: self.stage,
        })
    }

    fn compute_raw(&self, utterance: &str) -> TtsParams {
        let sentiment = classify_sentiment(utterance);
        let urgency = score_urgency(utterance);
        let complexity = score_complexity(utterance);

        let mut speed = 1.0;
        speed += urgency * 0.3;
        speed -= complexity * 0.2;
        speed += match sentiment {
            Sentiment::Negative => -0.15,
            Sentiment::Positive => 0.05,
            Sentiment::Neutral => 0.0,
        };
        let speed = speed.clamp(0.7, 1.4);

        let mut emotions = Vec::new();
        match sentiment {
            Sentiment::Positive => emotions.push(EmotionParam {
                kind: "warmth".into(),
                intensity: 0.6,
            }),
            Sentiment::Negative => emotions.push(EmotionParam {
                kind: "empathy".into(),
                intensity: 0.7,
            }),
            Sentiment::Neutral => {}
        }
        if urgency > 0.5 {
            emotions.push(EmotionParam {
                kind: "urgency".into(),
                intensity: urgency.min(1.0),
            });
        }

        let pre_speech_delay_ms = if complexity > 0.6 { 250 } else { 0 };

        TtsParams {
            speed,
            emotions,
            pre_speech_delay_ms,
        }
    }

    /// Blend `new_params` 30/70 toward a moving average of recent history.
    /// Emotions aren't numerically blendable, so the newest decision's
    /// emotion vector wins outright.
    fn blend_with_history(&self, new_params: TtsParams) -> TtsParams {
        let Some(avg) = self.history_average() else {
            return new_params;
        };
        TtsParams {
            speed: avg.speed * 0.7 + new_params.speed * 0.3,
            emotions: new_params.emotions,
            pre_speech_delay_ms: (avg.pre_speech_delay_ms as f64 * 0.7
                + new_params.pre_speech_delay_ms as f64 * 0.3) as u64,
        }
    }

    fn history_average(&self) -> Option<TtsParams> {
        if self.history.is_empty() {
            return None;
        }
        let count = self.history.len() as f64;
        let speed = self.history.iter().map(|p| p.speed).sum::<f64>() / count;
        let pre_speech_delay_ms = (self
            .history
            .iter()
            .map(|p| p.pre_speech_delay_ms as f64)
            .sum::<f64>()
            / count) as u64;
        Some(TtsParams {
            speed,
            emotions: Vec::new(),
            pre_speech_delay_ms,
        })
    }

    fn push_history(&mut self, params: TtsParams) {
        if self.history.len() >= self.config.memory_limit {
            self.history.pop_front();
        }
        self.history.push_back(params);
    }
}
