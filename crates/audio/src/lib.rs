//! STT / TTS / VAD port adapters.
//!
//! Each provider client implements one of the three narrow streaming
//! traits below instead of a concrete SDK binding, the same shape
//! `va_providers::traits::LlmProvider` gives the LLM half of the port. A
//! session opens a stream, pushes or reads frames until the call ends,
//! then drops its handle to close it.
//!
//! PCM frames are raw `Vec<u8>` (the session and the room transport agree
//! on sample rate/encoding out of band; this crate is format-agnostic).

pub mod stt;
pub mod stub;
pub mod tts;
pub mod vad;

pub use stt::{SttEvent, SttProvider, SttStream};
pub use tts::{EmotionParam, TtsParams, TtsProvider, TtsStream};
pub use vad::{VadEvent, VadProvider, VadStream};
