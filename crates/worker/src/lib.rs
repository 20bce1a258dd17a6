//! Telephony worker process: connects to a room-server control plane,
//! accepts dispatched calls, and drives each one through a Session State
//! Machine against the configured STT/LLM/TTS providers.

pub mod cli;
mod dispatcher;
mod reconnect;
mod transfer;

pub use dispatcher::{WorkerClient, WorkerDeps, WorkerError};
pub use reconnect::ReconnectBackoff;
pub use transfer::ControlPlaneTransferHandler;
