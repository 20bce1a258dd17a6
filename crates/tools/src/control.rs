use va_domain::error::Result;

/// Side effects a built-in tool needs to trigger on the owning session.
///
/// Tool handlers never reach into `va-session` directly — that would
/// create a dependency cycle (the session crate dispatches through this
/// one). Instead the session implements this trait and hands a
/// `Arc<dyn SessionControl>` down through [`crate::ToolContext`].
#[async_trait::async_trait]
pub trait SessionControl: Send + Sync {
    /// Ask the media server to transfer the SIP participant to `transfer_to`.
    async fn transfer_call(&self, transfer_to: &str) -> Result<()>;

    /// Wait for the current TTS utterance to finish, then begin teardown.
    async fn end_call(&self);

    /// Begin teardown immediately; no further TTS is produced.
    async fn mark_answering_machine(&self);
}
