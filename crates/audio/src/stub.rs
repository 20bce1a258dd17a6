//! In-memory stub adapters: no network calls, used by `va-session`'s own
//! tests and by anyone wiring a session up without live provider
//! credentials. Each stub waits for at least one input frame before
//! emitting its scripted events/audio, mirroring a real provider's need
//! for audio before it can produce anything.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use va_domain::config::{SttConfig, TtsConfig, VadConfig};
use va_domain::error::Result;
use va_domain::stream::BoxStream;

use crate::stt::{SttEvent, SttProvider, SttStream};
use crate::tts::{TtsParams, TtsProvider, TtsStream};
use crate::vad::{VadEvent, VadProvider, VadStream};

/// Emits a fixed, pre-configured sequence of [`SttEvent`]s once audio
/// starts arriving.
pub struct StubSttProvider {
    script: Vec<SttEvent>,
}

impl StubSttProvider {
    pub fn new(script: Vec<SttEvent>) -> Self {
        Self { script }
    }

    /// A single `Final` event with the given text, the common case in tests.
    pub fn with_final(text: impl Into<String>) -> Self {
        Self::new(vec![SttEvent::Final { text: text.into() }])
    }
}

#[async_trait]
impl SttProvider for StubSttProvider {
    async fn open(&self, _config: &SttConfig) -> Result<SttStream> {
        let (frame_tx, mut frame_rx) = mpsc::channel(32);
        let script = self.script.clone();
        let events: BoxStream<'static, Result<SttEvent>> = Box::pin(async_stream::stream! {
            if frame_rx.recv().await.is_none() {
                return;
            }
            for event in script {
                yield Ok(event);
            }
        });
        Ok(SttStream {
            frames: frame_tx,
            events,
        })
    }
}

/// Emits a fixed sequence of [`VadEvent`]s once audio starts arriving.
pub struct StubVadProvider {
    script: Vec<VadEvent>,
}

impl StubVadProvider {
    pub fn new(script: Vec<VadEvent>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl VadProvider for StubVadProvider {
    async fn open(&self, _config: &VadConfig) -> Result<VadStream> {
        let (frame_tx, mut frame_rx) = mpsc::channel(32);
        let script = self.script.clone();
        let events: BoxStream<'static, Result<VadEvent>> = Box::pin(async_stream::stream! {
            if frame_rx.recv().await.is_none() {
                return;
            }
            for event in script {
                yield Ok(event);
            }
        });
        Ok(VadStream {
            frames: frame_tx,
            events,
        })
    }
}

/// Buffers the entire input text stream, then yields a single dummy PCM
/// frame whose length is proportional to the buffered text.
pub struct StubTtsProvider;

#[async_trait]
impl TtsProvider for StubTtsProvider {
    async fn synthesize(
        &self,
        mut text: BoxStream<'static, String>,
        _params: &TtsParams,
        _config: &TtsConfig,
    ) -> Result<TtsStream> {
        use futures_core::Stream;
        use std::pin::Pin;
        use std::task::{Context, Poll};

        let mut buffered = String::new();
        while let Some(chunk) = futures_next(&mut text).await {
            buffered.push_str(&chunk);
        }
        let frame = vec![0u8; buffered.len().max(1) * 2];

        let (done_tx, done_rx) = oneshot::channel();
        struct Once(Option<Vec<u8>>, Option<oneshot::Sender<()>>);
        impl Stream for Once {
            type Item = Result<Vec<u8>>;
            fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
                if let Some(frame) = self.0.take() {
                    Poll::Ready(Some(Ok(frame)))
                } else {
                    if let Some(tx) = self.1.take() {
                        let _ = tx.send(());
                    }
                    Poll::Ready(None)
                }
            }
        }

        let frames: BoxStream<'static, Result<Vec<u8>>> =
            Box::pin(Once(Some(frame), Some(done_tx)));
        Ok(TtsStream {
            frames,
            done: done_rx,
        })
    }
}

async fn futures_next<S: futures_core::Stream + Unpin>(s: &mut S) -> Option<S::Item> {
    use futures_core::Stream;
    use std::future::poll_fn;
    use std::pin::Pin;
    poll_fn(|cx| Pin::new(&mut *s).poll_next(cx)).await
}
