//! Callback-style consumption of a chunk stream.

use crate::error::LlmError;
use crate::traits::ChunkStream;
use crate::types::{FinishReason, LlmResponse, ResponseMetadata, StreamChunk};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

type ChunkFn = Box<dyn FnMut(&StreamChunk) + Send>;
type ErrorFn = Box<dyn FnMut(&LlmError) + Send>;
type CompleteFn = Box<dyn FnOnce(&LlmResponse) + Send>;

/// Hooks invoked while a stream is drained.
///
/// `on_chunk` sees every chunk in order, `on_error` the failure that ended
/// the stream, `on_complete` the assembled response. An optional
/// [`CancellationToken`] aborts the stream between chunks.
#[derive(Default)]
pub struct StreamCallbacks {
    on_chunk: Option<ChunkFn>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
    signal: Option<CancellationToken>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_chunk(mut self, f: impl FnMut(&StreamChunk) + Send + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(&LlmError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce(&LlmResponse) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }

    pub fn signal(&self) -> Option<&CancellationToken> {
        self.signal.as_ref()
    }

    pub(crate) fn chunk(&mut self, chunk: &StreamChunk) {
        if let Some(f) = self.on_chunk.as_mut() {
            f(chunk);
        }
    }

    /// Hand `err` to `on_error`, for failures raised before draining starts.
    pub fn report_error(&mut self, err: &LlmError) {
        if let Some(f) = self.on_error.as_mut() {
            f(err);
        }
    }

    fn complete(&mut self, response: &LlmResponse) {
        if let Some(f) = self.on_complete.take() {
            f(response);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_chunk", &self.on_chunk.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("signal", &self.signal)
            .finish()
    }
}

/// Drain `stream` through `callbacks` and assemble the full response.
///
/// The token is checked before every read, and a read in progress is
/// abandoned as soon as it fires. Either way the stream is dropped, which
/// releases its reader, and a non-retryable error is reported.
pub async fn drain_stream(
    provider: &str,
    model: &str,
    mut stream: ChunkStream,
    mut callbacks: StreamCallbacks,
) -> Result<LlmResponse, LlmError> {
    let mut content = String::new();
    let mut terminal = None;

    loop {
        if callbacks.is_cancelled() {
            return Err(abort(provider, stream, &mut callbacks));
        }

        let next = match callbacks.signal.clone() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(abort(provider, stream, &mut callbacks));
                }
                next = stream.next() => next,
            },
            None => stream.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                content.push_str(&chunk.content);
                callbacks.chunk(&chunk);
                if chunk.done {
                    terminal = chunk.metadata;
                    break;
                }
            }
            Some(Err(err)) => {
                drop(stream);
                callbacks.report_error(&err);
                return Err(err);
            }
            None => break,
        }
    }
    drop(stream);

    let terminal = terminal.unwrap_or_default();
    let response = LlmResponse {
        content,
        model: terminal.model.unwrap_or_else(|| model.to_string()),
        usage: terminal.usage,
        metadata: Some(ResponseMetadata {
            provider: Some(provider.to_string()),
            processing_time_ms: terminal.processing_time_ms,
            extra: serde_json::Map::new(),
        }),
        finish_reason: Some(terminal.finish_reason.unwrap_or(FinishReason::Stop)),
    };
    callbacks.complete(&response);
    Ok(response)
}

fn abort(provider: &str, stream: ChunkStream, callbacks: &mut StreamCallbacks) -> LlmError {
    drop(stream);
    tracing::debug!(provider, "stream aborted by caller");
    let err = LlmError::cancelled(provider);
    callbacks.report_error(&err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::GuardedStream;
    use crate::types::{ChunkMetadata, TokenUsage};
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn chunks(items: Vec<Result<StreamChunk, LlmError>>) -> ChunkStream {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_done_observed_once_and_last() {
        let metadata = ChunkMetadata {
            usage: Some(TokenUsage::new(3, 4)),
            ..Default::default()
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let response = drain_stream(
            "local",
            "m",
            chunks(vec![
                Ok(StreamChunk::delta("a")),
                Ok(StreamChunk::delta("b")),
                Ok(StreamChunk::delta("c")),
                Ok(StreamChunk::finished("", metadata)),
            ]),
            StreamCallbacks::new().on_chunk(move |c| sink.lock().unwrap().push(c.done)),
        )
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![false, false, false, true]);
        assert_eq!(response.content, "abc");
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(7));
        assert_eq!(response.model, "m");
    }

    #[tokio::test]
    async fn test_error_reaches_on_error_and_not_on_complete() {
        let errors = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let (e, c) = (Arc::clone(&errors), Arc::clone(&completed));

        let result = drain_stream(
            "local",
            "m",
            chunks(vec![
                Ok(StreamChunk::delta("a")),
                Err(LlmError::connection_failed("local", "reset")),
            ]),
            StreamCallbacks::new()
                .on_error(move |_| {
                    e.fetch_add(1, Ordering::SeqCst);
                })
                .on_complete(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await;

        let err = tokio_test::assert_err!(result);
        assert_eq!(err.kind, ErrorKind::ConnectionFailed);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_releases_reader_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let token = CancellationToken::new();
        let trigger = token.clone();

        let inner = stream::iter(vec![Ok(StreamChunk::delta("first"))])
            .chain(stream::pending::<Result<StreamChunk, LlmError>>());
        let guarded = GuardedStream::new(inner, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = drain_stream(
            "local",
            "m",
            guarded.boxed(),
            StreamCallbacks::new()
                .on_chunk(move |_| trigger.cancel())
                .with_signal(token),
        )
        .await;

        let err = tokio_test::assert_err!(result);
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(!err.retryable);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_next_chunk() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let result = drain_stream(
            "local",
            "m",
            stream::pending::<Result<StreamChunk, LlmError>>().boxed(),
            StreamCallbacks::new().with_signal(token),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stream_ending_without_done_still_completes() {
        let result = drain_stream(
            "local",
            "m",
            chunks(vec![Ok(StreamChunk::delta("partial"))]),
            StreamCallbacks::new(),
        )
        .await
        .unwrap();
        assert_eq!(result.content, "partial");
        assert_eq!(result.finish_reason, Some(FinishReason::Stop));
    }
}
