//! Provider trait definition.

use crate::base::SettingsUpdate;
use crate::callbacks::{drain_stream, StreamCallbacks};
use crate::error::LlmError;
use crate::types::{
    now_millis, CompletionOptions, LlmRequest, LlmResponse, ModelInfo, ProviderConfig,
    ProviderSettings, ProviderStatus, StreamChunk,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Chunks of one streamed answer. Owns its reader; dropping it releases
/// the connection.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, LlmError>>;

/// Number of model names included in a [`ProviderStatus`].
pub const STATUS_MODEL_SAMPLE: usize = 5;

/// Trait for LLM backend implementations.
///
/// Providers translate canonical requests into a backend's wire protocol and
/// normalize its responses. They never retry; that is the caller's policy.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, e.g. `"ollama"`.
    fn id(&self) -> &str;

    fn config(&self) -> &ProviderConfig;

    /// Snapshot of the current runtime settings.
    fn settings(&self) -> ProviderSettings;

    /// Apply a partial settings change.
    fn update_settings(&self, update: SettingsUpdate);

    /// Verify the backend is reachable. Called once when registered.
    async fn initialize(&self) -> Result<(), LlmError>;

    /// Release provider state. Called when unregistered.
    async fn cleanup(&self) -> Result<(), LlmError>;

    /// Send a conversation and wait for the full answer.
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Single-prompt completion.
    async fn complete(
        &self,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.chat(options.into_request(prompt)).await
    }

    /// Open a streamed answer.
    ///
    /// Chunks arrive in backend order; exactly one chunk has `done == true`
    /// and it is the last one.
    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream, LlmError>;

    /// Cheap reachability check, bounded to a few seconds. Never fails.
    async fn is_available(&self) -> bool;

    async fn status(&self) -> ProviderStatus {
        if !self.is_available().await {
            return ProviderStatus::unavailable(format!("{} is not reachable", self.config().name));
        }
        let models = match self.models().await {
            Ok(models) => models
                .into_iter()
                .take(STATUS_MODEL_SAMPLE)
                .map(|m| m.name)
                .collect(),
            Err(e) => {
                tracing::debug!(provider = %self.id(), error = %e, "model listing failed during status check");
                Vec::new()
            }
        };
        ProviderStatus {
            available: true,
            connected: true,
            error: None,
            last_checked: now_millis(),
            models,
        }
    }

    /// Models the backend serves. Cached until the provider is re-initialized.
    async fn models(&self) -> Result<Vec<ModelInfo>, LlmError>;

    /// Drive [`stream`](Self::stream) to completion through callbacks.
    ///
    /// Returns the assembled response, which is also handed to `on_complete`.
    /// A signal that fires before or while the stream opens aborts without
    /// reading anything.
    async fn stream_with_callbacks(
        &self,
        request: LlmRequest,
        callbacks: StreamCallbacks,
    ) -> Result<LlmResponse, LlmError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.settings().default_model)
            .unwrap_or_else(|| self.config().default_model.clone());
        let mut callbacks = callbacks;
        let signal = callbacks.signal().cloned();
        if signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
            let err = LlmError::cancelled(self.id());
            callbacks.report_error(&err);
            return Err(err);
        }

        let opened = match signal {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(LlmError::cancelled(self.id())),
                opened = self.stream(request) => opened,
            },
            None => self.stream(request).await,
        };
        match opened {
            Ok(stream) => drain_stream(self.id(), &model, stream, callbacks).await,
            Err(err) => {
                callbacks.report_error(&err);
                Err(err)
            }
        }
    }
}

// Compile-time check: Provider must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ProviderBase;
    use crate::error::ErrorKind;
    use crate::types::{ChatMessage, ProviderFeatures};
    use futures::stream::{self, StreamExt};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Provider whose stream open either succeeds at once or never completes.
    struct SlowOpen {
        base: ProviderBase,
        hangs: bool,
        opens: AtomicUsize,
    }

    impl SlowOpen {
        fn new(hangs: bool) -> Self {
            Self {
                base: ProviderBase::new(
                    ProviderConfig {
                        id: "slow".to_string(),
                        name: "Slow".to_string(),
                        features: ProviderFeatures::default(),
                        default_model: "slow-model".to_string(),
                    },
                    ProviderSettings::new("http://slow"),
                ),
                hangs,
                opens: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for SlowOpen {
        fn id(&self) -> &str {
            self.base.id()
        }

        fn config(&self) -> &ProviderConfig {
            self.base.config()
        }

        fn settings(&self) -> ProviderSettings {
            self.base.settings()
        }

        fn update_settings(&self, update: SettingsUpdate) {
            self.base.update_settings(update);
        }

        async fn initialize(&self) -> Result<(), LlmError> {
            Ok(())
        }

        async fn cleanup(&self) -> Result<(), LlmError> {
            Ok(())
        }

        async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            Err(LlmError::unknown(self.id(), "not used"))
        }

        async fn stream(&self, _request: LlmRequest) -> Result<ChunkStream, LlmError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.hangs {
                futures::future::pending::<()>().await;
            }
            Ok(stream::iter(vec![Ok(StreamChunk::finished("hi", Default::default()))]).boxed())
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn models(&self) -> Result<Vec<ModelInfo>, LlmError> {
            Ok(Vec::new())
        }
    }

    fn hello() -> LlmRequest {
        LlmRequest::new(vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn test_cancelled_signal_skips_the_open() {
        let provider = SlowOpen::new(false);
        let token = CancellationToken::new();
        token.cancel();
        let reported = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reported);

        let err = provider
            .stream_with_callbacks(
                hello(),
                StreamCallbacks::new()
                    .on_error(move |_| flag.store(true, Ordering::SeqCst))
                    .with_signal(token),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(!err.retryable);
        assert!(reported.load(Ordering::SeqCst));
        assert_eq!(provider.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_interrupts_a_pending_open() {
        let provider = SlowOpen::new(true);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = provider
            .stream_with_callbacks(hello(), StreamCallbacks::new().with_signal(token))
            .await
            .unwrap_err();

        assert!(!err.retryable);
        assert_eq!(err.provider, "slow");
        assert_eq!(provider.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncancelled_signal_streams_normally() {
        let provider = SlowOpen::new(false);
        let response = provider
            .stream_with_callbacks(hello(), StreamCallbacks::new().with_signal(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(response.model, "slow-model");
    }
}
