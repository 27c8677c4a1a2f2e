//! Scriptable provider double for service tests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use relay_provider::{
    ChunkMetadata, ChunkStream, ErrorKind, LlmError, LlmRequest, LlmResponse, ModelInfo,
    Provider, ProviderBase, ProviderConfig, ProviderFeatures, ProviderSettings, ResponseMetadata,
    SettingsUpdate, StreamChunk,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) struct MockProvider {
    base: ProviderBase,
    reply: String,
    failure: Option<(ErrorKind, bool)>,
    fail_first: AtomicUsize,
    delay: Option<Duration>,
    init_fails: bool,
    available: bool,
    pub chat_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(id: &str) -> Self {
        Self {
            base: ProviderBase::new(
                ProviderConfig {
                    id: id.to_string(),
                    name: format!("Mock {id}"),
                    features: ProviderFeatures::default(),
                    default_model: format!("{id}-model"),
                },
                ProviderSettings::new("http://mock"),
            ),
            reply: format!("reply from {id}"),
            failure: None,
            fail_first: AtomicUsize::new(0),
            delay: None,
            init_fails: false,
            available: true,
            chat_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
        }
    }

    /// Every chat and stream open fails with `kind`.
    pub fn failing(mut self, kind: ErrorKind, retryable: bool) -> Self {
        self.failure = Some((kind, retryable));
        self
    }

    /// The first `n` calls fail with a retryable connection error.
    pub fn fail_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn init_failing(mut self) -> Self {
        self.init_fails = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn chats(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }

    async fn outcome(&self, request: &LlmRequest) -> Result<(), LlmError> {
        self.base.validate_request(request)?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let pending = self.fail_first.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_first.store(pending - 1, Ordering::SeqCst);
            return Err(LlmError::connection_failed(self.base.id(), "transient failure"));
        }
        if let Some((kind, retryable)) = self.failure {
            return Err(self
                .base
                .error(kind, format!("scripted failure from {}", self.base.id()))
                .with_retryable(retryable));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MockProvider {
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
        if self.init_fails {
            return Err(self.base.error(ErrorKind::Unknown, "backend refused handshake"));
        }
        self.base.mark_initialized();
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), LlmError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        self.base.reset();
        Ok(())
    }

    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome(&request).await?;
        Ok(LlmResponse {
            content: self.reply.clone(),
            model: self.base.model_for(&request),
            usage: None,
            metadata: Some(ResponseMetadata {
                provider: Some(self.id().to_string()),
                ..Default::default()
            }),
            finish_reason: None,
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream, LlmError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome(&request).await?;
        let (head, tail) = self.reply.split_at(self.reply.len() / 2);
        let chunks = vec![
            Ok(StreamChunk::delta(head)),
            Ok(StreamChunk::finished(
                tail,
                ChunkMetadata {
                    model: Some(self.base.model_for(&request)),
                    ..Default::default()
                },
            )),
        ];
        Ok(stream::iter(chunks).boxed())
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        if !self.available {
            return Err(LlmError::connection_failed(self.id(), "unreachable"));
        }
        Ok(vec![ModelInfo {
            id: format!("{}-model", self.id()),
            name: format!("{}-model", self.id()),
            provider: self.id().to_string(),
            size: None,
            modified_at: None,
            family: None,
            parameter_size: None,
            quantization_level: None,
        }])
    }
}
