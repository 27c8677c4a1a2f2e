//! Streaming against the active provider.

use crate::config::SharedConfig;
use crate::registry::ProviderRegistry;
use relay_provider::{
    retry_operation, with_timeout, ChunkStream, LlmError, LlmRequest, LlmResponse,
    StreamCallbacks,
};
use std::sync::Arc;

/// Opens streams on the active provider.
///
/// Only the open is retried, and each open attempt is bounded by the
/// configured timeout. Once chunks have been delivered a failure ends the
/// stream; it never moves to the fallback provider.
pub struct StreamingService {
    registry: Arc<ProviderRegistry>,
    config: SharedConfig,
}

impl StreamingService {
    pub fn new(registry: Arc<ProviderRegistry>, config: SharedConfig) -> Self {
        Self { registry, config }
    }

    pub async fn stream(&self, request: LlmRequest) -> Result<ChunkStream, LlmError> {
        let provider = self.registry.active().await?;
        let config = self.config.get();
        let policy = config.retry_policy();
        tracing::debug!(provider = %provider.id(), "opening stream");
        retry_operation(&policy, "stream", || {
            let provider = Arc::clone(&provider);
            let request = request.clone();
            async move { with_timeout(config.timeout, provider.id(), provider.stream(request)).await }
        })
        .await
    }

    /// Drain a stream from the active provider through `callbacks`.
    pub async fn stream_with_callbacks(
        &self,
        request: LlmRequest,
        mut callbacks: StreamCallbacks,
    ) -> Result<LlmResponse, LlmError> {
        let provider = match self.registry.active().await {
            Ok(provider) => provider,
            Err(err) => {
                callbacks.report_error(&err);
                return Err(err);
            }
        };
        provider.stream_with_callbacks(request, callbacks).await
    }
}
