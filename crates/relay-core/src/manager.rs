//! The `LlmManager` façade: the one entry point applications use.

use crate::config::{ManagerConfig, ManagerConfigUpdate, RelayConfig, SharedConfig};
use crate::error::ConfigError;
use crate::execution::ExecutionService;
use crate::registry::ProviderRegistry;
use crate::streaming::StreamingService;
use futures::FutureExt;
use relay_provider::{
    ChunkStream, CompletionOptions, LlmError, LlmRequest, LlmResponse, ModelInfo, Provider,
    ProviderStatus, StreamCallbacks,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const MANAGER: &str = "manager";

/// Lifecycle stage of a [`LlmManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No providers registered.
    Unconfigured,
    /// Providers registered but none active.
    HasProviders,
    /// Requests can be served.
    HasActiveProvider,
}

/// Composes the registry and the execution and streaming services behind
/// one API. Construct one per process and share it by reference.
pub struct LlmManager {
    registry: Arc<ProviderRegistry>,
    execution: ExecutionService,
    streaming: StreamingService,
    config: SharedConfig,
}

impl Default for LlmManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let registry = Arc::new(ProviderRegistry::new());
        let config = SharedConfig::new(config);
        Self {
            execution: ExecutionService::new(Arc::clone(&registry), config.clone()),
            streaming: StreamingService::new(Arc::clone(&registry), config.clone()),
            registry,
            config,
        }
    }

    /// Build a manager from persisted configuration.
    ///
    /// Providers that cannot be constructed are an error. Providers that
    /// fail to initialize are logged and skipped, so one unreachable
    /// backend does not prevent the others from serving.
    pub async fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let manager = Self::with_config(config.manager.into());

        for entry in &config.providers {
            let provider = entry.build()?;
            if let Err(e) = manager.register_provider(provider).await {
                tracing::warn!(provider = %entry.id, error = %e, "skipping provider");
            }
        }

        if let Some(ref id) = config.active {
            if let Err(e) = manager.set_active_provider(id).await {
                tracing::warn!(provider = %id, error = %e, "configured active provider unavailable");
            }
        }
        if let Some(ref id) = config.fallback {
            if let Err(e) = manager.set_fallback_provider(id).await {
                tracing::warn!(provider = %id, error = %e, "configured fallback provider unavailable");
            }
        }
        Ok(manager)
    }

    pub async fn state(&self) -> ManagerState {
        if self.registry.is_empty().await {
            ManagerState::Unconfigured
        } else if self.registry.active_id().await.is_none() {
            ManagerState::HasProviders
        } else {
            ManagerState::HasActiveProvider
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub async fn chat(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.ensure_active().await?;
        self.execution
            .run("chat", move |provider| {
                let request = request.clone();
                async move { provider.chat(request).await }.boxed()
            })
            .await
    }

    pub async fn complete(
        &self,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.ensure_active().await?;
        let prompt = prompt.to_string();
        self.execution
            .run("complete", move |provider| {
                let prompt = prompt.clone();
                let options = options.clone();
                async move { provider.complete(&prompt, options).await }.boxed()
            })
            .await
    }

    pub async fn stream(&self, request: LlmRequest) -> Result<ChunkStream, LlmError> {
        self.ensure_active().await?;
        self.streaming.stream(request).await
    }

    pub async fn stream_with_callbacks(
        &self,
        request: LlmRequest,
        mut callbacks: StreamCallbacks,
    ) -> Result<LlmResponse, LlmError> {
        if let Err(err) = self.ensure_active().await {
            callbacks.report_error(&err);
            return Err(err);
        }
        self.streaming.stream_with_callbacks(request, callbacks).await
    }

    pub async fn register_provider(&self, provider: Arc<dyn Provider>) -> Result<(), LlmError> {
        self.registry.register(provider).await
    }

    pub async fn unregister_provider(&self, id: &str) -> Result<(), LlmError> {
        self.registry.unregister(id).await
    }

    pub async fn set_active_provider(&self, id: &str) -> Result<(), LlmError> {
        self.registry.set_active(id).await
    }

    pub async fn set_fallback_provider(&self, id: &str) -> Result<(), LlmError> {
        self.registry.set_fallback(id).await
    }

    pub async fn clear_fallback_provider(&self) {
        self.registry.clear_fallback().await;
    }

    pub async fn active_provider_id(&self) -> Option<String> {
        self.registry.active_id().await
    }

    pub async fn get_all_provider_statuses(&self) -> BTreeMap<String, ProviderStatus> {
        self.registry.all_statuses().await
    }

    pub async fn get_all_models(&self) -> BTreeMap<String, Vec<ModelInfo>> {
        self.registry.all_models().await
    }

    pub fn configure(&self, update: ManagerConfigUpdate) {
        self.config.update(update);
        tracing::debug!(config = ?self.config.get(), "manager reconfigured");
    }

    pub fn config(&self) -> ManagerConfig {
        self.config.get()
    }

    /// Unregister every provider and restore the default configuration.
    pub async fn cleanup(&self) {
        for id in self.registry.ids().await {
            if let Err(e) = self.registry.unregister(&id).await {
                tracing::warn!(provider = %id, error = %e, "unregister during cleanup failed");
            }
        }
        self.config.set(ManagerConfig::default());
    }

    async fn ensure_active(&self) -> Result<(), LlmError> {
        match self.registry.active_id().await {
            Some(_) => Ok(()),
            None => Err(LlmError::unknown(MANAGER, "no active provider configured")),
        }
    }
}
