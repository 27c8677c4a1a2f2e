//! Single-shot execution with timeout, retry, and one fallback hop.

use crate::config::{ManagerConfig, SharedConfig};
use crate::registry::ProviderRegistry;
use futures::future::BoxFuture;
use relay_provider::{retry_operation, with_timeout, ErrorKind, LlmError, Provider};
use std::sync::Arc;

/// Runs operations against the active provider.
pub struct ExecutionService {
    registry: Arc<ProviderRegistry>,
    config: SharedConfig,
}

impl ExecutionService {
    pub fn new(registry: Arc<ProviderRegistry>, config: SharedConfig) -> Self {
        Self { registry, config }
    }

    /// Run `op` against the active provider.
    ///
    /// Each attempt is bounded by the configured timeout and retried under
    /// the configured policy. If that fails and fallback is enabled, `op`
    /// is run once more the same way against the fallback provider. When
    /// both fail the active provider's error is returned.
    pub async fn run<T, F>(&self, label: &str, op: F) -> Result<T, LlmError>
    where
        F: Fn(Arc<dyn Provider>) -> BoxFuture<'static, Result<T, LlmError>> + Send + Sync,
        T: Send,
    {
        let config = self.config.get();
        let active = self.registry.active().await?;

        let err = match attempt(&config, label, &active, &op).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !config.enable_fallback || err.kind == ErrorKind::InvalidRequest {
            return Err(err);
        }
        let Some(fallback) = self.registry.fallback().await else {
            return Err(err);
        };
        if fallback.id() == active.id() {
            return Err(err);
        }

        tracing::warn!(
            operation = label,
            active = %active.id(),
            fallback = %fallback.id(),
            error = %err,
            "active provider failed, trying fallback"
        );
        match attempt(&config, label, &fallback, &op).await {
            Ok(value) => Ok(value),
            Err(fallback_err) => {
                tracing::warn!(
                    operation = label,
                    fallback = %fallback.id(),
                    error = %fallback_err,
                    "fallback provider failed"
                );
                Err(err)
            }
        }
    }
}

async fn attempt<T, F>(
    config: &ManagerConfig,
    label: &str,
    provider: &Arc<dyn Provider>,
    op: &F,
) -> Result<T, LlmError>
where
    F: Fn(Arc<dyn Provider>) -> BoxFuture<'static, Result<T, LlmError>>,
{
    let policy = config.retry_policy();
    let timeout = config.timeout;
    let id = provider.id().to_string();
    retry_operation(&policy, label, || {
        let call = op(Arc::clone(provider));
        let id = id.clone();
        async move { with_timeout(timeout, &id, call).await }
    })
    .await
}
