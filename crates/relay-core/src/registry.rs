//! Provider registry: membership, active/fallback selection, lifecycle.

use futures::future::join_all;
use relay_provider::{LlmError, ModelInfo, Provider, ProviderStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const REGISTRY: &str = "registry";

#[derive(Default)]
struct RegistryState {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    active: Option<String>,
    fallback: Option<String>,
}

/// Registered providers keyed by id.
///
/// Whenever at least one provider is registered exactly one of them is
/// active. Providers are initialized when registered and cleaned up when
/// removed or replaced.
#[derive(Default)]
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize `provider` and add it. The first provider registered
    /// becomes active. Replaces any existing provider with the same id.
    ///
    /// A provider that fails to initialize is not added.
    pub async fn register(&self, provider: Arc<dyn Provider>) -> Result<(), LlmError> {
        let id = provider.id().to_string();
        if let Err(e) = provider.initialize().await {
            tracing::warn!(provider = %id, error = %e, "provider failed to initialize");
            return Err(LlmError::initialization(&id, e));
        }

        let replaced = {
            let mut state = self.state.write().await;
            let replaced = state.providers.insert(id.clone(), provider);
            if state.active.is_none() {
                state.active = Some(id.clone());
            }
            replaced
        };

        if let Some(old) = replaced {
            tracing::debug!(provider = %id, "replacing registered provider");
            if let Err(e) = old.cleanup().await {
                tracing::warn!(provider = %id, error = %e, "cleanup of replaced provider failed");
            }
        }
        tracing::debug!(provider = %id, "provider registered");
        Ok(())
    }

    /// Remove a provider and clean it up. Cleanup failures are logged, not
    /// returned. If it was active, the first remaining id becomes active.
    pub async fn unregister(&self, id: &str) -> Result<(), LlmError> {
        let removed = {
            let mut state = self.state.write().await;
            let Some(removed) = state.providers.remove(id) else {
                return Err(not_registered(id));
            };
            if state.active.as_deref() == Some(id) {
                state.active = state.providers.keys().next().cloned();
                tracing::debug!(removed = %id, active = ?state.active, "active provider reassigned");
            }
            if state.fallback.as_deref() == Some(id) {
                state.fallback = None;
            }
            removed
        };

        if let Err(e) = removed.cleanup().await {
            tracing::warn!(provider = %id, error = %e, "provider cleanup failed");
        }
        tracing::debug!(provider = %id, "provider unregistered");
        Ok(())
    }

    pub async fn set_active(&self, id: &str) -> Result<(), LlmError> {
        let mut state = self.state.write().await;
        if !state.providers.contains_key(id) {
            return Err(not_registered(id));
        }
        state.active = Some(id.to_string());
        Ok(())
    }

    pub async fn set_fallback(&self, id: &str) -> Result<(), LlmError> {
        let mut state = self.state.write().await;
        if !state.providers.contains_key(id) {
            return Err(not_registered(id));
        }
        state.fallback = Some(id.to_string());
        Ok(())
    }

    pub async fn clear_fallback(&self) {
        self.state.write().await.fallback = None;
    }

    /// The active provider. Fails with `UNKNOWN` when none is set.
    pub async fn active(&self) -> Result<Arc<dyn Provider>, LlmError> {
        let state = self.state.read().await;
        state
            .active
            .as_ref()
            .and_then(|id| state.providers.get(id))
            .cloned()
            .ok_or_else(|| LlmError::unknown(REGISTRY, "no active provider"))
    }

    pub async fn active_id(&self) -> Option<String> {
        self.state.read().await.active.clone()
    }

    pub async fn fallback(&self) -> Option<Arc<dyn Provider>> {
        let state = self.state.read().await;
        state
            .fallback
            .as_ref()
            .and_then(|id| state.providers.get(id))
            .cloned()
    }

    pub async fn fallback_id(&self) -> Option<String> {
        self.state.read().await.fallback.clone()
    }

    /// Get a provider by id.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.state.read().await.providers.get(id).cloned()
    }

    /// Registered ids in ascending order.
    pub async fn ids(&self) -> Vec<String> {
        self.state.read().await.providers.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.providers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.providers.is_empty()
    }

    /// Status of every provider, checked concurrently.
    pub async fn all_statuses(&self) -> BTreeMap<String, ProviderStatus> {
        let providers = self.snapshot().await;
        let checks = providers.into_iter().map(|(id, provider)| async move {
            let status = provider.status().await;
            (id, status)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Models of every provider, listed concurrently. A provider whose
    /// listing fails contributes an empty list.
    pub async fn all_models(&self) -> BTreeMap<String, Vec<ModelInfo>> {
        let providers = self.snapshot().await;
        let listings = providers.into_iter().map(|(id, provider)| async move {
            let models = match provider.models().await {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(provider = %id, error = %e, "model listing failed");
                    Vec::new()
                }
            };
            (id, models)
        });
        join_all(listings).await.into_iter().collect()
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn Provider>)> {
        let state = self.state.read().await;
        state
            .providers
            .iter()
            .map(|(id, provider)| (id.clone(), Arc::clone(provider)))
            .collect()
    }
}

fn not_registered(id: &str) -> LlmError {
    LlmError::unknown(REGISTRY, format!("provider '{id}' is not registered"))
}
