//! State and checks every provider shares.
//!
//! Concrete providers embed a [`ProviderBase`] and forward to it; nothing
//! here knows about any particular wire protocol.

use crate::error::{ErrorKind, LlmError};
use crate::types::{LlmRequest, ModelInfo, ProviderConfig, ProviderSettings};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A partial settings change; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
    pub default_model: Option<String>,
}

/// Config, mutable settings, initialization flag, and model cache.
#[derive(Debug)]
pub struct ProviderBase {
    config: ProviderConfig,
    settings: Mutex<ProviderSettings>,
    initialized: AtomicBool,
    models: Mutex<Option<Vec<ModelInfo>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProviderBase {
    pub fn new(config: ProviderConfig, settings: ProviderSettings) -> Self {
        Self {
            config,
            settings: Mutex::new(settings),
            initialized: AtomicBool::new(false),
            models: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> ProviderSettings {
        lock(&self.settings).clone()
    }

    /// Apply `update`. A new endpoint or api key drops the initialized flag
    /// and the model cache, since both were learned from the old backend.
    pub fn update_settings(&self, update: SettingsUpdate) {
        let mut settings = lock(&self.settings);
        let mut invalidate = false;

        if let Some(endpoint) = update.endpoint {
            invalidate |= endpoint != settings.endpoint;
            settings.endpoint = endpoint;
        }
        if let Some(api_key) = update.api_key {
            invalidate |= settings.api_key.as_deref() != Some(api_key.as_str());
            settings.api_key = Some(api_key);
        }
        if let Some(timeout) = update.timeout {
            settings.timeout = timeout;
        }
        if let Some(model) = update.default_model {
            settings.default_model = Some(model);
        }
        drop(settings);

        if invalidate {
            tracing::debug!(provider = %self.id(), "settings changed, invalidating provider state");
            self.reset();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Run `initialize` unless the provider is already initialized.
    ///
    /// Providers call this before every request so that a settings change
    /// which dropped the flag re-verifies the new backend first.
    pub async fn ensure_initialized<F>(&self, initialize: F) -> Result<(), LlmError>
    where
        F: Future<Output = Result<(), LlmError>>,
    {
        if self.is_initialized() {
            return Ok(());
        }
        tracing::debug!(provider = %self.id(), "initializing before request");
        initialize.await
    }

    /// Forget initialization and cached models.
    pub fn reset(&self) {
        self.initialized.store(false, Ordering::Release);
        *lock(&self.models) = None;
    }

    /// The cached catalog. An empty listing is never served from cache.
    pub fn cached_models(&self) -> Option<Vec<ModelInfo>> {
        lock(&self.models).clone().filter(|models| !models.is_empty())
    }

    pub fn store_models(&self, models: Vec<ModelInfo>) {
        *lock(&self.models) = Some(models);
    }

    /// Model for `request`: explicit, then the settings override, then the
    /// configured default.
    pub fn model_for(&self, request: &LlmRequest) -> String {
        request
            .model
            .clone()
            .or_else(|| lock(&self.settings).default_model.clone())
            .unwrap_or_else(|| self.config.default_model.clone())
    }

    /// An error tagged with this provider's id.
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> LlmError {
        LlmError::new(kind, self.id(), message)
    }

    /// Reject requests no backend could serve. Never touches the network.
    pub fn validate_request(&self, request: &LlmRequest) -> Result<(), LlmError> {
        if request.messages.is_empty() {
            return Err(LlmError::invalid_request(self.id(), "messages must not be empty"));
        }
        if let Some(temperature) = request.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(LlmError::invalid_request(
                    self.id(),
                    format!("temperature must be between 0 and 2, got {temperature}"),
                ));
            }
        }
        if request.max_tokens == Some(0) {
            return Err(LlmError::invalid_request(self.id(), "max_tokens must be at least 1"));
        }
        if let Some(top_p) = request.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(LlmError::invalid_request(
                    self.id(),
                    format!("top_p must be between 0 and 1, got {top_p}"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ProviderFeatures};
    use std::sync::atomic::AtomicUsize;

    fn base() -> ProviderBase {
        ProviderBase::new(
            ProviderConfig {
                id: "local".to_string(),
                name: "Local".to_string(),
                features: ProviderFeatures::default(),
                default_model: "base-model".to_string(),
            },
            ProviderSettings::new("http://localhost:11434"),
        )
    }

    fn model(id: &str) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            name: id.to_string(),
            provider: "local".to_string(),
            size: None,
            modified_at: None,
            family: None,
            parameter_size: None,
            quantization_level: None,
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let base = base();
        let ok = LlmRequest::new(vec![ChatMessage::user("hi")]);
        assert!(base.validate_request(&ok).is_ok());

        let cases = [
            LlmRequest::new(vec![]),
            ok.clone().with_temperature(2.5),
            ok.clone().with_temperature(-0.1),
            ok.clone().with_max_tokens(0),
            ok.clone().with_top_p(1.5),
        ];
        for request in cases {
            let err = base.validate_request(&request).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidRequest);
            assert!(!err.retryable);
            assert_eq!(err.provider, "local");
        }
    }

    #[test]
    fn test_validate_accepts_bounds() {
        let request = LlmRequest::new(vec![ChatMessage::user("hi")])
            .with_temperature(2.0)
            .with_top_p(0.0)
            .with_max_tokens(1);
        assert!(base().validate_request(&request).is_ok());
    }

    #[test]
    fn test_endpoint_change_invalidates_state() {
        let base = base();
        base.mark_initialized();
        base.store_models(vec![model("a")]);

        base.update_settings(SettingsUpdate {
            endpoint: Some("http://other:11434".to_string()),
            ..Default::default()
        });

        assert!(!base.is_initialized());
        assert!(base.cached_models().is_none());
        assert_eq!(base.settings().endpoint, "http://other:11434");
    }

    #[test]
    fn test_timeout_change_keeps_state() {
        let base = base();
        base.mark_initialized();
        base.store_models(vec![model("a")]);

        base.update_settings(SettingsUpdate {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });

        assert!(base.is_initialized());
        assert_eq!(base.cached_models().map(|m| m.len()), Some(1));
        assert_eq!(base.settings().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_catalog_is_not_cached() {
        let base = base();
        base.store_models(Vec::new());
        assert!(base.cached_models().is_none());

        base.store_models(vec![model("a")]);
        assert_eq!(base.cached_models().map(|m| m.len()), Some(1));
    }

    async fn counted_init(base: &ProviderBase, runs: &AtomicUsize) -> Result<(), LlmError> {
        runs.fetch_add(1, Ordering::SeqCst);
        base.mark_initialized();
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_initialized_runs_once_until_reset() {
        let base = base();
        let runs = AtomicUsize::new(0);

        base.ensure_initialized(counted_init(&base, &runs)).await.unwrap();
        base.ensure_initialized(counted_init(&base, &runs)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        base.update_settings(SettingsUpdate {
            api_key: Some("new-key".to_string()),
            ..Default::default()
        });
        base.ensure_initialized(counted_init(&base, &runs)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ensure_initialized_propagates_failure() {
        let base = base();
        let err = base
            .ensure_initialized(async { Err(LlmError::connection_failed("local", "refused")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionFailed);
        assert!(!base.is_initialized());
    }

    #[test]
    fn test_model_resolution_order() {
        let base = base();
        let request = LlmRequest::new(vec![ChatMessage::user("hi")]);
        assert_eq!(base.model_for(&request), "base-model");

        base.update_settings(SettingsUpdate {
            default_model: Some("override".to_string()),
            ..Default::default()
        });
        assert_eq!(base.model_for(&request), "override");
        assert_eq!(base.model_for(&request.with_model("explicit")), "explicit");
    }
}
