use crate::error::ConfigError;
use relay_provider::providers::{ollama, openai_compat};
use relay_provider::{
    OllamaProvider, OpenAiCompatProvider, Provider, ProviderSettings, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Runtime policy shared by the execution and streaming services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Deadline for each single-shot attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Whether single-shot failures may be re-run on the fallback provider.
    pub enable_fallback: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            enable_fallback: true,
        }
    }
}

impl ManagerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.retry_attempts)
    }

    /// Apply the fields present in `update`.
    pub fn apply(&mut self, update: ManagerConfigUpdate) {
        if let Some(timeout) = update.timeout {
            self.timeout = timeout;
        }
        if let Some(retry_attempts) = update.retry_attempts {
            self.retry_attempts = retry_attempts;
        }
        if let Some(enable_fallback) = update.enable_fallback {
            self.enable_fallback = enable_fallback;
        }
    }
}

/// A partial [`ManagerConfig`] change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerConfigUpdate {
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub enable_fallback: Option<bool>,
}

/// [`ManagerConfig`] shared between services; readers take a copy.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<ManagerConfig>>);

impl SharedConfig {
    pub fn new(config: ManagerConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn get(&self) -> ManagerConfig {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, update: ManagerConfigUpdate) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).apply(update);
    }

    pub fn set(&self, config: ManagerConfig) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

/// Backend protocol of a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    OpenaiCompatible,
}

impl ProviderKind {
    fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Ollama => ollama::DEFAULT_ENDPOINT,
            Self::OpenaiCompatible => openai_compat::DEFAULT_ENDPOINT,
        }
    }
}

/// One provider in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Environment variable holding the api key. The key itself is never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ProviderEntry {
    pub fn ollama() -> Self {
        Self {
            id: "ollama".to_string(),
            kind: ProviderKind::Ollama,
            endpoint: None,
            default_model: None,
            timeout_ms: None,
            api_key_env: None,
        }
    }

    /// Runtime settings for this entry, reading the api key from the
    /// environment.
    pub fn settings(&self) -> Result<ProviderSettings, ConfigError> {
        let endpoint = self
            .endpoint
            .clone()
            .unwrap_or_else(|| self.kind.default_endpoint().to_string());
        let mut settings = ProviderSettings::new(endpoint);
        if let Some(ms) = self.timeout_ms {
            settings = settings.with_timeout(Duration::from_millis(ms));
        }
        if let Some(ref model) = self.default_model {
            settings = settings.with_default_model(model.clone());
        }
        if let Some(ref var) = self.api_key_env {
            let key = std::env::var(var).map_err(|_| ConfigError::MissingApiKey(var.clone()))?;
            settings = settings.with_api_key(key);
        }
        Ok(settings)
    }

    /// Construct the provider. Does not contact the backend.
    pub fn build(&self) -> Result<Arc<dyn Provider>, ConfigError> {
        let settings = self.settings()?;
        let provider: Arc<dyn Provider> = match self.kind {
            ProviderKind::Ollama => Arc::new(OllamaProvider::with_id(self.id.clone(), settings)?),
            ProviderKind::OpenaiCompatible => {
                Arc::new(OpenAiCompatProvider::new(self.id.clone(), settings)?)
            }
        };
        Ok(provider)
    }
}

/// Manager settings as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub enable_fallback: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        let config = ManagerConfig::default();
        Self {
            timeout_ms: config.timeout.as_millis() as u64,
            retry_attempts: config.retry_attempts,
            enable_fallback: config.enable_fallback,
        }
    }
}

impl From<ManagerSettings> for ManagerConfig {
    fn from(settings: ManagerSettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.timeout_ms),
            retry_attempts: settings.retry_attempts,
            enable_fallback: settings.enable_fallback,
        }
    }
}

/// Serialized settings from ~/.relay/config.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub manager: ManagerSettings,
    pub providers: Vec<ProviderEntry>,
    pub active: Option<String>,
    pub fallback: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            manager: ManagerSettings::default(),
            providers: vec![ProviderEntry::ollama()],
            active: Some("ollama".to_string()),
            fallback: None,
        }
    }
}

impl RelayConfig {
    /// Check ids are unique and `active`/`fallback` refer to entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.providers {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::DuplicateProvider(entry.id.clone()));
            }
        }
        for id in [&self.active, &self.fallback].into_iter().flatten() {
            if !seen.contains(id.as_str()) {
                return Err(ConfigError::UnknownProvider(id.clone()));
            }
        }
        Ok(())
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|entry| entry.id == id)
    }
}

/// Helper struct for storing the location to read/write global settings
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".relay");
        path.push("config.json");
        Self { path }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved config. A missing file yields the default; an
    /// unreadable or malformed one is an error.
    pub fn try_load(&self) -> Result<RelayConfig, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RelayConfig::default()),
            Err(e) => return Err(e.into()),
        };
        let config: RelayConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the user's saved config, or fallback to Default
    pub fn load(&self) -> RelayConfig {
        match self.try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unusable config file");
                RelayConfig::default()
            }
        }
    }

    /// Save the config back to disk
    pub fn save(&self, config: &RelayConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let legacy = r#"{
            "providers":[{"id":"local","kind":"ollama","endpoint":"http://gpu-box:11434"}],
            "active":"local"
        }"#;

        let parsed: RelayConfig = serde_json::from_str(legacy).unwrap();
        assert_eq!(parsed.manager, ManagerSettings::default());
        assert_eq!(parsed.providers[0].kind, ProviderKind::Ollama);
        assert!(parsed.fallback.is_none());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_dangling_ids() {
        let mut config = RelayConfig::default();
        config.providers.push(ProviderEntry::ollama());
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateProvider(_))));

        let config = RelayConfig {
            fallback: Some("missing".to_string()),
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::UnknownProvider(id)) if id == "missing"));
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_path(dir.path().join("nested").join("config.json"));
        assert_eq!(store.load(), RelayConfig::default());

        let config = RelayConfig {
            manager: ManagerSettings {
                timeout_ms: 5_000,
                retry_attempts: 1,
                enable_fallback: false,
            },
            providers: vec![
                ProviderEntry::ollama(),
                ProviderEntry {
                    id: "remote".to_string(),
                    kind: ProviderKind::OpenaiCompatible,
                    endpoint: Some("https://api.example.com/v1".to_string()),
                    default_model: Some("gpt-4o-mini".to_string()),
                    timeout_ms: Some(20_000),
                    api_key_env: Some("RELAY_TEST_KEY".to_string()),
                },
            ],
            active: Some("ollama".to_string()),
            fallback: Some("remote".to_string()),
        };
        store.save(&config).unwrap();
        assert_eq!(store.try_load().unwrap(), config);
    }

    #[test]
    fn test_malformed_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::with_path(&path);
        assert!(matches!(store.try_load(), Err(ConfigError::Serialization(_))));
        assert_eq!(store.load(), RelayConfig::default());
    }

    #[test]
    fn test_entry_settings_and_missing_key() {
        let entry = ProviderEntry {
            id: "remote".to_string(),
            kind: ProviderKind::OpenaiCompatible,
            endpoint: None,
            default_model: Some("m".to_string()),
            timeout_ms: Some(1_500),
            api_key_env: Some("RELAY_TEST_UNSET_KEY_VAR".to_string()),
        };
        assert!(matches!(entry.settings(), Err(ConfigError::MissingApiKey(_))));

        let entry = ProviderEntry {
            api_key_env: None,
            ..entry
        };
        let settings = entry.settings().unwrap();
        assert_eq!(settings.endpoint, openai_compat::DEFAULT_ENDPOINT);
        assert_eq!(settings.timeout, Duration::from_millis(1_500));
        assert_eq!(settings.default_model.as_deref(), Some("m"));

        let provider = entry.build().unwrap();
        assert_eq!(provider.id(), "remote");
    }

    #[test]
    fn test_shared_config_update() {
        let shared = SharedConfig::default();
        shared.update(ManagerConfigUpdate {
            retry_attempts: Some(0),
            ..Default::default()
        });
        let config = shared.get();
        assert_eq!(config.retry_attempts, 0);
        assert_eq!(config.retry_policy().max_retries, 0);
        assert!(config.enable_fallback);
    }
}
