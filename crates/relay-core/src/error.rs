//! Error types for the relay-core crate.

use relay_provider::LlmError;

/// Failure while loading, saving, or applying a [`crate::RelayConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A provider entry names an api key variable that is not set
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),

    /// Two provider entries share an id
    #[error("provider '{0}' is configured more than once")]
    DuplicateProvider(String),

    /// `active` or `fallback` names a provider with no entry
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// A provider could not be constructed
    #[error(transparent)]
    Provider(#[from] LlmError),
}
