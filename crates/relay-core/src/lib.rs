//! relay-core: provider registry, execution policy, and the `LlmManager` façade.

pub mod config;
mod error;
pub mod execution;
pub mod manager;
pub mod registry;
pub mod streaming;

#[cfg(test)]
mod test_support;

pub use config::{
    ConfigStore, ManagerConfig, ManagerConfigUpdate, ManagerSettings, ProviderEntry, ProviderKind,
    RelayConfig, SharedConfig,
};
pub use error::ConfigError;
pub use execution::ExecutionService;
pub use manager::{LlmManager, ManagerState};
pub use registry::ProviderRegistry;
pub use streaming::StreamingService;
