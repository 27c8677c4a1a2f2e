//! Subcommand implementations.

pub mod chat;
pub mod models;
pub mod status;
pub mod stream;

use relay_core::{ConfigStore, LlmManager, RelayConfig};
use relay_provider::{ChatMessage, LlmRequest};

/// Build the manager from the stored config, optionally overriding the
/// active provider.
pub async fn load_manager(
    store: &ConfigStore,
    provider: Option<&str>,
) -> anyhow::Result<LlmManager> {
    let config = store.load();
    let manager = LlmManager::from_config(&config).await?;

    if let Some(id) = provider {
        if config.provider(id).is_none() {
            let known: Vec<&str> = config.providers.iter().map(|p| p.id.as_str()).collect();
            anyhow::bail!("Unknown provider: {id}. Configured: {}", known.join(", "));
        }
        manager
            .set_active_provider(id)
            .await
            .map_err(|e| anyhow::anyhow!("Provider {id} is not available: {e}"))?;
    }

    tracing::debug!(active = ?manager.active_provider_id().await, "manager ready");
    Ok(manager)
}

pub fn build_request(
    prompt: &str,
    system: Option<&str>,
    model: Option<&str>,
    temperature: Option<f32>,
) -> LlmRequest {
    let mut request = LlmRequest::new(vec![ChatMessage::user(prompt)]);
    if let Some(system) = system {
        request = request.with_system_prompt(system);
    }
    if let Some(model) = model {
        request = request.with_model(model);
    }
    if let Some(temperature) = temperature {
        request = request.with_temperature(temperature);
    }
    request
}

/// Write the default config to the store's path.
pub fn init(store: &ConfigStore, force: bool) -> anyhow::Result<()> {
    if store.path().exists() && !force {
        anyhow::bail!(
            "{} already exists. Pass --force to overwrite it.",
            store.path().display()
        );
    }
    store.save(&RelayConfig::default())?;
    println!("Wrote {}", store.path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_provider::Role;

    #[test]
    fn test_build_request_applies_overrides() {
        let request = build_request("hi", Some("be brief"), Some("llama3.2"), Some(0.2));
        assert_eq!(request.model.as_deref(), Some("llama3.2"));
        assert_eq!(request.temperature, Some(0.2));

        let messages = request.effective_messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "hi");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_path(dir.path().join("config.json"));

        init(&store, false).unwrap();
        assert!(init(&store, false).is_err());
        init(&store, true).unwrap();
        assert_eq!(store.try_load().unwrap(), RelayConfig::default());
    }
}
