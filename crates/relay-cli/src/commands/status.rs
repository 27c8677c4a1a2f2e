use relay_core::LlmManager;
use relay_provider::ProviderStatus;

pub async fn run(manager: &LlmManager) {
    let statuses = manager.get_all_provider_statuses().await;
    if statuses.is_empty() {
        println!("No providers available.");
        return;
    }

    let active = manager.active_provider_id().await;
    for (id, status) in &statuses {
        let marker = if active.as_deref() == Some(id.as_str()) { "*" } else { " " };
        println!("{marker} {}", status_line(id, status));
    }
}

fn status_line(id: &str, status: &ProviderStatus) -> String {
    if status.available {
        let models = if status.models.is_empty() {
            "no models".to_string()
        } else {
            status.models.join(", ")
        };
        format!("{id} | available | {models}")
    } else {
        let reason = status.error.as_deref().unwrap_or("unreachable");
        format!("{id} | unavailable | {reason}")
    }
}
