use relay_core::LlmManager;
use relay_provider::ModelInfo;

pub async fn run(manager: &LlmManager) {
    let listings = manager.get_all_models().await;
    if listings.is_empty() {
        println!("No providers available.");
        return;
    }

    for (id, models) in &listings {
        println!("{id} ({}):", models.len());
        for model in models {
            println!("  {}", model_line(model));
        }
    }
}

fn model_line(model: &ModelInfo) -> String {
    let details: Vec<&str> = [
        model.family.as_deref(),
        model.parameter_size.as_deref(),
        model.quantization_level.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();

    if details.is_empty() {
        model.id.clone()
    } else {
        format!("{} [{}]", model.id, details.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            name: id.to_string(),
            provider: "ollama".to_string(),
            size: None,
            modified_at: None,
            family: None,
            parameter_size: None,
            quantization_level: None,
        }
    }

    #[test]
    fn test_model_line_plain() {
        assert_eq!(model_line(&model("gpt-4o-mini")), "gpt-4o-mini");
    }

    #[test]
    fn test_model_line_with_details() {
        let info = ModelInfo {
            family: Some("llama".to_string()),
            parameter_size: Some("3.2B".to_string()),
            quantization_level: Some("Q4_K_M".to_string()),
            ..model("llama3.2:latest")
        };
        assert_eq!(model_line(&info), "llama3.2:latest [llama 3.2B Q4_K_M]");
    }
}
