use relay_core::LlmManager;
use relay_provider::LlmRequest;

/// Run a single-shot chat and print the answer.
pub async fn run(manager: &LlmManager, request: LlmRequest, json: bool) -> anyhow::Result<()> {
    let response = manager.chat(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.content);
    if let Some(usage) = response.usage {
        tracing::debug!(
            model = %response.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "chat finished"
        );
    }
    Ok(())
}
