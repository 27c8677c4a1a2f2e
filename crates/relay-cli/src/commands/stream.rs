use relay_core::LlmManager;
use relay_provider::{
    CancellationToken, CoalescingBuffer, LlmRequest, StreamCallbacks, DEFAULT_COALESCE_WINDOW,
};
use std::io::Write;
use std::sync::Arc;

/// Stream an answer to stdout. Ctrl-C stops the stream and keeps what was
/// already printed.
pub async fn run(manager: &LlmManager, request: LlmRequest) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let ctrl_c = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };

    let buffer = Arc::new(CoalescingBuffer::new(DEFAULT_COALESCE_WINDOW, |text| {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }));
    let sink = Arc::clone(&buffer);
    let callbacks = StreamCallbacks::new()
        .on_chunk(move |chunk| sink.add(&chunk.content))
        .with_signal(token.clone());

    let result = manager.stream_with_callbacks(request, callbacks).await;
    ctrl_c.abort();
    buffer.flush();
    println!();

    match result {
        Ok(response) => {
            tracing::debug!(
                model = %response.model,
                finish_reason = ?response.finish_reason,
                "stream finished"
            );
            Ok(())
        }
        Err(_) if token.is_cancelled() => {
            eprintln!("Stream cancelled.");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
