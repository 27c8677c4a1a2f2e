//! Generic OpenAI-compatible provider.
//!
//! Handles the chat completions API format used by OpenAI, OpenRouter,
//! LM Studio, vLLM, and many other servers. Streams arrive as SSE frames
//! terminated by a `[DONE]` sentinel.

use crate::base::{ProviderBase, SettingsUpdate};
use crate::error::{ErrorKind, LlmError};
use crate::sse::FrameBuffer;
use crate::traits::{ChunkStream, Provider};
use crate::transport::{request_json, with_timeout, HttpRequest, HttpTransport, TextStream, Transport};
use crate::types::{
    ChunkMetadata, FinishReason, LlmRequest, LlmResponse, ModelInfo, ProviderConfig,
    ProviderFeatures, ProviderSettings, ResponseMetadata, StreamChunk, TokenUsage,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A provider that speaks the OpenAI chat completions protocol.
pub struct OpenAiCompatProvider {
    base: ProviderBase,
    transport: Arc<dyn Transport>,
}

impl OpenAiCompatProvider {
    /// Create a provider with the given id talking HTTP to `settings.endpoint`.
    pub fn new(id: impl Into<String>, settings: ProviderSettings) -> Result<Self, LlmError> {
        let id = id.into();
        let transport = HttpTransport::new(id.clone())?;
        Ok(Self::with_transport(id, settings, Arc::new(transport)))
    }

    pub fn with_transport(
        id: impl Into<String>,
        settings: ProviderSettings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = ProviderConfig {
            id: id.into(),
            name: "OpenAI-compatible".to_string(),
            features: ProviderFeatures {
                requires_api_key: true,
                ..ProviderFeatures::default()
            },
            default_model: DEFAULT_MODEL.to_string(),
        };
        Self {
            base: ProviderBase::new(config, settings),
            transport,
        }
    }

    fn request(&self, http: HttpRequest) -> HttpRequest {
        let settings = self.base.settings();
        http.with_bearer(settings.api_key.as_deref())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base.settings().base_url())
    }

    /// Build the JSON request body.
    fn build_request_body(&self, request: &LlmRequest, model: &str, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .effective_messages()
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }

        body
    }

    fn parse_response(&self, body: &str, model: &str) -> Result<LlmResponse, LlmError> {
        let resp: CompletionResponse = serde_json::from_str(body).map_err(|e| {
            self.base
                .error(ErrorKind::Unknown, format!("failed to decode completion: {e}"))
                .with_source(e)
        })?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.base.error(ErrorKind::Unknown, "no choices in response"))?;

        let finish_reason = choice.finish_reason.as_deref().map(FinishReason::parse);
        if finish_reason == Some(FinishReason::ContentFilter) {
            return Err(self
                .base
                .error(ErrorKind::ContentFiltered, "response withheld by content filter")
                .with_retryable(false));
        }

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: resp.model.unwrap_or_else(|| model.to_string()),
            usage: resp.usage.map(WireUsage::into_usage),
            metadata: Some(ResponseMetadata {
                provider: Some(self.base.id().to_string()),
                ..Default::default()
            }),
            finish_reason: Some(finish_reason.unwrap_or(FinishReason::Stop)),
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn config(&self) -> &ProviderConfig {
        self.base.config()
    }

    fn settings(&self) -> ProviderSettings {
        self.base.settings()
    }

    fn update_settings(&self, update: SettingsUpdate) {
        self.base.update_settings(update);
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        let models = self
            .models()
            .await
            .map_err(|e| LlmError::initialization(self.id(), e))?;
        tracing::debug!(provider = %self.id(), models = models.len(), "endpoint reachable");
        self.base.mark_initialized();
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), LlmError> {
        self.base.reset();
        Ok(())
    }

    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.base.validate_request(&request)?;
        self.base.ensure_initialized(self.initialize()).await?;
        let model = self.base.model_for(&request);
        let body = self.build_request_body(&request, &model, false);
        let http = self.request(
            HttpRequest::post(self.url("/chat/completions"), body)
                .with_timeout(self.base.settings().timeout),
        );

        let text = self.transport.send(http).await?;
        self.parse_response(&text, &model)
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream, LlmError> {
        self.base.validate_request(&request)?;
        self.base.ensure_initialized(self.initialize()).await?;
        let model = self.base.model_for(&request);
        let body = self.build_request_body(&request, &model, true);
        let http = self.request(HttpRequest::post(self.url("/chat/completions"), body));

        let timeout = self.base.settings().timeout;
        let text = with_timeout(timeout, self.id(), self.transport.open_stream(http)).await?;
        tracing::debug!(provider = %self.id(), model = %model, "stream opened");
        Ok(event_chunks(self.id().to_string(), model, text).boxed())
    }

    async fn is_available(&self) -> bool {
        let request = self.request(HttpRequest::get(self.url("/models")).with_timeout(HEALTH_CHECK_TIMEOUT));
        with_timeout(HEALTH_CHECK_TIMEOUT, self.id(), self.transport.send(request))
            .await
            .is_ok()
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        if let Some(models) = self.base.cached_models() {
            return Ok(models);
        }
        let request = self.request(
            HttpRequest::get(self.url("/models")).with_timeout(self.base.settings().timeout),
        );
        let list: ModelList = request_json(self.transport.as_ref(), self.id(), request).await?;
        let models: Vec<ModelInfo> = list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
                provider: self.id().to_string(),
                size: None,
                modified_at: m.created.map(|c| c.to_string()),
                family: m.owned_by,
                parameter_size: None,
                quantization_level: None,
            })
            .collect();
        self.base.store_models(models.clone());
        Ok(models)
    }
}

/// Accumulates the terminal metadata of one SSE stream.
struct EventState {
    provider: String,
    model: String,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
    done: bool,
}

impl EventState {
    /// Apply one frame's data and return the content delta it carries.
    fn apply(&mut self, data: &str) -> Result<Option<StreamChunk>, LlmError> {
        if data.trim() == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: WireChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "skipping undecodable event");
                return Ok(None);
            }
        };
        if let Some(error) = chunk.error {
            return Err(LlmError::unknown(&self.provider, error.message));
        }
        if let Some(model) = chunk.model {
            self.model = model;
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into_usage());
        }

        let mut content = String::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                content.push_str(&text);
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(FinishReason::parse(&reason));
            }
        }

        if content.is_empty() {
            Ok(None)
        } else {
            Ok(Some(StreamChunk::delta(content)))
        }
    }

    fn terminal_chunk(&self) -> StreamChunk {
        StreamChunk::finished(
            "",
            ChunkMetadata {
                model: Some(self.model.clone()),
                usage: self.usage,
                finish_reason: Some(self.finish_reason.unwrap_or(FinishReason::Stop)),
                processing_time_ms: None,
            },
        )
    }
}

/// Decode an SSE body into chunks; the terminal chunk carries the
/// accumulated finish reason and usage.
fn event_chunks(
    provider: String,
    model: String,
    mut text: TextStream,
) -> impl Stream<Item = Result<StreamChunk, LlmError>> + Send + 'static {
    try_stream! {
        let mut frames = FrameBuffer::new();
        let mut state = EventState {
            provider,
            model,
            finish_reason: None,
            usage: None,
            done: false,
        };

        'read: while let Some(piece) = text.next().await {
            let piece = piece?;
            for event in frames.push(&piece) {
                if let Some(chunk) = state.apply(&event.data)? {
                    yield chunk;
                }
                if state.done {
                    break 'read;
                }
            }
        }

        if !state.done {
            for event in frames.finish() {
                if let Some(chunk) = state.apply(&event.data)? {
                    yield chunk;
                }
            }
            if !state.done {
                tracing::warn!(provider = %state.provider, "stream ended without [DONE]");
            }
        }

        yield state.terminal_chunk();
    }
}

// — OpenAI wire types —

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl WireUsage {
    fn into_usage(self) -> TokenUsage {
        let mut usage = TokenUsage::new(self.prompt_tokens, self.completion_tokens);
        if let Some(total) = self.total_tokens {
            usage.total_tokens = total;
        }
        usage
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<WireModel>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    #[serde(default)]
    created: Option<u64>,
    #[serde(default)]
    owned_by: Option<String>,
}
