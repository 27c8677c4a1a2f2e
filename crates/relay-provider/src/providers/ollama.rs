//! Ollama provider.
//!
//! Speaks the native `/api/chat` protocol: one JSON body for single-shot
//! calls, newline-delimited JSON records when streaming.

use crate::base::{ProviderBase, SettingsUpdate};
use crate::error::{ErrorKind, LlmError};
use crate::ndjson::LineBuffer;
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

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A locally running Ollama server.
pub struct OllamaProvider {
    base: ProviderBase,
    transport: Arc<dyn Transport>,
}

impl OllamaProvider {
    /// Provider with id `ollama` talking HTTP to `settings.endpoint`.
    pub fn new(settings: ProviderSettings) -> Result<Self, LlmError> {
        Self::with_id("ollama", settings)
    }

    pub fn with_id(id: impl Into<String>, settings: ProviderSettings) -> Result<Self, LlmError> {
        let id = id.into();
        let transport = HttpTransport::new(id.clone())?;
        Ok(Self::with_transport(id, settings, Arc::new(transport)))
    }

    /// Provider over an arbitrary transport.
    pub fn with_transport(
        id: impl Into<String>,
        settings: ProviderSettings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = ProviderConfig {
            id: id.into(),
            name: "Ollama".to_string(),
            features: ProviderFeatures::default(),
            default_model: DEFAULT_MODEL.to_string(),
        };
        Self {
            base: ProviderBase::new(config, settings),
            transport,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base.settings().base_url())
    }

    fn build_request_body(&self, request: &LlmRequest, model: &str, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .effective_messages()
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        body
    }

    /// A 404 that names a model means the model is not installed.
    fn refine_error(err: LlmError, model: &str) -> LlmError {
        let not_found = err.kind == ErrorKind::Unknown
            && err.message.starts_with("HTTP 404")
            && err.message.to_lowercase().contains("model");
        if not_found {
            LlmError::new(
                ErrorKind::ModelNotFound,
                err.provider.clone(),
                format!("model '{model}' not found: {}", err.message),
            )
            .with_retryable(false)
            .with_source(err)
        } else {
            err
        }
    }

    fn parse_chat_body(&self, body: &str, model: &str) -> Result<LlmResponse, LlmError> {
        let value: Value = serde_json::from_str(body).map_err(|e| {
            self.base
                .error(ErrorKind::Unknown, format!("invalid JSON in chat response: {e}"))
                .with_source(e)
        })?;

        if let Ok(mut record) = serde_json::from_value::<ChatRecord>(value.clone()) {
            if let Some(error) = record.error.take() {
                return Err(self.base.error(ErrorKind::Unknown, error));
            }
            if record.message.is_some() {
                return Ok(record.into_response(self.base.id(), model));
            }
        }

        // Older servers and proxies sometimes answer in a different shape.
        match extract_content(&value) {
            Some(content) => {
                tracing::debug!(provider = %self.base.id(), "chat response recovered by content extraction");
                Ok(LlmResponse {
                    content,
                    model: model.to_string(),
                    usage: None,
                    metadata: Some(ResponseMetadata {
                        provider: Some(self.base.id().to_string()),
                        ..Default::default()
                    }),
                    finish_reason: Some(FinishReason::Stop),
                })
            }
            None => Err(self
                .base
                .error(ErrorKind::Unknown, "chat response has no message content")),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
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
        let request = HttpRequest::get(self.url("/api/version")).with_timeout(HEALTH_CHECK_TIMEOUT);
        let version: VersionResponse = request_json(self.transport.as_ref(), self.id(), request)
            .await
            .map_err(|e| LlmError::initialization(self.id(), e))?;
        tracing::debug!(provider = %self.id(), version = %version.version, "ollama server reachable");
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
        let http = HttpRequest::post(self.url("/api/chat"), body).with_timeout(self.base.settings().timeout);

        let text = self
            .transport
            .send(http)
            .await
            .map_err(|e| Self::refine_error(e, &model))?;
        self.parse_chat_body(&text, &model)
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream, LlmError> {
        self.base.validate_request(&request)?;
        self.base.ensure_initialized(self.initialize()).await?;
        let model = self.base.model_for(&request);
        let body = self.build_request_body(&request, &model, true);
        let http = HttpRequest::post(self.url("/api/chat"), body);

        // Only the open is bounded; the body may stream for as long as it needs.
        let timeout = self.base.settings().timeout;
        let text = with_timeout(timeout, self.id(), self.transport.open_stream(http))
            .await
            .map_err(|e| Self::refine_error(e, &model))?;
        tracing::debug!(provider = %self.id(), model = %model, "stream opened");
        Ok(record_chunks(self.id().to_string(), model, text).boxed())
    }

    async fn is_available(&self) -> bool {
        let request = HttpRequest::get(self.url("/api/version")).with_timeout(HEALTH_CHECK_TIMEOUT);
        with_timeout(HEALTH_CHECK_TIMEOUT, self.id(), self.transport.send(request))
            .await
            .is_ok()
    }

    async fn models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        if let Some(models) = self.base.cached_models() {
            return Ok(models);
        }
        let request = HttpRequest::get(self.url("/api/tags")).with_timeout(self.base.settings().timeout);
        let tags: TagsResponse = request_json(self.transport.as_ref(), self.id(), request).await?;
        let models: Vec<ModelInfo> = tags
            .models
            .into_iter()
            .map(|m| m.into_model_info(self.id()))
            .collect();
        self.base.store_models(models.clone());
        Ok(models)
    }
}

/// Decode a streamed `/api/chat` body into chunks.
///
/// Stops at the first `done` record. If the body ends without one, the
/// unterminated remainder is parsed and a terminal chunk is synthesized.
fn record_chunks(
    provider: String,
    model: String,
    mut text: TextStream,
) -> impl Stream<Item = Result<StreamChunk, LlmError>> + Send + 'static {
    try_stream! {
        let mut lines = LineBuffer::new();
        let mut finished = false;

        'read: while let Some(piece) = text.next().await {
            let piece = piece?;
            for record in lines.push(&piece) {
                if let Some(chunk) = decode_record(&provider, &model, record)? {
                    finished = chunk.done;
                    yield chunk;
                    if finished {
                        break 'read;
                    }
                }
            }
        }

        if !finished {
            for record in lines.finish() {
                if let Some(chunk) = decode_record(&provider, &model, record)? {
                    finished = chunk.done;
                    yield chunk;
                    if finished {
                        break;
                    }
                }
            }
        }

        if !finished {
            tracing::warn!(provider = %provider, "stream ended without a done record");
            yield StreamChunk::finished("", ChunkMetadata {
                model: Some(model.clone()),
                finish_reason: Some(FinishReason::Stop),
                ..Default::default()
            });
        }
    }
}

/// One record of a streamed body. Empty deltas are skipped.
fn decode_record(provider: &str, model: &str, value: Value) -> Result<Option<StreamChunk>, LlmError> {
    let mut record: ChatRecord = match serde_json::from_value(value) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(provider, error = %e, "skipping unrecognized stream record");
            return Ok(None);
        }
    };
    if let Some(error) = record.error.take() {
        return Err(LlmError::unknown(provider, error));
    }

    let content = record
        .message
        .as_ref()
        .map(|m| m.content.clone())
        .unwrap_or_default();
    if record.done {
        return Ok(Some(StreamChunk::finished(content, record.chunk_metadata(model))));
    }
    if content.is_empty() {
        return Ok(None);
    }
    Ok(Some(StreamChunk::delta(content)))
}

/// Best-effort text from a body of unknown shape.
fn extract_content(value: &Value) -> Option<String> {
    value
        .pointer("/message/content")
        .or_else(|| value.get("response"))
        .or_else(|| value.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn nanos_to_millis(nanos: u64) -> u64 {
    nanos / 1_000_000
}

// — Ollama wire types —

#[derive(Debug, Deserialize)]
struct ChatRecord {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl ChatRecord {
    fn usage(&self) -> Option<TokenUsage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(TokenUsage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
        ))
    }

    fn finish_reason(&self) -> FinishReason {
        self.done_reason
            .as_deref()
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Stop)
    }

    fn chunk_metadata(&self, model: &str) -> ChunkMetadata {
        ChunkMetadata {
            model: Some(self.model.clone().unwrap_or_else(|| model.to_string())),
            usage: self.usage(),
            finish_reason: Some(self.finish_reason()),
            processing_time_ms: self.total_duration.map(nanos_to_millis),
        }
    }

    fn into_response(self, provider: &str, model: &str) -> LlmResponse {
        let metadata = ResponseMetadata {
            provider: Some(provider.to_string()),
            processing_time_ms: self.total_duration.map(nanos_to_millis),
            extra: serde_json::Map::new(),
        };
        LlmResponse {
            usage: self.usage(),
            finish_reason: Some(self.finish_reason()),
            model: self.model.clone().unwrap_or_else(|| model.to_string()),
            content: self.message.map(|m| m.content).unwrap_or_default(),
            metadata: Some(metadata),
        }
    }
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct WireMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct TagDetails {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    parameter_size: Option<String>,
    #[serde(default)]
    quantization_level: Option<String>,
}

impl TagModel {
    fn into_model_info(self, provider: &str) -> ModelInfo {
        let details = self.details.unwrap_or_default();
        ModelInfo {
            id: self.model.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            provider: provider.to_string(),
            size: self.size,
            modified_at: self.modified_at,
            family: details.family,
            parameter_size: details.parameter_size,
            quantization_level: details.quantization_level,
        }
    }
}
