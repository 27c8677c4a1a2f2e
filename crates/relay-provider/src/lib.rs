//! relay-provider: LLM provider abstraction, wire parsers, and transport.

pub mod base;
pub mod buffer;
pub mod callbacks;
mod error;
pub mod ndjson;
pub mod providers;
pub mod retry;
pub mod sse;
pub mod traits;
pub mod transport;
pub mod types;

pub use base::{ProviderBase, SettingsUpdate};
pub use buffer::{merge_stream_chunks, CoalescingBuffer, DEFAULT_COALESCE_WINDOW};
pub use callbacks::StreamCallbacks;
pub use error::{BoxError, ErrorKind, LlmError};
pub use ndjson::{parse_line_records, LineBuffer};
pub use providers::{OllamaProvider, OpenAiCompatProvider};
pub use retry::{retry_operation, RetryPolicy};
pub use sse::{parse_framed_events, FrameBuffer, SseEvent};
pub use traits::{ChunkStream, Provider};
pub use transport::{with_timeout, HttpRequest, HttpTransport, TextStream, Transport};
pub use types::{
    ChatMessage, ChunkMetadata, CompletionOptions, FinishReason, LlmRequest, LlmResponse,
    ModelInfo, ProviderConfig, ProviderFeatures, ProviderSettings, ProviderStatus,
    ResponseMetadata, Role, StreamChunk, TokenUsage,
};

pub use tokio_util::sync::CancellationToken;
