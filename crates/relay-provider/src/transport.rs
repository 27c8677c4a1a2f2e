//! HTTP transport.
//!
//! [`Transport`] is the seam providers talk through; [`HttpTransport`] is the
//! reqwest-backed implementation. Every failure comes back as an
//! [`LlmError`] tagged with the owning provider's id.

use crate::error::LlmError;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use pin_project::{pin_project, pinned_drop};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

/// Incrementally decoded response text.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A transport-agnostic description of one HTTP call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Whole-request deadline enforced by the transport, if any.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add `Authorization: Bearer` when a key is present.
    #[must_use]
    pub fn with_bearer(self, api_key: Option<&str>) -> Self {
        match api_key {
            Some(key) if !key.is_empty() => self.with_header("Authorization", format!("Bearer {key}")),
            _ => self,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Executes HTTP calls on behalf of one provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single-shot call and return the full body.
    async fn send(&self, request: HttpRequest) -> Result<String, LlmError>;

    /// Open a streaming call and return its body as decoded text fragments.
    ///
    /// The returned stream releases the underlying reader when it ends or
    /// is dropped.
    async fn open_stream(&self, request: HttpRequest) -> Result<TextStream, LlmError>;
}

// Compile-time check: Transport must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Transport) {}
};

/// Send `request` and decode the body as JSON.
///
/// A body that fails to decode is `UNKNOWN` and not retryable.
pub async fn request_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    provider: &str,
    request: HttpRequest,
) -> Result<T, LlmError> {
    let body = transport.send(request).await?;
    serde_json::from_str(&body).map_err(|e| {
        LlmError::unknown(provider, format!("failed to decode response body: {e}")).with_source(e)
    })
}

/// Race `future` against a deadline.
///
/// On expiry the future is dropped and a `TIMEOUT` error tagged with
/// `provider` is returned; a late result is discarded.
pub async fn with_timeout<T, F>(duration: Duration, provider: &str, future: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(provider, timeout_ms = duration.as_millis() as u64, "operation timed out");
            Err(LlmError::timeout(provider, duration))
        }
    }
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    provider: String,
}

impl HttpTransport {
    /// Create a transport for the provider with the given id.
    pub fn new(provider: impl Into<String>) -> Result<Self, LlmError> {
        let provider = provider.into();
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                LlmError::unknown(&provider, format!("failed to create HTTP client: {e}"))
                    .with_source(e)
            })?;
        Ok(Self { client, provider })
    }

    /// Create a transport around an existing client.
    pub fn with_client(provider: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            provider: provider.into(),
        }
    }

    async fn execute(&self, request: HttpRequest) -> Result<reqwest::Response, LlmError> {
        tracing::debug!(provider = %self.provider, method = %request.method, url = %request.url, "sending request");

        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| self.map_network_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(&self.provider, status.as_u16(), &body));
        }
        Ok(response)
    }

    fn map_network_error(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::new(
                crate::error::ErrorKind::Timeout,
                &self.provider,
                format!("request timed out: {error}"),
            )
            .with_source(error)
        } else {
            LlmError::connection_failed(&self.provider, format!("request failed: {error}"))
                .with_source(error)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<String, LlmError> {
        let response = self.execute(request).await?;
        response.text().await.map_err(|e| {
            LlmError::connection_failed(&self.provider, format!("failed to read response body: {e}"))
                .with_source(e)
        })
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<TextStream, LlmError> {
        let response = self.execute(request).await?;
        let provider = self.provider.clone();
        let text = decode_body(provider.clone(), response.bytes_stream());
        let guarded = GuardedStream::new(text, move || {
            tracing::debug!(provider = %provider, "stream reader released");
        });
        Ok(guarded.boxed())
    }
}

/// Turn a byte stream into UTF-8 text fragments.
///
/// Read failures become retryable `CONNECTION_FAILED` errors and end the
/// stream.
pub fn decode_body<S, B, E>(
    provider: String,
    bytes: S,
) -> impl Stream<Item = Result<String, LlmError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    try_stream! {
        let mut decoder = Utf8Decoder::default();
        let mut bytes = std::pin::pin!(bytes);
        while let Some(next) = bytes.next().await {
            let chunk = next.map_err(|e| {
                LlmError::connection_failed(&provider, format!("stream read failed: {e}"))
                    .with_source(e)
            })?;
            let text = decoder.decode(chunk.as_ref());
            if !text.is_empty() {
                yield text;
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            yield rest;
        }
    }
}

/// Incremental UTF-8 decoder that carries a split multi-byte sequence over
/// to the next read. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `bytes` (plus any carried tail) as is complete.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }

    /// Flush a dangling partial sequence at end of input.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Stream wrapper that runs a release hook exactly once: when the inner
/// stream is exhausted or when the wrapper is dropped, whichever is first.
#[pin_project(PinnedDrop)]
pub struct GuardedStream<S> {
    #[pin]
    inner: S,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<S> GuardedStream<S> {
    pub fn new(inner: S, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner,
            release: Some(Box::new(release)),
        }
    }
}

impl<S: Stream> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let next = ready!(this.inner.poll_next(cx));
        if next.is_none() {
            if let Some(release) = this.release.take() {
                release();
            }
        }
        Poll::Ready(next)
    }
}

#[pinned_drop]
impl<S> PinnedDrop for GuardedStream<S> {
    fn drop(self: Pin<&mut Self>) {
        if let Some(release) = self.project().release.take() {
            release();
        }
    }
}
