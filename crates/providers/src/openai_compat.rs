//! OpenAI-compatible provider implementation.
//!
//! Works with: Groq, OpenAI, OpenRouter, Ollama, vLLM, Together AI and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Health checks against `/models`

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use turnledger_core::error::ProviderError;
use turnledger_core::message::Message;
use turnledger_core::provider::*;

/// An OpenAI-compatible chat-completions provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // Falls back to a client without the timeout if the builder fails
        // (only possible when the TLS backend cannot initialise).
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create a Groq provider (convenience constructor).
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new("groq", "https://api.groq.com/openai/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Use a preconfigured HTTP client (proxies, timeouts, custom roots).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert ledger messages to the chat-completions wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role().as_str().into(),
                content: Some(m.content().to_string()),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        check_status(response).await
    }
}

/// Map non-success HTTP statuses onto provider errors.
async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !response.status().is_success() {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, messages = request.messages.len(), "Sending completion request");

        let response = self.post(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let usage = api_response.usage.map(Usage::from);

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: api_response.model,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(forward_sse(response.bytes_stream(), tx, provider_name));

        Ok(rx)
    }
}

/// Read an SSE byte stream and forward its chunks to `tx` until `[DONE]`,
/// a transport error, or the receiver going away.
///
/// Bytes are buffered until a full line has arrived, so a multi-byte
/// character split across network reads is decoded intact. A stream that
/// ends before the final chunk is reported as interrupted.
async fn forward_sse<S, B, E>(
    bytes: S,
    tx: tokio::sync::mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
    provider_name: String,
) where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk_result) = bytes.next().await {
        match chunk_result {
            Ok(chunk) => buffer.extend_from_slice(chunk.as_ref()),
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        }

        // Process complete lines
        while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            match parse_sse_line(line) {
                SseEvent::Skip => {}
                SseEvent::Unparseable(error) => {
                    trace!(
                        provider = %provider_name,
                        line = %line,
                        error = %error,
                        "Ignoring unparseable SSE chunk"
                    );
                }
                SseEvent::Chunk(chunk) => {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() || done {
                        return; // receiver dropped or stream finished
                    }
                }
            }
        }
    }

    warn!(provider = %provider_name, "Stream ended without [DONE]");
    let _ = tx
        .send(Err(ProviderError::StreamInterrupted(
            "stream ended without [DONE]".into(),
        )))
        .await;
}

/// What a single SSE line means for the consumer.
#[derive(Debug)]
enum SseEvent {
    /// Blank line, comment, non-data field, or a delta without content.
    Skip,
    /// Data that did not decode as a stream response.
    Unparseable(String),
    Chunk(StreamChunk),
}

/// Interpret one line of a chat-completions SSE stream.
fn parse_sse_line(line: &str) -> SseEvent {
    if line.is_empty() || line.starts_with(':') {
        return SseEvent::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();

    // "[DONE]" signals end of stream
    if data == "[DONE]" {
        return SseEvent::Chunk(StreamChunk { done: true, ..StreamChunk::default() });
    }

    let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => resp,
        Err(e) => return SseEvent::Unparseable(e.to_string()),
    };

    // Usage arrives in the final chunk when stream_options.include_usage is set
    if let Some(usage) = stream_resp.usage {
        let content = stream_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty());
        return SseEvent::Chunk(StreamChunk {
            content,
            done: true,
            usage: Some(usage.into()),
        });
    }

    match stream_resp.choices.into_iter().next() {
        Some(choice) => {
            let has_content = choice.delta.content.as_ref().is_some_and(|c| !c.is_empty());
            if has_content || choice.finish_reason.is_some() {
                SseEvent::Chunk(StreamChunk {
                    content: choice.delta.content,
                    done: false,
                    usage: None,
                })
            } else {
                SseEvent::Skip
            }
        }
        None => SseEvent::Skip,
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnledger_core::Ledger;

    #[test]
    fn groq_constructor() {
        let provider = OpenAiCompatProvider::groq("gsk-test");
        assert_eq!(provider.name(), "groq");
        assert!(provider.base_url().contains("api.groq.com"));
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url().contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider = OpenAiCompatProvider::new("custom", "http://localhost:8000/v1/", "");
        assert_eq!(provider.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion() {
        let mut ledger = Ledger::with_system("You are helpful", 2).unwrap();
        ledger.append_user("Hello").unwrap();
        ledger.append_assistant("Hi there").unwrap();

        let api_messages = OpenAiCompatProvider::to_api_messages(ledger.snapshot());
        assert_eq!(api_messages.len(), 3);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
        assert_eq!(api_messages[2].role, "assistant");
        assert_eq!(api_messages[2].content.as_deref(), Some("Hi there"));
    }

    #[test]
    fn request_body_shape() {
        let mut ledger = Ledger::new(2).unwrap();
        ledger.append_user("Hello").unwrap();
        let request = ProviderRequest::new("llama-3.1-8b-instant", ledger.snapshot())
            .with_max_tokens(Some(128));

        let body = OpenAiCompatProvider::request_body(&request, false);
        assert_eq!(body["model"], "llama-3.1-8b-instant");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello");
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());

        let streaming = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(streaming["stream"], true);
        assert_eq!(streaming["stream_options"]["include_usage"], true);
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        match parse_sse_line(line) {
            SseEvent::Chunk(chunk) => {
                assert_eq!(chunk.content.as_deref(), Some("Hello"));
                assert!(!chunk.done);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn parse_stream_done_marker() {
        match parse_sse_line("data: [DONE]") {
            SseEvent::Chunk(chunk) => {
                assert!(chunk.done);
                assert!(chunk.content.is_none());
            }
            other => panic!("expected done chunk, got {other:?}"),
        }
    }

    #[test]
    fn parse_stream_usage_chunk_is_final() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        match parse_sse_line(line) {
            SseEvent::Chunk(chunk) => {
                assert!(chunk.done);
                assert_eq!(chunk.usage.unwrap().total_tokens, 15);
            }
            other => panic!("expected usage chunk, got {other:?}"),
        }
    }

    #[test]
    fn parse_stream_skips_noise() {
        assert!(matches!(parse_sse_line(""), SseEvent::Skip));
        assert!(matches!(parse_sse_line(": keep-alive"), SseEvent::Skip));
        assert!(matches!(parse_sse_line("event: ping"), SseEvent::Skip));
        assert!(matches!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseEvent::Skip
        ));
        assert!(matches!(
            parse_sse_line("data: {not json"),
            SseEvent::Unparseable(_)
        ));
    }

    #[test]
    fn parse_full_response() {
        let data = r#"{
            "model": "llama-3.1-8b-instant",
            "choices": [{"message": {"role": "assistant", "content": "Hola"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.model, "llama-3.1-8b-instant");
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hola"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    // --- Stream reader tests ---

    const CAFE_SSE: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"¿café?\"},\"finish_reason\":null}]}\n\n",
        "data: [DONE]\n\n",
    );

    /// Split `body` right after the first byte of its first multi-byte character.
    fn split_mid_char(body: &str) -> (Vec<u8>, Vec<u8>) {
        let bytes = body.as_bytes();
        let at = bytes.iter().position(|&b| b >= 0xC0).unwrap() + 1;
        (bytes[..at].to_vec(), bytes[at..].to_vec())
    }

    async fn drain(
        mut rx: tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
    ) -> Vec<std::result::Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn reader_keeps_characters_split_across_reads() {
        let (head, tail) = split_mid_char(CAFE_SSE);
        let parts = futures::stream::iter(vec![Ok::<_, String>(head), Ok(tail)]);
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        forward_sse(parts, tx, "test".into()).await;

        let items = drain(rx).await;
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.content.as_deref(), Some("¿café?"));
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn reader_reports_stream_without_done() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"half\"}}]}\n\n";
        let parts = futures::stream::iter(vec![Ok::<_, String>(body.as_bytes().to_vec())]);
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        forward_sse(parts, tx, "test".into()).await;

        let items = drain(rx).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("half"));
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn reader_forwards_transport_errors() {
        let parts = futures::stream::iter(vec![Err::<Vec<u8>, _>("connection reset".to_string())]);
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        forward_sse(parts, tx, "test".into()).await;

        let items = drain(rx).await;
        assert!(matches!(
            items.as_slice(),
            [Err(ProviderError::StreamInterrupted(msg))] if msg == "connection reset"
        ));
    }

    // --- Local HTTP server tests ---

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request (headers plus content-length body).
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map_or(0, |v| v.trim().parse::<usize>().unwrap());
            if buf.len() >= head_end + 4 + body_len {
                return;
            }
        }
    }

    /// Serve a single response, writing `head` and then each body part
    /// separately. Returns the base URL.
    async fn serve_once(status_line: &'static str, parts: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;

            let len: usize = parts.iter().map(Vec::len).sum();
            let head = format!(
                "{status_line}\r\ncontent-type: text/event-stream\r\ncontent-length: {len}\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for part in parts {
                socket.write_all(&part).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        });
        format!("http://{addr}/v1")
    }

    fn local_provider(base_url: &str) -> OpenAiCompatProvider {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        OpenAiCompatProvider::new("local", base_url, "key").with_client(client)
    }

    fn hello_request() -> ProviderRequest {
        let mut ledger = Ledger::new(2).unwrap();
        ledger.append_user("hola").unwrap();
        ProviderRequest::new("m", ledger.snapshot())
    }

    #[tokio::test]
    async fn streamed_reply_survives_split_utf8_over_http() {
        let (head, tail) = split_mid_char(CAFE_SSE);
        let base_url = serve_once("HTTP/1.1 200 OK", vec![head, tail]).await;

        let rx = local_provider(&base_url).stream(hello_request()).await.unwrap();
        let items = drain(rx).await;

        let text: String = items
            .iter()
            .filter_map(|item| item.as_ref().unwrap().content.clone())
            .collect();
        assert_eq!(text, "¿café?");
        assert!(items.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn non_200_success_status_is_accepted() {
        let base_url = serve_once("HTTP/1.1 203 Non-Authoritative Information", vec![CAFE_SSE.into()]).await;

        let rx = local_provider(&base_url).stream(hello_request()).await.unwrap();
        let items = drain(rx).await;
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("¿café?"));
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let base_url = serve_once("HTTP/1.1 500 Internal Server Error", vec![b"boom".to_vec()]).await;

        let err = local_provider(&base_url).stream(hello_request()).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::ApiError { status_code: 500, ref message } if message == "boom"
        ));
    }
}
