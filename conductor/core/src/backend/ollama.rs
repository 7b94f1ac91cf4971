//! Ollama Backend Implementation
//!
//! Talks to a local Ollama server through its chat endpoint:
//! - `/api/chat` - Chat completions with message history (NDJSON when streaming)
//! - `/api/tags` - Reachability probe

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::traits::{LlmBackend, LlmRequest, LlmResponse, StreamingToken};
use crate::config::ChatConfig;

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    host: String,
    port: u16,
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            host: host.into(),
            port,
            http_client,
        }
    }

    /// Create from the chat settings
    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    fn build_body(request: &LlmRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.full_messages(),
            "stream": stream,
        });

        let mut options = serde_json::Map::new();
        if (request.temperature - 0.7).abs() > f32::EPSILON {
            options.insert("temperature".to_string(), json!(request.temperature));
        }
        if request.max_tokens > 0 {
            options.insert("num_predict".to_string(), json!(request.max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        body
    }

    /// Content token of one NDJSON chat line, and whether it was the last
    fn parse_line(line: &str) -> Option<(String, bool)> {
        let data: Value = serde_json::from_str(line).ok()?;
        let token = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let done = data.get("done").and_then(Value::as_bool).unwrap_or(false);
        Some((token, done))
    }

    async fn post(&self, body: &Value) -> anyhow::Result<reqwest::Response> {
        let response = self
            .http_client
            .post(self.chat_url())
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }
        Ok(response)
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new("localhost", 11434)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let response = self.post(&Self::build_body(request, true)).await?;
        let mut stream = response.bytes_stream();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            // Raw bytes, so a character split across chunks decodes whole
            let mut buffer: Vec<u8> = Vec::new();
            let mut full_response = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some((token, done)) = Self::parse_line(line.trim()) else {
                        continue;
                    };
                    if !token.is_empty() {
                        full_response.push_str(&token);
                        if tx.send(StreamingToken::Token(token)).await.is_err() {
                            return;
                        }
                    }
                    if done {
                        let _ = tx
                            .send(StreamingToken::Complete {
                                message: full_response,
                            })
                            .await;
                        return;
                    }
                }
            }

            let _ = tx
                .send(StreamingToken::Complete {
                    message: full_response,
                })
                .await;
        });

        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();
        let data: Value = self
            .post(&Self::build_body(request, false))
            .await?
            .json()
            .await?;

        let content = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tokens_used = data
            .get("eval_count")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            tokens_used,
            duration_ms: u64::try_from(start.elapsed().as_millis()).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatMessage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one HTTP request with a chunked body, one chunk per write
    async fn serve_chunked(chunks: Vec<Vec<u8>>) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0_u8; 4096];
            let head = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let head = text[..split].to_string();
                    let length = head
                        .lines()
                        .find_map(|l| {
                            l.to_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + length {
                        break head;
                    }
                }
            };

            // The client may hang up early, so write failures are ignored
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n",
                )
                .await;
            for data in chunks {
                let mut frame = format!("{:x}\r\n", data.len()).into_bytes();
                frame.extend_from_slice(&data);
                frame.extend_from_slice(b"\r\n");
                let _ = socket.write_all(&frame).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
            head.split_whitespace().nth(1).unwrap_or_default().to_string()
        });

        (port, handle)
    }

    #[test]
    fn test_urls() {
        let backend = OllamaBackend::new("gpu-box", 8080);
        assert_eq!(backend.chat_url(), "http://gpu-box:8080/api/chat");
        assert_eq!(backend.tags_url(), "http://gpu-box:8080/api/tags");
    }

    #[test]
    fn test_body_includes_system_and_options() {
        let request = LlmRequest::chat(vec![ChatMessage::user("Hi")], "llama3.2")
            .with_system("Be brief")
            .with_max_tokens(64);
        let body = OllamaBackend::build_body(&request, true);

        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert_eq!(body["options"]["num_predict"], 64);
        assert!(body["options"].get("temperature").is_none());
    }

    #[test]
    fn test_parse_line() {
        let (token, done) =
            OllamaBackend::parse_line(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#)
                .unwrap();
        assert_eq!(token, "Hel");
        assert!(!done);

        let (token, done) = OllamaBackend::parse_line(r#"{"done":true,"eval_count":12}"#).unwrap();
        assert!(token.is_empty());
        assert!(done);

        assert!(OllamaBackend::parse_line("not json").is_none());
    }

    #[tokio::test]
    async fn test_streaming_keeps_characters_split_across_chunks() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"こんにちは。"},"done":false}"#,
            "\n",
            r#"{"done":true}"#,
            "\n",
        )
        .as_bytes()
        .to_vec();
        let cut = body.windows(3).position(|w| w == "こ".as_bytes()).unwrap() + 1;
        let (port, server) = serve_chunked(vec![body[..cut].to_vec(), body[cut..].to_vec()]).await;

        let backend = OllamaBackend::new("127.0.0.1", port);
        let request = LlmRequest::chat(vec![ChatMessage::user("Hi")], "llama3.2");
        let mut rx = backend.send_streaming(&request).await.unwrap();

        let mut received = String::new();
        let mut completed = None;
        while let Some(token) = rx.recv().await {
            match token {
                StreamingToken::Token(text) => received.push_str(&text),
                StreamingToken::Complete { message } => completed = Some(message),
                StreamingToken::Error(e) => panic!("stream failed: {e}"),
            }
        }

        assert_eq!(received, "こんにちは。");
        assert_eq!(completed.as_deref(), Some("こんにちは。"));
        assert_eq!(server.await.unwrap(), "/api/chat");
    }

    #[tokio::test]
    async fn test_health_check_probes_tags() {
        let (port, server) = serve_chunked(vec![br#"{"models":[]}"#.to_vec()]).await;
        assert!(OllamaBackend::new("127.0.0.1", port).health_check().await);
        assert_eq!(server.await.unwrap(), "/api/tags");

        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);
        assert!(!OllamaBackend::new("127.0.0.1", port).health_check().await);
    }
}
