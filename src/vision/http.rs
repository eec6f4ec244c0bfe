//! OpenAI-compatible REST client.
//!
//! Two endpoints are used:
//!
//! * `GET  {base}/models`: cheapest authenticated request; used only to
//!   check the credential.
//! * `POST {base}/chat/completions`: one user turn carrying the instruction
//!   text and the image as a base64 data URL.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx and transport errors are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`, capped at one minute). Attempts are strictly sequential,
//! so a client never has more than one request in flight.

use super::{encode, parse_analysis, parse_prompts, retry_delay, VisionClient};
use crate::config::BatchConfig;
use crate::error::{Img2PromptError, VisionError};
use crate::output::{GeneratedPrompts, ImageAnalysis, UsageCounters};
use crate::prompts::{CLASSIFY_PROMPT, GENERATE_PROMPT};
use crate::queue::RasterImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Every OpenAI secret key starts with this.
pub const API_KEY_PREFIX: &str = "sk-";

/// Reject keys that cannot possibly be valid, without touching the network.
pub fn validate_key_format(key: &str) -> Result<(), VisionError> {
    if key.trim().is_empty() {
        return Err(VisionError::CredentialInvalid {
            reason: "API key is empty".to_string(),
        });
    }
    if !key.starts_with(API_KEY_PREFIX) {
        return Err(VisionError::CredentialInvalid {
            reason: format!("API key must start with \"{API_KEY_PREFIX}\""),
        });
    }
    Ok(())
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<UserMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Extract `error.message` from an OpenAI error body.
fn server_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|e| e.error.message)
        .filter(|m| !m.is_empty())
}

fn network_error(e: reqwest::Error) -> VisionError {
    VisionError::Network {
        detail: e.to_string(),
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Vision client for OpenAI and OpenAI-compatible endpoints.
pub struct HttpVisionClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    classify_max_tokens: usize,
    generate_max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl HttpVisionClient {
    /// Build a client bound to `api_key`. No request is made here.
    pub fn new(api_key: impl Into<String>, config: &BatchConfig) -> Result<Self, Img2PromptError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| Img2PromptError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            classify_max_tokens: config.classify_max_tokens,
            generate_max_tokens: config.generate_max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// Run one completion with retries and return the reply text.
    async fn complete(
        &self,
        instruction: &str,
        image: &RasterImage,
        max_tokens: usize,
        usage: &mut UsageCounters,
    ) -> Result<String, VisionError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![UserMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: instruction },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: encode::data_url(image),
                        },
                    },
                ],
            }],
            max_tokens,
            temperature: self.temperature,
        };

        let mut attempt = 0;
        loop {
            match self.send_completion(&request, usage).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = retry_delay(self.retry_backoff_ms, attempt);
                    warn!(
                        "{} #{}: retry {}/{} after {}ms: {}",
                        image.source.file_name,
                        image.source.index + 1,
                        attempt,
                        self.max_retries,
                        backoff.as_millis(),
                        e
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One POST, no retries. Usage is recorded as soon as a 2xx body parses.
    async fn send_completion(
        &self,
        request: &ChatRequest<'_>,
        usage: &mut UsageCounters,
    ) -> Result<String, VisionError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            return Err(VisionError::Api {
                status: Some(status.as_u16()),
                message: server_message(&body).unwrap_or_else(|| "API call failed".to_string()),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| VisionError::Schema {
            detail: format!("completion envelope: {e}"),
        })?;

        let tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);
        usage.add_tokens(tokens);
        debug!("Completion used {} tokens (run total {})", tokens, usage.tokens);

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::Schema {
                detail: "completion has no message content".to_string(),
            })
    }
}

#[async_trait]
impl VisionClient for HttpVisionClient {
    async fn check_credential(&self) -> Result<(), VisionError> {
        validate_key_format(&self.api_key)?;

        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            debug!("Credential accepted by {}", self.base_url);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = server_message(&body);
        if status.is_client_error() {
            Err(VisionError::CredentialInvalid {
                reason: message.unwrap_or_else(|| "Invalid API key".to_string()),
            })
        } else {
            Err(VisionError::Api {
                status: Some(status.as_u16()),
                message: message.unwrap_or_else(|| "credential check failed".to_string()),
            })
        }
    }

    async fn classify(
        &self,
        image: &RasterImage,
        usage: &mut UsageCounters,
    ) -> Result<ImageAnalysis, VisionError> {
        let reply = self
            .complete(CLASSIFY_PROMPT, image, self.classify_max_tokens, usage)
            .await?;
        parse_analysis(&reply)
    }

    async fn generate(
        &self,
        image: &RasterImage,
        usage: &mut UsageCounters,
    ) -> Result<GeneratedPrompts, VisionError> {
        let reply = self
            .complete(GENERATE_PROMPT, image, self.generate_max_tokens, usage)
            .await?;
        parse_prompts(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ImageRef, ItemId, MediaType};
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve the canned `(status line, body)` responses, one per connection,
    /// and hand back the raw requests that were received.
    async fn fake_server(responses: Vec<(&'static str, String)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v1", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut socket).await);
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            seen
        });

        (base, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client(base: &str, key: &str) -> HttpVisionClient {
        let config = BatchConfig::builder()
            .api_base_url(base)
            .retry_backoff_ms(1)
            .max_retries(1)
            .api_timeout_secs(5)
            .build()
            .unwrap();
        HttpVisionClient::new(key, &config).unwrap()
    }

    fn image() -> RasterImage {
        RasterImage {
            source: ImageRef {
                file_id: ItemId::new(),
                file_name: "cat.png".into(),
                index: 0,
                media_type: MediaType::Png,
            },
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
        }
    }

    fn completion(content: &str, total_tokens: u64) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 2, "total_tokens": total_tokens }
        })
        .to_string()
    }

    #[test]
    fn key_format_rules() {
        assert!(validate_key_format("sk-abc").is_ok());
        assert!(matches!(
            validate_key_format(""),
            Err(VisionError::CredentialInvalid { .. })
        ));
        assert!(matches!(
            validate_key_format("abc"),
            Err(VisionError::CredentialInvalid { .. })
        ));
    }

    #[test]
    fn request_body_matches_wire_format() {
        let request = ChatRequest {
            model: "gpt-4o",
            messages: vec![UserMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "describe" },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AAAA".into(),
                        },
                    },
                ],
            }],
            max_tokens: 500,
            temperature: 0.7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][0]["text"], "describe");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        assert_eq!(json["max_tokens"], 500);
    }

    #[test]
    fn server_message_extraction() {
        assert_eq!(
            server_message(r#"{"error":{"message":"Incorrect API key provided"}}"#).as_deref(),
            Some("Incorrect API key provided")
        );
        assert_eq!(server_message("<html>bad gateway</html>"), None);
    }

    #[tokio::test]
    async fn malformed_key_makes_no_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v1", listener.local_addr().unwrap());

        let err = client(&base, "abc").check_credential().await.unwrap_err();
        assert!(matches!(err, VisionError::CredentialInvalid { .. }));

        let accepted =
            tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err(), "no connection should have been made");
    }

    #[tokio::test]
    async fn credential_accepted_on_2xx() {
        let (base, server) = fake_server(vec![("200 OK", r#"{"data":[]}"#.into())]).await;
        tokio_test::assert_ok!(client(&base, "sk-good").check_credential().await);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /v1/models"));
        assert!(requests[0].to_ascii_lowercase().contains("authorization: bearer sk-good"));
    }

    #[tokio::test]
    async fn credential_rejected_with_server_message() {
        let (base, _server) = fake_server(vec![(
            "401 Unauthorized",
            r#"{"error":{"message":"Incorrect API key provided: sk-bad"}}"#.into(),
        )])
        .await;

        let err = client(&base, "sk-bad").check_credential().await.unwrap_err();
        assert_eq!(
            err,
            VisionError::CredentialInvalid {
                reason: "Incorrect API key provided: sk-bad".into()
            }
        );
    }

    #[tokio::test]
    async fn credential_check_network_failure() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v1", listener.local_addr().unwrap());
        drop(listener);

        let err = client(&base, "sk-any").check_credential().await.unwrap_err();
        assert!(matches!(err, VisionError::Network { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn classify_parses_reply_and_counts_tokens() {
        let reply = r#"{"meaningful": true, "reason": "a cat", "confidence": 0.9, "imageType": "photo"}"#;
        let (base, server) = fake_server(vec![("200 OK", completion(reply, 321))]).await;

        let mut usage = UsageCounters::default();
        let analysis = client(&base, "sk-good")
            .classify(&image(), &mut usage)
            .await
            .unwrap();
        assert!(analysis.meaningful);
        assert_eq!(usage.tokens, 321);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /v1/chat/completions"));
        assert!(requests[0].contains("data:image/png;base64,"));
        assert!(requests[0].contains("\"max_tokens\":500"));
    }

    #[tokio::test]
    async fn schema_error_still_counts_tokens() {
        let (base, _server) = fake_server(vec![("200 OK", completion("not json", 40))]).await;

        let mut usage = UsageCounters::default();
        let err = client(&base, "sk-good")
            .generate(&image(), &mut usage)
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Schema { .. }));
        assert_eq!(usage.tokens, 40);
    }

    #[tokio::test]
    async fn api_error_is_not_retried_for_4xx() {
        let (base, server) = fake_server(vec![(
            "400 Bad Request",
            r#"{"error":{"message":"Invalid image"}}"#.into(),
        )])
        .await;

        let mut usage = UsageCounters::default();
        let err = client(&base, "sk-good")
            .classify(&image(), &mut usage)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VisionError::Api {
                status: Some(400),
                message: "Invalid image".into()
            }
        );
        assert_eq!(usage.tokens, 0);
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let reply = r#"{"imagePrompt":"i","videoPrompt":"v","creativePrompt":"c","tags":[],"style":"s","mood":"m"}"#;
        let (base, server) = fake_server(vec![
            ("429 Too Many Requests", r#"{"error":{"message":"rate_limit"}}"#.into()),
            ("200 OK", completion(reply, 700)),
        ])
        .await;

        let mut usage = UsageCounters::default();
        let prompts = client(&base, "sk-good")
            .generate(&image(), &mut usage)
            .await
            .unwrap();
        assert_eq!(prompts.image_prompt, "i");
        assert_eq!(usage.tokens, 700);

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].contains("\"max_tokens\":800"));
    }
}
