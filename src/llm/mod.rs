//! The LLM boundary.
//!
//! Three services sit behind one `chat` abstraction: the paper relevance
//! scorer, the knowledge extractor, and the narrator. All of them receive a
//! fully serialized context and return text; none of them can change a tier.
//! An absent provider key disables the boundary entirely and the pipeline
//! degrades to templated output.

pub(crate) mod literature;
pub mod narrator;

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::OncoTierError;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const OPENAI_BASE_ENV: &str = "ONCOTIER_OPENAI_BASE";
const LLM_API: &str = "llm";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub json_mode: bool,
}

/// The single seam the rest of the crate talks to. Test doubles implement
/// this; production uses [`OpenAiChatClient`].
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<String, OncoTierError>;
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_request_id() -> String {
    let n = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{}-{n}", std::process::id())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Optional JSONL log of every LLM exchange: one object per line, kind
/// `llm_request`, `llm_response`, or `llm_error`.
#[derive(Debug, Default)]
pub struct DecisionLog {
    file: Option<Mutex<tokio::fs::File>>,
}

impl DecisionLog {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn open(path: &std::path::Path) -> Result<Self, OncoTierError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    async fn record(&self, kind: &str, request_id: &str, payload: serde_json::Value) {
        let Some(file) = &self.file else {
            return;
        };
        let line = serde_json::json!({
            "kind": kind,
            "request_id": request_id,
            "timestamp": now_rfc3339(),
            "payload": payload,
        });
        let mut file = file.lock().await;
        let mut bytes = line.to_string().into_bytes();
        bytes.push(b'\n');
        if let Err(err) = file.write_all(&bytes).await {
            warn!(error = %err, "Failed to append decision log line");
        }
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChatClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: String,
    log: Arc<DecisionLog>,
}

impl OpenAiChatClient {
    /// `None` when no provider key is configured.
    pub fn from_env(log: Arc<DecisionLog>) -> Result<Option<Self>, OncoTierError> {
        let Some(api_key) = crate::config::llm_api_key() else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(OPENAI_BASE, OPENAI_BASE_ENV),
            api_key,
            log,
        }))
    }

    #[cfg(test)]
    fn new_for_test(base: String, api_key: String) -> Result<Self, OncoTierError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key,
            log: Arc::new(DecisionLog::disabled()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

#[derive(Debug, Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl ChatClient for OpenAiChatClient {
    async fn chat(&self, request: ChatRequest) -> Result<String, OncoTierError> {
        let request_id = next_request_id();
        self.log
            .record(
                "llm_request",
                &request_id,
                serde_json::json!({
                    "model": request.model,
                    "max_tokens": request.max_tokens,
                    "temperature": request.temperature,
                    "json_mode": request.json_mode,
                    "messages": request.messages,
                }),
            )
            .await;

        let body = WireChatRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_mode.then_some(WireResponseFormat {
                kind: "json_object",
            }),
        };

        let url = self.endpoint("chat/completions");
        let result = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                self.log
                    .record(
                        "llm_error",
                        &request_id,
                        serde_json::json!({"error": err.to_string()}),
                    )
                    .await;
                return Err(err.into());
            }
        };

        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, LLM_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            self.log
                .record(
                    "llm_error",
                    &request_id,
                    serde_json::json!({"status": status.as_u16(), "body": excerpt}),
                )
                .await;
            return Err(OncoTierError::LlmUnavailable(format!(
                "HTTP {status}: {excerpt}"
            )));
        }

        let parsed: WireChatResponse =
            serde_json::from_slice(&bytes).map_err(|source| OncoTierError::ApiJson {
                api: LLM_API.to_string(),
                source,
            })?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                OncoTierError::LlmUnavailable("Chat response contained no content".into())
            })?;

        self.log
            .record("llm_response", &request_id, serde_json::json!({"text": text}))
            .await;
        Ok(text)
    }
}

/// Pulls the first JSON object out of a chat reply, tolerating code fences
/// and prose around it.
pub(crate) fn extract_json_object(text: &str) -> Result<serde_json::Value, OncoTierError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end)
        && start < end
    {
        return serde_json::from_str(&trimmed[start..=end]).map_err(|source| {
            OncoTierError::ApiJson {
                api: LLM_API.to_string(),
                source,
            }
        });
    }
    Err(OncoTierError::LlmUnavailable(
        "Chat reply contained no JSON object".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_posts_messages_and_returns_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  Tier summary.  "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new_for_test(server.uri(), "test-key".into()).unwrap();
        let text = client
            .chat(ChatRequest {
                model: "gpt-4o-mini".into(),
                messages: vec![ChatMessage::user("hello")],
                max_tokens: 100,
                temperature: 0.1,
                json_mode: false,
            })
            .await
            .unwrap();
        assert_eq!(text, "Tier summary.");
    }

    #[tokio::test]
    async fn http_failure_maps_to_llm_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new_for_test(server.uri(), "bad".into()).unwrap();
        let err = client
            .chat(ChatRequest {
                model: "gpt-4o-mini".into(),
                messages: vec![ChatMessage::user("hello")],
                max_tokens: 100,
                temperature: 0.1,
                json_mode: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OncoTierError::LlmUnavailable(_)));
    }

    #[test]
    fn extract_json_object_handles_fences_and_prose() {
        let fenced = "```json\n{\"score\": 0.9}\n```";
        assert_eq!(extract_json_object(fenced).unwrap()["score"], 0.9);

        let prose = "Here is my answer: {\"signal\": \"resistance\"} hope it helps";
        assert_eq!(extract_json_object(prose).unwrap()["signal"], "resistance");

        assert!(extract_json_object("no json at all").is_err());
    }

    #[tokio::test]
    async fn decision_log_appends_jsonl_lines() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("oncotier-declog-{}.jsonl", std::process::id()));
        tokio::fs::remove_file(&path).await.ok();

        let log = DecisionLog::open(&path).await.unwrap();
        log.record("llm_request", "req-1", serde_json::json!({"model": "m"}))
            .await;
        log.record("llm_response", "req-1", serde_json::json!({"text": "t"}))
            .await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "llm_request");
        assert_eq!(first["request_id"], "req-1");
        assert!(first["timestamp"].as_str().unwrap().contains('T'));

        tokio::fs::remove_file(&path).await.ok();
    }
}
