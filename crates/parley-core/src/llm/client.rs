use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, TransportError};

/// One turn of prior conversation handed to the model as context. `role` is
/// either `"user"` or `"assistant"`; the wire shape is exactly
/// `{"role": ..., "content": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One call to the model: a system-style instruction, the replayed
/// conversation history, and the final user request. Matches `spec.md`
/// §4.6's `LLMRequest` shape.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub instructions: String,
    pub history: Vec<HistoryTurn>,
    pub request: String,
}

/// A single input item in the wire request: either a replayed history turn
/// or the final `{"role": "user", "content": request}` item.
#[derive(Serialize)]
struct InputItem<'a> {
    role: &'a str,
    content: &'a str,
}

/// Outgoing JSON shape: `{model, instructions, input: [...history, {role:
/// "user", content: request}]}` — the history is flattened into the same
/// array the trailing request item lives in, per `spec.md` §4.6.
#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: Vec<InputItem<'a>>,
}

impl LlmRequest {
    fn to_wire(&self) -> WireRequest<'_> {
        let mut input: Vec<InputItem<'_>> = self
            .history
            .iter()
            .map(|turn| InputItem {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &turn.content,
            })
            .collect();
        input.push(InputItem {
            role: "user",
            content: &self.request,
        });
        WireRequest {
            model: &self.model,
            instructions: &self.instructions,
            input,
        }
    }
}

/// The top-level response envelope: `spec.md` §6's `{id, status,
/// created_at?, error?, output[]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<f64>,
    #[serde(default)]
    pub error: Option<LlmResponseError>,
    #[serde(default)]
    pub output: Vec<LlmOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponseError {
    pub code: String,
    pub reason: String,
}

impl LlmResponse {
    /// `status == "completed"` and no populated `error` field.
    pub fn response_ok(&self) -> bool {
        self.status == "completed" && self.error.is_none()
    }

    /// The first non-refused `message` output's text, or an empty string
    /// if every message was refused or there were no message outputs.
    /// Reasoning traces and tool-call items never contribute text.
    pub fn message_text(&self) -> String {
        self.output
            .iter()
            .find_map(|item| match item {
                LlmOutput::Message {
                    text,
                    refused: false,
                } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Every non-refused, non-empty message output's text, in order — used
    /// where a single call may produce more than one outbound message
    /// (`spec.md` §4.7 step 8).
    pub fn message_texts(&self) -> Vec<String> {
        self.output
            .iter()
            .filter_map(|item| match item {
                LlmOutput::Message {
                    text,
                    refused: false,
                } if !text.trim().is_empty() => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// A transport/parse-failure placeholder: `responseOK=false`, no
    /// outputs, carrying the HTTP status for callers that want to log it.
    pub fn transport_failure(http_status: Option<u16>, message: impl Into<String>) -> Self {
        LlmResponse {
            id: String::new(),
            status: "failed".to_string(),
            created_at: None,
            error: Some(LlmResponseError {
                code: http_status.map(|c| c.to_string()).unwrap_or_default(),
                reason: message.into(),
            }),
            output: Vec::new(),
        }
    }
}

/// One item of the heterogeneous `output[]` array. `content` entries yield
/// either a `refusal` (sets `refused = true`) or `text`; `reasoning` items
/// keep their summary; tool-call items are recognised but not materialised;
/// anything the backend adds later falls into `Unknown`.
#[derive(Debug, Clone)]
pub enum LlmOutput {
    Message { text: String, refused: bool },
    Reasoning { summary: Option<String> },
    FileSearchCall,
    FunctionCall,
    WebSearchCall,
    Unknown,
}

impl<'de> Deserialize<'de> for LlmOutput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ContentItem {
            #[serde(default)]
            text: Option<String>,
            #[serde(default)]
            refusal: Option<String>,
        }
        #[derive(Deserialize)]
        struct Summary {
            #[serde(default)]
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            content: Vec<ContentItem>,
            #[serde(default)]
            summary: Option<Summary>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(match raw.kind.as_str() {
            "message" => {
                let first = raw.content.into_iter().next();
                match first {
                    Some(ContentItem {
                        refusal: Some(_), ..
                    }) => LlmOutput::Message {
                        text: String::new(),
                        refused: true,
                    },
                    Some(ContentItem { text: Some(t), .. }) => {
                        LlmOutput::Message {
                            text: t,
                            refused: false,
                        }
                    }
                    _ => LlmOutput::Message {
                        text: String::new(),
                        refused: false,
                    },
                }
            }
            "reasoning" => LlmOutput::Reasoning {
                summary: raw.summary.and_then(|s| s.text),
            },
            "file_search_call" => LlmOutput::FileSearchCall,
            "function_call" => LlmOutput::FunctionCall,
            "web_search_call" => LlmOutput::WebSearchCall,
            _ => LlmOutput::Unknown,
        })
    }
}

/// A single request/response round trip to the backend, with no retry or
/// queuing logic — that lives in [`crate::llm::LlmQueue`].
#[async_trait]
pub trait RawLlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum LlmError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RawLlmClient for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let wire = request.to_wire();
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&wire)
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TransportError::RequestFailed {
                endpoint: self.endpoint.clone(),
                message: format!("status {}", response.status()),
            }
            .into());
        }

        response
            .json::<LlmResponse>()
            .await
            .map_err(|e| {
                ProtocolError::Malformed {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_returns_first_non_refused_message() {
        let response: LlmResponse = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": {"text": "thinking..."}},
                {"type": "message", "content": [{"refusal": "can't help with that"}]},
                {"type": "message", "content": [{"text": "yes, go ahead"}]},
            ]
        }))
        .unwrap();
        assert_eq!(response.message_text(), "yes, go ahead");
        assert!(response.response_ok());
    }

    #[test]
    fn parses_tool_call_variants_from_wire_json() {
        let json = serde_json::json!({
            "id": "r2",
            "status": "completed",
            "output": [
                {"type": "message", "content": [{"text": "hi"}]},
                {"type": "reasoning"},
                {"type": "file_search_call"},
                {"type": "function_call"},
                {"type": "web_search_call"},
                {"type": "something_new_the_api_added"}
            ]
        });
        let parsed: LlmResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.output.len(), 6);
        assert_eq!(parsed.message_text(), "hi");
    }

    #[test]
    fn response_ok_is_false_when_error_populated() {
        let response: LlmResponse = serde_json::from_value(serde_json::json!({
            "id": "r3",
            "status": "completed",
            "error": {"code": "rate_limited", "reason": "too many requests"},
            "output": []
        }))
        .unwrap();
        assert!(!response.response_ok());
    }

    #[test]
    fn response_ok_is_false_when_status_is_not_completed() {
        let response: LlmResponse = serde_json::from_value(serde_json::json!({
            "id": "r4",
            "status": "in_progress",
            "output": []
        }))
        .unwrap();
        assert!(!response.response_ok());
    }

    #[test]
    fn message_texts_skips_refusals_and_blanks() {
        let response: LlmResponse = serde_json::from_value(serde_json::json!({
            "id": "r5",
            "status": "completed",
            "output": [
                {"type": "message", "content": [{"text": "first reply"}]},
                {"type": "message", "content": [{"refusal": "no"}]},
                {"type": "message", "content": [{"text": "   "}]},
                {"type": "message", "content": [{"text": "second reply"}]},
            ]
        }))
        .unwrap();
        assert_eq!(
            response.message_texts(),
            vec!["first reply".to_string(), "second reply".to_string()]
        );
    }

    #[test]
    fn wire_request_appends_request_as_trailing_user_turn() {
        let request = LlmRequest {
            model: "fast-model".to_string(),
            instructions: "be terse".to_string(),
            history: vec![HistoryTurn::user("hello"), HistoryTurn::assistant("hi there")],
            request: "what's up?".to_string(),
        };
        let wire = request.to_wire();
        assert_eq!(wire.input.len(), 3);
        assert_eq!(wire.input[0].role, "user");
        assert_eq!(wire.input[2].role, "user");
        assert_eq!(wire.input[2].content, "what's up?");
    }
}
