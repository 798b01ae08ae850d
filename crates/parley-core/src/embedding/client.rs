use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, TransportError};
use crate::model::EMBEDDING_DIM;

/// Produces sentence embeddings for a batch of strings, in request order.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum EmbeddingError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Wire request: `{"texts": [...]}`, per `spec.md` §6.
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    texts: &'a [String],
}

/// Wire response: `{"embedding": [[float, ...], ...]}`, per `spec.md` §6.
/// Despite the singular name, it's an array of one vector per input text.
#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<Vec<f32>>,
}

/// HTTP-backed embedding client, POSTing to `<endpoint>/embed`. Sends the
/// whole batch in one request and expects the response array to preserve
/// input order, matching `spec.md` §6's contract exactly.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = format!("{}/embed", endpoint.trim_end_matches('/'));
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest { texts };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
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

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| ProtocolError::Malformed {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        // response order must correspond 1-to-1 with input order; a length
        // mismatch fails the whole call rather than guessing at alignment.
        if parsed.embedding.len() != texts.len() {
            return Err(ProtocolError::LengthMismatch {
                expected: texts.len(),
                got: parsed.embedding.len(),
            }
            .into());
        }

        for vector in &parsed.embedding {
            if vector.len() != EMBEDDING_DIM {
                return Err(ProtocolError::Malformed {
                    endpoint: self.endpoint.clone(),
                    message: format!(
                        "expected {}-dimensional embedding, got {}",
                        EMBEDDING_DIM,
                        vector.len()
                    ),
                }
                .into());
            }
        }

        Ok(parsed.embedding)
    }
}

#[cfg(test)]
pub struct MockEmbeddingClient {
    pub dim: usize,
}

#[cfg(test)]
#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let seed = t.len() as f32;
                vec![seed; self.dim]
            })
            .collect())
    }
}
