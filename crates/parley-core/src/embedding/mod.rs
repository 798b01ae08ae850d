//! Sentence-embedding client used to enrich archived messages for
//! semantic retrieval. See `spec.md` §4.4.

mod client;

pub use client::{EmbeddingClient, EmbeddingError, HttpEmbeddingClient};

#[cfg(test)]
pub use client::MockEmbeddingClient;
