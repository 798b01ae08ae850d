//! Two-stage LLM decision pipeline: a cheap pre-filter gate followed by a
//! conditional generator call, serialized through a single-worker queue so
//! the platform's rate limits are respected. See `spec.md` §4.6.

mod client;
mod queue;

pub use client::{
    HistoryTurn, HttpLlmClient, LlmError, LlmOutput, LlmRequest, LlmResponse, LlmResponseError,
    RawLlmClient, Role,
};
pub use queue::LlmQueue;
