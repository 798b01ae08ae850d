//! Error taxonomy. See `spec.md` §7.
//!
//! `NotFound` is deliberately absent from [`ParleyError`]: a lookup miss is
//! an ordinary result (`Option`/`Result<T, NotFoundError>` at the call
//! site), not a propagated error.

use miette::Diagnostic;
use thiserror::Error;

/// Missing or malformed configuration. Fatal at startup.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("config file {path} does not exist")]
    #[diagnostic(code(parley::config::missing_file))]
    MissingFile { path: String },

    #[error("failed to read config file {path}: {source}")]
    #[diagnostic(code(parley::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("required key {key} is missing from configuration")]
    #[diagnostic(code(parley::config::missing_key))]
    MissingKey { key: String },

    #[error("key {key} has value {value} which is not a valid {expected}")]
    #[diagnostic(code(parley::config::invalid_value))]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Database open/read/write failure. Surfaced to the caller and logged;
/// per-operation, never fatal.
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    #[error("failed to open database at {path}: {source}")]
    #[diagnostic(code(parley::storage::open))]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite operation failed: {source}")]
    #[diagnostic(code(parley::storage::query))]
    Query {
        #[source]
        source: rusqlite::Error,
    },

    #[error("channel id {0} could not be used to build a table name")]
    #[diagnostic(code(parley::storage::bad_channel_id))]
    InvalidChannelId(u64),
}

impl From<rusqlite::Error> for StorageError {
    fn from(source: rusqlite::Error) -> Self {
        StorageError::Query { source }
    }
}

/// HTTP transport failure talking to the LLM or embedding service.
#[derive(Error, Debug, Diagnostic)]
pub enum TransportError {
    #[error("request to {endpoint} failed: {message}")]
    #[diagnostic(code(parley::transport::request_failed))]
    RequestFailed { endpoint: String, message: String },

    #[error("request to {endpoint} timed out after {seconds}s")]
    #[diagnostic(code(parley::transport::timeout))]
    Timeout { endpoint: String, seconds: u64 },
}

/// Malformed JSON returned by the LLM or embedding service. Treated as a
/// `TransportError` at the call site per `spec.md` §7.
#[derive(Error, Debug, Diagnostic)]
pub enum ProtocolError {
    #[error("malformed response from {endpoint}: {message}")]
    #[diagnostic(code(parley::protocol::malformed))]
    Malformed { endpoint: String, message: String },

    #[error("response array length {got} did not match request length {expected}")]
    #[diagnostic(code(parley::protocol::length_mismatch))]
    LengthMismatch { expected: usize, got: usize },
}

/// Top-level error used where a caller needs a single propagation type.
#[derive(Error, Debug, Diagnostic)]
pub enum ParleyError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ParleyError>;
