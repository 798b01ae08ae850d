//! Parley Core — message archival, continuity tracking, semantic retrieval
//! and the two-stage LLM decision pipeline that decides whether and how a
//! persona responds to a chat message.
//!
//! This crate is platform-agnostic: it knows nothing about Discord or any
//! other chat platform beyond the [`gateway::ChatGateway`] trait. A concrete
//! adapter (e.g. `parley-discord`) supplies the platform and drives
//! [`agent::ConversationAgent`].

pub mod agent;
pub mod archiver;
pub mod config;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod model;
pub mod persistence;
pub mod semantic;
pub mod snowflake;
pub mod tracker;

pub use agent::ConversationAgent;
pub use archiver::MessageArchiver;
pub use error::{ParleyError, Result};
pub use gateway::{ChannelInfo, ChannelKind, ChatGateway};
pub use model::{ChannelId, ContinuityRange, EmbeddingRecord, MessageId, MessageRecord, ServerId};
pub use snowflake::Snowflake;

/// Re-export of the types most callers need.
pub mod prelude {
    pub use crate::{
        ChannelId, ChannelInfo, ChannelKind, ChatGateway, ContinuityRange, ConversationAgent,
        EmbeddingRecord, MessageArchiver, MessageId, MessageRecord, ParleyError, Result,
        ServerId, Snowflake,
    };
}
