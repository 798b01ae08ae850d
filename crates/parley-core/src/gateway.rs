//! The platform-agnostic boundary between the agent and whatever chat
//! transport it's embedded in. See `spec.md` §6.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::model::{AuthorId, ChannelId, MessageId, ServerId};

/// What kind of channel a message or backfill request concerns. Some
/// platforms distinguish text channels from threads or voice-chat text;
/// the agent only ever needs to know whether history makes sense here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Thread,
    DirectMessage,
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub kind: ChannelKind,
    pub name: String,
}

/// An outbound message, ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel_id: ChannelId,
    pub content: String,
    /// The message this one replies to, if any.
    pub reply_to: Option<MessageId>,
}

/// Everything the agent needs from a chat transport, kept narrow enough
/// that a serenity-backed Discord adapter and a test double both implement
/// it trivially.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Sends a message to a channel, returning the ID the platform assigns
    /// it.
    async fn send_message(&self, message: OutboundMessage) -> Result<MessageId, TransportError>;

    /// Fetches up to `limit` messages older than `before`, in
    /// newest-first order, for backfill. `before` of `None` starts from
    /// the channel's most recent message.
    async fn fetch_history(
        &self,
        channel_id: ChannelId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<crate::model::MessageRecord>, TransportError>;

    /// The channels the gateway is currently connected to and permitted to
    /// read/write.
    async fn known_channels(&self) -> Result<Vec<ChannelInfo>, TransportError>;

    /// Whether `author_id` is the bot's own identity, so the agent can
    /// avoid reacting to its own messages.
    fn is_self(&self, author_id: AuthorId) -> bool;
}
