//! `DiscordGateway`: the `serenity`-backed [`ChatGateway`] implementation.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serenity::all::{
    ChannelType, CreateMessage, GetMessages, GuildPagination, Http, MessageReference,
};
use serenity::model::id::{
    ChannelId as SerenityChannelId, GuildId, MessageId as SerenityMessageId,
    UserId as SerenityUserId,
};

use parley_core::error::TransportError;
use parley_core::gateway::{ChannelInfo, ChannelKind, ChatGateway, OutboundMessage};
use parley_core::model::{AuthorId, MessageRecord};
use parley_core::{ChannelId, MessageId, Snowflake};

use crate::error::DiscordError;

/// Converts a `serenity` message into the platform-agnostic
/// `MessageRecord`. Lives alongside the gateway because it's the one place
/// that needs to know both type systems.
pub fn to_message_record(msg: &serenity::model::channel::Message) -> MessageRecord {
    MessageRecord {
        server_id: msg
            .guild_id
            .map(|g| Snowflake(g.get()))
            .unwrap_or(Snowflake::UNSET),
        channel_id: Snowflake(msg.channel_id.get()),
        message_id: Snowflake(msg.id.get()),
        author_id: Snowflake(msg.author.id.get()),
        author_user_name: msg.author.name.clone(),
        author_global_name: msg
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| msg.author.name.clone()),
        timestamp_unix_ms: msg.timestamp.timestamp_millis(),
        timestamp_human_readable: msg.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        content: msg.content.clone(),
    }
}

pub struct DiscordGateway {
    http: Arc<Http>,
    self_id: OnceCell<SerenityUserId>,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            self_id: OnceCell::new(),
        }
    }

    /// Records the bot's own user ID once, from the `Ready` event. Called
    /// at most once per process; later calls are no-ops.
    pub fn set_self_id(&self, id: SerenityUserId) {
        let _ = self.self_id.set(id);
    }
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    async fn send_message(&self, message: OutboundMessage) -> Result<MessageId, TransportError> {
        let channel = SerenityChannelId::new(message.channel_id.get());
        let mut builder = CreateMessage::new().content(message.content);
        if let Some(reply_to) = message.reply_to {
            let reference =
                MessageReference::from((channel, SerenityMessageId::new(reply_to.get())));
            builder = builder.reference_message(reference);
        }

        let sent = channel
            .send_message(&self.http, builder)
            .await
            .map_err(|source| DiscordError::SendFailed {
                channel_id: message.channel_id.get(),
                source,
            })?;
        Ok(Snowflake(sent.id.get()))
    }

    async fn fetch_history(
        &self,
        channel_id: ChannelId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let channel = SerenityChannelId::new(channel_id.get());
        let mut builder = GetMessages::new().limit(limit.min(100) as u8);
        if let Some(before) = before {
            builder = builder.before(before.get());
        }

        let messages = channel
            .messages(&self.http, builder)
            .await
            .map_err(|source| DiscordError::HistoryFailed {
                channel_id: channel_id.get(),
                source,
            })?;

        Ok(messages.iter().map(to_message_record).collect())
    }

    async fn known_channels(&self) -> Result<Vec<ChannelInfo>, TransportError> {
        let guilds = self
            .http
            .get_guilds(Some(GuildPagination::After(GuildId::new(0))), Some(200))
            .await
            .map_err(|source| DiscordError::ListChannelsFailed { source })?;

        let mut out = Vec::new();
        for guild in guilds {
            let channels = self
                .http
                .get_channels(guild.id)
                .await
                .map_err(|source| DiscordError::ListChannelsFailed { source })?;
            for channel in channels {
                let kind = match channel.kind {
                    ChannelType::Text | ChannelType::News => ChannelKind::Text,
                    ChannelType::PublicThread | ChannelType::PrivateThread => ChannelKind::Thread,
                    _ => continue,
                };
                out.push(ChannelInfo {
                    server_id: Snowflake(guild.id.get()),
                    channel_id: Snowflake(channel.id.get()),
                    kind,
                    name: channel.name,
                });
            }
        }
        Ok(out)
    }

    fn is_self(&self, author_id: AuthorId) -> bool {
        self.self_id
            .get()
            .is_some_and(|id| id.get() == author_id.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_self_is_false_before_ready_sets_it() {
        let http = Arc::new(Http::new("fake-token"));
        let gateway = DiscordGateway::new(http);
        assert!(!gateway.is_self(Snowflake(123)));
    }

    #[test]
    fn is_self_matches_after_set() {
        let http = Arc::new(Http::new("fake-token"));
        let gateway = DiscordGateway::new(http);
        gateway.set_self_id(SerenityUserId::new(42));
        assert!(gateway.is_self(Snowflake(42)));
        assert!(!gateway.is_self(Snowflake(43)));
    }
}
