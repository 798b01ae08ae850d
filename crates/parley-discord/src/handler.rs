use std::sync::Arc;

use serenity::all::{Context, EventHandler, Message, Ready};
use tracing::{error, info};

use parley_core::ConversationAgent;

use crate::gateway::{to_message_record, DiscordGateway};

/// Bridges `serenity`'s event loop to the platform-agnostic agent. Holds
/// the same `DiscordGateway` the agent was built with, so it can record
/// the bot's own user ID once the gateway handshake completes.
pub struct ParleyEventHandler {
    agent: Arc<ConversationAgent<DiscordGateway>>,
    gateway: Arc<DiscordGateway>,
}

impl ParleyEventHandler {
    pub fn new(agent: Arc<ConversationAgent<DiscordGateway>>, gateway: Arc<DiscordGateway>) -> Self {
        Self { agent, gateway }
    }
}

#[serenity::async_trait]
impl EventHandler for ParleyEventHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, id = %ready.user.id, "connected to Discord");
        self.gateway.set_self_id(ready.user.id);

        let agent = self.agent.clone();
        tokio::spawn(async move {
            if let Err(err) = agent.backfill_known_channels().await {
                error!(%err, "startup backfill failed");
            }
        });
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let record = to_message_record(&msg);
        if let Err(err) = self.agent.handle_incoming_message(record).await {
            error!(%err, channel = %msg.channel_id, "failed to handle incoming message");
        }
    }
}
