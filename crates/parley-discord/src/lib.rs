//! Discord gateway adapter for Parley: a [`parley_core::ChatGateway`]
//! implementation backed by `serenity`, plus the `EventHandler` that wires
//! incoming messages into a [`parley_core::ConversationAgent`].

pub mod error;
pub mod gateway;
pub mod handler;

pub use error::{DiscordError, Result};
pub use gateway::DiscordGateway;
pub use handler::ParleyEventHandler;

pub use serenity;
