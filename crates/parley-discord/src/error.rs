use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DiscordError {
    #[error("failed to send message to channel {channel_id}: {source}")]
    #[diagnostic(code(parley::discord::send_failed))]
    SendFailed {
        channel_id: u64,
        #[source]
        source: serenity::Error,
    },

    #[error("failed to fetch history for channel {channel_id}: {source}")]
    #[diagnostic(code(parley::discord::history_failed))]
    HistoryFailed {
        channel_id: u64,
        #[source]
        source: serenity::Error,
    },

    #[error("failed to enumerate guild channels: {source}")]
    #[diagnostic(code(parley::discord::list_channels_failed))]
    ListChannelsFailed {
        #[source]
        source: serenity::Error,
    },
}

impl From<DiscordError> for parley_core::error::TransportError {
    fn from(err: DiscordError) -> Self {
        parley_core::error::TransportError::RequestFailed {
            endpoint: "discord".to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscordError>;
