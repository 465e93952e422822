use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("provider is not connected")]
    NotConnected,

    #[error("send to {recipient} timed out")]
    SendTimeout { recipient: String },

    #[error("send to {recipient} rejected: {detail}")]
    SendRejected { recipient: String, detail: String },

    #[error("a send to {recipient} is already in flight")]
    DuplicateInFlight { recipient: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn send_rejected(recipient: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SendRejected {
            recipient: recipient.into(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
