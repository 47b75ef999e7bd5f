// Error types shared across the bridge, the Fathom client and the tray

use thiserror::Error;

/// Failure of a bridge `invoke` call.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments for `{command}`: {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error("command `{command}` failed: {message}")]
    Handler { command: String, message: String },

    #[error("failed to serialize bridge payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn invalid_arguments(command: &str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidArguments {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    pub fn handler(command: &str, message: impl Into<String>) -> Self {
        BridgeError::Handler {
            command: command.to_string(),
            message: message.into(),
        }
    }
}

/// Failure of a request against the Fathom API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid API url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum TrayError {
    #[error("unknown tray icon: {0:?}")]
    UnknownIcon(String),

    #[error("tray backend error: {0}")]
    Backend(String),
}
