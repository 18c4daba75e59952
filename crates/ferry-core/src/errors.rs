use std::path::PathBuf;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the bot can
/// handle failures consistently (user-facing reply vs log-and-continue).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Missing or rejected third-party credentials.
    #[error("authorization required: {0}")]
    Auth(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Text that is safe to show to the chat user.
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthorized(_) => crate::auth::NOT_AUTHORIZED.to_string(),
            Error::Auth(msg) | Error::InvalidInput(msg) => msg.clone(),
            Error::External(msg) => format!(
                "An error occurred: {}",
                crate::formatting::truncate_text(msg, 200)
            ),
            _ => "Sorry, something went wrong. Please try again later.".to_string(),
        }
    }
}
