use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("authentication failed for backend {backend}: {reason}")]
    Auth { backend: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("json decode error: {err}, raw: {raw}")]
    JsonDecode {
        #[source]
        err: serde_json::Error,
        raw: String,
    },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("call cancelled via tag {tag}")]
    Cancelled { tag: String },
}

impl Error {
    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation { reason: reason.into() }
    }

    /// True for errors the executor recovers into a failure result,
    /// false for errors the caller must handle (validation, config).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
