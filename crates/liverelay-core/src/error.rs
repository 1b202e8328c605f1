use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Malformed session id: {0:?}")]
    MalformedSessionId(String),

    #[error("Session already attached: {0}")]
    AlreadyAttached(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid parameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },

    #[error("Producer error: {0}")]
    Producer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Stable label for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::UnknownSession(_) | Self::MalformedSessionId(_) => "registry_miss",
            Self::AlreadyAttached(_) => "already_attached",
            Self::SessionClosed(_) => "session_closed",
            Self::Handshake(_) => "handshake",
            Self::Transport(_) => "transport",
            Self::Serialization(_) => "serialization",
            Self::InvalidParam { .. } | Self::Producer(_) => "producer",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
