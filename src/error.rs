use thiserror::Error;

pub type Result<T, E = ReflectorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReflectorError {
    #[error("HTTP {status}")]
    Http { status: reqwest::StatusCode },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ReflectorError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ReflectorError::Timeout => true,
            ReflectorError::Network(e) => e.is_timeout(),
            _ => false,
        }
    }
}
