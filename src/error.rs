use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Transport or provider fault. Only `retryable` faults are retried.
    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {}", .0.join("; "))]
    Configuration(Vec<String>),

    #[error("{operation} failed after {attempts} attempts. Last error: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// A transient provider fault that the controller may retry
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// A provider fault that retrying will not fix (bad key, bad request)
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(vec![message.into()])
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
