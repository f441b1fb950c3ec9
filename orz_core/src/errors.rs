use orz_storage::AuthError;
use reqwest::StatusCode;
use thiserror::Error;

use crate::connections::errors::ConnectionError;

/// Everything the cloud client can fail with.
///
/// Nothing in this crate retries; callers decide whether an operation is
/// safe to repeat.
#[derive(Debug, Error)]
pub enum CloudError {
    /// No usable credential. Surfaced to the user as "please log in".
    #[error("{0}, run 'orz login' first")]
    Auth(#[from] AuthError),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("API error ({status}): {body}")]
    Api { status: StatusCode, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The server handed out something that breaks the attach contract.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("credential storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("failed to connect: {0}")]
    Connect(#[source] ConnectionError),
    /// Local stdin/stdout failed while attached.
    #[error("terminal I/O error: {0}")]
    Terminal(#[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CloudError::Timeout(err.to_string())
        } else {
            CloudError::Network(err.to_string())
        }
    }
}

impl CloudError {
    pub fn is_auth(&self) -> bool {
        matches!(self, CloudError::Auth(_))
    }
}
