use thiserror::Error;

/// Errors raised by a tunnel transport.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Not connected")]
    NotConnected,
    #[error("Other error: {0}")]
    Other(String),
}

/// Without this, `map_err(ConnectionError::from)` won't work on tungstenite results.
impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectionError::WebSocket(err.to_string())
    }
}
