use super::errors::ConnectionError;
use async_trait::async_trait;
use url::Url;

/// A duplex byte stream to a remote instance.
///
/// Instances are handed to the pool *not yet connected*; the pool calls
/// `connect`, then drives `read`/`write` from its per-session I/O task and
/// finally `disconnect`.
#[async_trait]
pub trait Connection {
    async fn connect(&mut self) -> Result<(), ConnectionError>;
    async fn disconnect(&mut self) -> Result<(), ConnectionError>;

    async fn write(&mut self, data: &[u8]) -> Result<usize, ConnectionError>;
    /// `Ok(0)` means the remote side closed the stream.
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ConnectionError>;

    /// Called periodically while the session is idle.
    async fn keepalive(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Builds transports for a rewritten tunnel endpoint and its access token.
pub trait Connector: Send + Sync {
    fn connection(&self, endpoint: &Url, token: &str) -> Box<dyn Connection + Send + Unpin>;
}
