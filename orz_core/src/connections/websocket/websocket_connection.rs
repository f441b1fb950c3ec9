use crate::connections::{
    connection::{Connection, Connector},
    errors::ConnectionError,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::{collections::VecDeque, time::Duration};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        error::Error as WsError,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tunnel transport over a WebSocket.
///
/// The access token travels in the handshake's `token` query parameter and
/// its `Authorization` header. The stored endpoint never carries it.
pub struct WebSocketConnection {
    endpoint: Url,
    token: String,
    connect_timeout: Duration,

    stream: Option<WsStream>,
    leftovers: VecDeque<u8>,
}

impl WebSocketConnection {
    pub fn new(endpoint: Url, token: String, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            token,
            connect_timeout,
            stream: None,
            leftovers: VecDeque::new(),
        }
    }

    fn deliver(&mut self, mut chunk: Vec<u8>, buffer: &mut [u8]) -> usize {
        let n = std::cmp::min(buffer.len(), chunk.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        if chunk.len() > n {
            self.leftovers.extend(chunk.split_off(n));
        }
        n
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        // The control plane checks `token` on the upgrade query, so it goes back
        // on the wire here only; the endpoint itself stays query-free.
        let mut handshake_url = self.endpoint.clone();
        handshake_url
            .query_pairs_mut()
            .clear()
            .append_pair("token", &self.token);
        let mut request = handshake_url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ConnectionError::Other(format!("invalid attach token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        info!("Connecting to tunnel endpoint {}", self.endpoint);
        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ConnectionError::Timeout(self.connect_timeout))??;
        debug!(
            "Tunnel handshake with {} answered {}",
            self.endpoint,
            response.status()
        );

        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.leftovers.clear();
        match self.stream.take() {
            Some(mut stream) => match stream.close(None).await {
                Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
                Err(e) => Err(e.into()),
            },
            None => Ok(()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        stream.send(Message::Binary(data.to_vec())).await?;
        Ok(data.len())
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ConnectionError> {
        // serve leftovers first
        if !self.leftovers.is_empty() {
            let n = std::cmp::min(buffer.len(), self.leftovers.len());
            for (dst, src) in buffer.iter_mut().take(n).zip(self.leftovers.drain(..n)) {
                *dst = src;
            }
            return Ok(n);
        }

        loop {
            let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
            match stream.next().await {
                Some(Ok(Message::Binary(data))) if !data.is_empty() => {
                    return Ok(self.deliver(data, buffer));
                }
                Some(Ok(Message::Text(text))) if !text.is_empty() => {
                    return Ok(self.deliver(text.into_bytes(), buffer));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Tunnel {} closed by remote: {:?}", self.endpoint, frame);
                    return Ok(0);
                }
                // pings are answered by tungstenite on the next read/write
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(0),
                Some(Err(e)) => {
                    warn!("Tunnel {} read error: {}", self.endpoint, e);
                    return Err(e.into());
                }
            }
        }
    }

    async fn keepalive(&mut self) -> Result<(), ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;
        stream.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }
}

/// Production [`Connector`]: one [`WebSocketConnection`] per attach.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        // wss endpoints need a process-wide rustls provider; a second install is a no-op error
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self { connect_timeout }
    }
}

impl Connector for WebSocketConnector {
    fn connection(&self, endpoint: &Url, token: &str) -> Box<dyn Connection + Send + Unpin> {
        Box::new(WebSocketConnection::new(
            endpoint.clone(),
            token.to_string(),
            self.connect_timeout,
        ))
    }
}
