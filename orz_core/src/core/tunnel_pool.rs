use crate::connections::connection::{Connection, Connector};
use crate::connections::endpoint::TunnelEndpoint;
use crate::connections::errors::ConnectionError;
use crate::connections::websocket::WebSocketConnector;
use crate::errors::CloudError;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use url::Url;

const OUTPUT_BUFFER: usize = 256;
const WRITE_QUEUE: usize = 32;
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Handle to one live tunnel.
///
/// Cheap to clone; every clone talks to the same per-session I/O task. The
/// handle stays usable after the pool dropped the session, it just reports
/// closed and refuses writes.
#[derive(Clone)]
pub struct TunnelSession {
    inner: Arc<SessionShared>,
}

struct SessionShared {
    instance_id: String,
    endpoint: Url,
    write_tx: mpsc::Sender<Vec<u8>>,
    output_tx: broadcast::Sender<Vec<u8>>,
    /// Receiver created at registration so nothing read before the first
    /// `subscribe` is lost.
    first_output: StdMutex<Option<broadcast::Receiver<Vec<u8>>>>,
    closed_rx: watch::Receiver<bool>,
}

impl fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelSession")
            .field("instance_id", &self.inner.instance_id)
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TunnelSession {
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// The rewritten `ws`/`wss` endpoint this session was opened against.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Subscribe to bytes arriving from the instance.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        let first = self
            .inner
            .first_output
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        first.unwrap_or_else(|| self.inner.output_tx.subscribe())
    }

    /// Queue bytes for the instance.
    pub async fn write_bytes(&self, data: &[u8]) -> Result<usize, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::NotConnected);
        }
        self.inner
            .write_tx
            .send(data.to_vec())
            .await
            .map_err(|_| ConnectionError::Other("Channel closed".into()))?;
        Ok(data.len())
    }

    /// `true` once the transport has been torn down, or the I/O task died
    /// without getting that far.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed_rx.borrow() || self.inner.closed_rx.has_changed().is_err()
    }

    /// Resolves once the transport has been torn down.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn same_session(&self, other: &TunnelSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Pool-side bookkeeping for a registered session.
struct SessionEntry {
    session: TunnelSession,
    stop_tx: watch::Sender<bool>,
    io_task: tokio::task::JoinHandle<()>,
}

impl SessionEntry {
    fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops the I/O task and waits for the transport to be closed.
    async fn shutdown(self) {
        self.signal_stop();
        if let Err(e) = self.io_task.await {
            error!(
                "Tunnel task for '{}' ended abnormally: {}",
                self.session.instance_id(),
                e
            );
        }
    }
}

/// Tracks at most one live tunnel per instance id.
///
/// The table sits behind an `Arc<RwLock<..>>`, so the pool can be cloned
/// cheaply and shared by every caller. Lookups take the read lock,
/// registrations and removals the write lock, and the lock is never held
/// while a transport connects or disconnects.
#[derive(Clone)]
pub struct TunnelPool {
    inner: Arc<RwLock<HashMap<String, SessionEntry>>>,
    connector: Arc<dyn Connector>,
    keepalive: Duration,
}

impl Default for TunnelPool {
    fn default() -> Self {
        Self::new(Arc::new(WebSocketConnector::new(Duration::from_secs(30))))
    }
}

impl TunnelPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            connector,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval.max(Duration::from_millis(10));
        self
    }

    /// Opens a tunnel for `instance_id` from a server-issued attach URL.
    ///
    /// Any session already tracked for the id is closed first. On failure
    /// nothing is registered.
    pub async fn connect(
        &self,
        instance_id: &str,
        attach_url: &str,
    ) -> Result<TunnelSession, CloudError> {
        self.close(instance_id).await;

        let endpoint = TunnelEndpoint::from_attach_url(attach_url)?;
        let mut conn = self.connector.connection(&endpoint.url, &endpoint.token);
        conn.connect().await.map_err(CloudError::Connect)?;

        // A concurrent connect may have registered the id while we dialed.
        // Evict it and close it outside the lock, until the slot is free.
        let session = loop {
            let displaced = {
                let mut map = self.inner.write().await;
                match map.remove(instance_id) {
                    Some(old) => old,
                    None => {
                        // No await between spawning the I/O task and inserting it.
                        let entry = self.spawn_session(instance_id, endpoint.url, conn);
                        let session = entry.session.clone();
                        map.insert(instance_id.to_string(), entry);
                        break session;
                    }
                }
            };
            warn!(
                "Concurrent attach to '{}' registered a session meanwhile, replacing it",
                instance_id
            );
            displaced.shutdown().await;
        };

        info!("Tunnel to '{}' registered", instance_id);
        Ok(session)
    }

    /// The tracked session for `instance_id`, if any. Liveness is not checked.
    pub async fn get(&self, instance_id: &str) -> Option<TunnelSession> {
        let map = self.inner.read().await;
        map.get(instance_id).map(|entry| entry.session.clone())
    }

    /// Closes and forgets the session for `instance_id`. Never fails.
    pub async fn close(&self, instance_id: &str) {
        let entry = self.inner.write().await.remove(instance_id);
        if let Some(entry) = entry {
            entry.shutdown().await;
            info!("Tunnel to '{}' closed", instance_id);
        }
    }

    /// Like [`close`](Self::close) but only if `session` is still the one
    /// registered; a newer session for the same instance is left alone.
    pub async fn close_session(&self, session: &TunnelSession) {
        let entry = {
            let mut map = self.inner.write().await;
            match map.get(session.instance_id()) {
                Some(current) if current.session.same_session(session) => {
                    map.remove(session.instance_id())
                }
                _ => None,
            }
        };
        if let Some(entry) = entry {
            entry.shutdown().await;
            info!("Tunnel to '{}' closed", session.instance_id());
        }
    }

    /// Closes every tracked session. Used at shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<(String, SessionEntry)> = self.inner.write().await.drain().collect();
        if entries.is_empty() {
            return;
        }
        info!("Closing {} tunnel(s)", entries.len());
        join_all(entries.into_iter().map(|(_, entry)| entry.shutdown())).await;
    }

    pub async fn instance_ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Spawns the per-session I/O task.
    ///
    /// The task reads from the transport and broadcasts what it reads to
    /// every subscriber, forwards queued writes, pings on idle, and on stop
    /// (or when either side fails) disconnects the transport.
    fn spawn_session(
        &self,
        instance_id: &str,
        endpoint: Url,
        mut conn: Box<dyn Connection + Send + Unpin>,
    ) -> SessionEntry {
        let (output_tx, first_output) = broadcast::channel::<Vec<u8>>(OUTPUT_BUFFER);
        let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);

        let id = instance_id.to_string();
        let broadcast_tx = output_tx.clone();
        let keepalive = self.keepalive;
        let io_task = tokio::spawn(async move {
            info!("Tunnel I/O task started for '{}'.", id);
            let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        info!("Stop received for '{}'. Exiting task.", id);
                        break;
                    }
                    Some(data) = write_rx.recv() => {
                        debug!("Write {} bytes to '{}'", data.len(), id);
                        if let Err(e) = conn.write(&data).await {
                            error!("Write error on '{}': {}", id, e);
                            break;
                        }
                    }
                    result = conn.read(&mut buf) => {
                        match result {
                            Ok(0) => {
                                info!("Remote side of '{}' closed the tunnel.", id);
                                break;
                            }
                            Ok(n) => {
                                debug!("Read {} bytes from '{}'", n, id);
                                let _ = broadcast_tx.send(buf[..n].to_vec());
                            }
                            Err(e) => {
                                warn!("Read error on '{}': {}", id, e);
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = conn.keepalive().await {
                            warn!("Keepalive failed on '{}': {}", id, e);
                            break;
                        }
                    }
                }
            }
            if let Err(e) = conn.disconnect().await {
                error!("Failed to close connection for {}: {}", id, e);
            }
            let _ = closed_tx.send(true);
            info!("Tunnel I/O task ended for '{}'.", id);
        });

        SessionEntry {
            session: TunnelSession {
                inner: Arc::new(SessionShared {
                    instance_id: instance_id.to_string(),
                    endpoint,
                    write_tx,
                    output_tx,
                    first_output: StdMutex::new(Some(first_output)),
                    closed_rx,
                }),
            },
            stop_tx,
            io_task,
        }
    }
}
