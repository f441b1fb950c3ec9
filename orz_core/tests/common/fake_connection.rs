//! A deterministic **in‑process stand‑in** for the tunnel transport.
//!
//! `FakeConnector` is handed to `TunnelPool::new`. Every dial it serves is
//! recorded and produces a [`FakeRemote`], the instance's end of the pipe:
//!
//! * push bytes with `remote.to_client.send(bytes).await`; they come out of
//!   the session's broadcast,
//! * read what the session wrote from `remote.written`,
//! * drop `remote.to_client` to simulate the instance hanging up.
#![allow(dead_code)]

use async_trait::async_trait;
use orz_core::connections::{Connection, ConnectionError, Connector};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use url::Url;

/// Shared between a fake connection and the test.
#[derive(Debug, Default)]
pub struct FakeState {
    pub connected: AtomicBool,
    pub disconnected: AtomicBool,
    pub keepalives: AtomicUsize,
}

impl FakeState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn keepalive_count(&self) -> usize {
        self.keepalives.load(Ordering::SeqCst)
    }
}

pub struct FakeRemote {
    pub endpoint: Url,
    pub token: String,
    pub to_client: mpsc::Sender<Vec<u8>>,
    pub written: mpsc::UnboundedReceiver<Vec<u8>>,
    pub state: Arc<FakeState>,
}

pub struct FakeConnection {
    state: Arc<FakeState>,
    incoming: mpsc::Receiver<Vec<u8>>,
    leftover: Vec<u8>,
    written: mpsc::UnboundedSender<Vec<u8>>,
    fail_connect: bool,
    fail_disconnect: bool,
    panic_on_read: bool,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if let Some(gate) = &self.gate {
            // Parks until the test adds a permit.
            let _permit = gate.acquire().await;
        }
        if self.fail_connect {
            return Err(ConnectionError::Other("connection refused".into()));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.state.disconnected.store(true, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(ConnectionError::Other("close frame lost".into()));
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        let _ = self.written.send(data.to_vec());
        Ok(data.len())
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ConnectionError> {
        if self.leftover.is_empty() {
            if self.panic_on_read {
                panic!("fake transport blew up");
            }
            match self.incoming.recv().await {
                Some(chunk) => self.leftover = chunk,
                None => return Ok(0),
            }
        }
        // Partial reads like a real stream.
        let n = self.leftover.len().min(buffer.len());
        buffer[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }

    async fn keepalive(&mut self) -> Result<(), ConnectionError> {
        self.state.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    remotes: mpsc::UnboundedSender<FakeRemote>,
    dials: AtomicUsize,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    panic_on_read: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    last_dial: Mutex<Option<(Url, String)>>,
}

impl FakeConnector {
    /// Returns the connector plus the stream of remotes, one per dial.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        let (remotes, remotes_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                remotes,
                dials: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                fail_disconnect: AtomicBool::new(false),
                panic_on_read: AtomicBool::new(false),
                gate: Mutex::new(None),
                last_dial: Mutex::new(None),
            }),
            remotes_rx,
        )
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn last_dial(&self) -> Option<(Url, String)> {
        self.last_dial.lock().unwrap().clone()
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disconnects(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    /// Connections created from now on panic on their first read.
    pub fn panic_reads(&self, panic: bool) {
        self.panic_on_read.store(panic, Ordering::SeqCst);
    }

    /// Connections created from now on block in `connect` until the returned
    /// semaphore gets a permit.
    pub fn hold_connects(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

impl Connector for FakeConnector {
    fn connection(&self, endpoint: &Url, token: &str) -> Box<dyn Connection + Send + Unpin> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        *self.last_dial.lock().unwrap() = Some((endpoint.clone(), token.to_string()));

        let state = Arc::new(FakeState::default());
        let (to_client, incoming) = mpsc::channel(32);
        let (written_tx, written) = mpsc::unbounded_channel();
        let _ = self.remotes.send(FakeRemote {
            endpoint: endpoint.clone(),
            token: token.to_string(),
            to_client,
            written,
            state: state.clone(),
        });

        Box::new(FakeConnection {
            state,
            incoming,
            leftover: Vec::new(),
            written: written_tx,
            fail_connect: self.fail_connect.load(Ordering::SeqCst),
            fail_disconnect: self.fail_disconnect.load(Ordering::SeqCst),
            panic_on_read: self.panic_on_read.load(Ordering::SeqCst),
            gate: self.gate.lock().unwrap().clone(),
        })
    }
}

pub fn init_test_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn attach_url(instance_id: &str, token: &str) -> String {
    format!("https://api.example.com/v1/instances/{instance_id}/attach?token={token}")
}
