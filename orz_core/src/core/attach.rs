//! Bridges a local terminal to a tunnel session.

use log::{debug, warn};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::tunnel_pool::TunnelSession;
use crate::errors::CloudError;

const CTRL_A: u8 = 0x01;

/// Why an attached pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachExit {
    /// The user typed Ctrl+A then `x`.
    Detached,
    /// The caller's cancel future resolved (usually Ctrl+C).
    Cancelled,
    /// The instance side went away.
    RemoteClosed,
}

/// Ctrl+A prefix handling. `Ctrl+A x` detaches, `Ctrl+A Ctrl+A` sends one
/// literal Ctrl+A, anything else after the prefix is sent unchanged.
#[derive(Debug, Default)]
struct DetachEscape {
    pending: bool,
}

impl DetachEscape {
    /// Appends the bytes to forward to `out`. Returns `true` on detach.
    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> bool {
        for &b in input {
            if self.pending {
                self.pending = false;
                match b {
                    b'x' => return true,
                    CTRL_A => out.push(CTRL_A),
                    other => {
                        out.push(CTRL_A);
                        out.push(other);
                    }
                }
            } else if b == CTRL_A {
                self.pending = true;
            } else {
                out.push(b);
            }
        }
        false
    }
}

/// Copies `input` to the session and session output to `output` until the
/// user detaches, `cancel` resolves or the remote side closes.
///
/// End of `input` only stops the local-to-remote half. The session itself
/// is left open; closing it is up to the caller.
pub async fn pump<R, W, F>(
    session: &TunnelSession,
    mut input: R,
    mut output: W,
    cancel: F,
) -> Result<AttachExit, CloudError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let mut remote = session.subscribe();
    let mut escape = DetachEscape::default();
    let mut input_open = true;
    let mut buf = [0u8; 1024];
    tokio::pin!(cancel);

    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => return Ok(AttachExit::Cancelled),
            chunk = remote.recv() => match chunk {
                Ok(bytes) => write_out(&mut output, &bytes).await?,
                Err(RecvError::Lagged(n)) => warn!("Dropped {} output chunks from '{}'", n, session.instance_id()),
                Err(RecvError::Closed) => return Ok(AttachExit::RemoteClosed),
            },
            _ = session.closed() => {
                loop {
                    match remote.try_recv() {
                        Ok(bytes) => write_out(&mut output, &bytes).await?,
                        Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                return Ok(AttachExit::RemoteClosed);
            }
            read = input.read(&mut buf), if input_open => match read {
                Ok(0) => {
                    debug!("Local input closed for '{}'", session.instance_id());
                    input_open = false;
                }
                Ok(n) => {
                    let mut forward = Vec::with_capacity(n);
                    let detach = escape.feed(&buf[..n], &mut forward);
                    if !forward.is_empty() {
                        if let Err(e) = session.write_bytes(&forward).await {
                            if session.is_closed() {
                                return Ok(AttachExit::RemoteClosed);
                            }
                            return Err(CloudError::Connect(e));
                        }
                    }
                    if detach {
                        return Ok(AttachExit::Detached);
                    }
                }
                Err(e) => return Err(CloudError::Terminal(e)),
            },
        }
    }
}

async fn write_out<W: AsyncWrite + Unpin>(output: &mut W, bytes: &[u8]) -> Result<(), CloudError> {
    output.write_all(bytes).await.map_err(CloudError::Terminal)?;
    output.flush().await.map_err(CloudError::Terminal)
}
