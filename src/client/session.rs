//! Multiplexed connection to one server
//!
//! A session owns two tasks:
//! - writer: drains encoded frames from an unbounded channel onto the socket
//! - reader: decodes replies and completes the pending call with the same `seq`
//!
//! When either side fails, every pending call is completed with a connection
//! error and the session refuses new calls. The pool replaces it on next use.

use crate::common::{Error, Result};
use crate::protocol::{
    decode_response, encode_request, read_frame, write_frame, Request, RequestHeader, RpcRequest,
    RpcResponse,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, oneshot::Sender<RpcResponse>>,
    closed: bool,
}

type SharedPending = Arc<Mutex<PendingCalls>>;

fn lock_pending(pending: &SharedPending) -> MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop every waiter and refuse new calls.
fn fail_all(pending: &SharedPending) -> usize {
    let mut pending = lock_pending(pending);
    pending.closed = true;
    let failed = pending.calls.len();
    pending.calls.clear();
    failed
}

pub struct ReplicaSession {
    addr: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: SharedPending,
    next_seq: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReplicaSession {
    /// Connect and start the reader and writer tasks.
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::ConnectionFailed(format!(
                    "connect to {} timed out after {:?}",
                    addr, connect_timeout
                ))
            })?
            .map_err(|e| Error::ConnectionFailed(format!("connect to {}: {}", addr, e)))?;
        // Small requests dominate; don't let Nagle hold them back.
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let pending: SharedPending = Arc::new(Mutex::new(PendingCalls::default()));

        let writer = tokio::spawn(write_loop(
            addr.to_string(),
            write_half,
            rx,
            pending.clone(),
        ));
        let reader = tokio::spawn(read_loop(addr.to_string(), read_half, pending.clone()));

        tracing::debug!("Session to {} established", addr);

        Ok(Arc::new(Self {
            addr: addr.to_string(),
            outbound,
            pending,
            next_seq: AtomicU64::new(1),
            tasks: Mutex::new(vec![writer, reader]),
        }))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the connection is still usable
    pub fn is_alive(&self) -> bool {
        !lock_pending(&self.pending).closed
    }

    /// Number of calls awaiting a reply
    pub fn in_flight(&self) -> usize {
        lock_pending(&self.pending).calls.len()
    }

    /// Send one request and wait for its reply or the timeout.
    pub async fn call(
        &self,
        header: RequestHeader,
        body: Request,
        timeout: Duration,
    ) -> Result<RpcResponse> {
        let name = body.name();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock_pending(&self.pending);
            if pending.closed {
                return Err(Error::ConnectionFailed(format!(
                    "session to {} is closed",
                    self.addr
                )));
            }
            pending.calls.insert(seq, tx);
        }

        let frame = match encode_request(&RpcRequest { seq, header, body }) {
            Ok(frame) => frame,
            Err(e) => {
                self.forget(seq);
                return Err(e);
            }
        };

        if self.outbound.send(frame).is_err() {
            self.forget(seq);
            return Err(Error::ConnectionFailed(format!(
                "session to {} is closed",
                self.addr
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::ConnectionFailed(format!(
                "session to {} reset while waiting for {}",
                self.addr, name
            ))),
            Err(_) => {
                self.forget(seq);
                Err(Error::Timeout(format!(
                    "{} to {} after {:?}",
                    name, self.addr, timeout
                )))
            }
        }
    }

    fn forget(&self, seq: u64) {
        lock_pending(&self.pending).calls.remove(&seq);
    }

    /// Fail in-flight calls and stop both tasks. Idempotent.
    pub fn close(&self) {
        let failed = fail_all(&self.pending);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if !tasks.is_empty() {
            tracing::debug!(
                "Closing session to {} ({} in-flight calls failed)",
                self.addr,
                failed
            );
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for ReplicaSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    addr: String,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    pending: SharedPending,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::debug!("Write to {} failed: {}", addr, e);
            break;
        }
    }
    fail_all(&pending);
    let _ = writer.shutdown().await;
}

async fn read_loop(addr: String, mut reader: OwnedReadHalf, pending: SharedPending) {
    loop {
        let body = match read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                tracing::debug!("Session to {} closed by peer", addr);
                break;
            }
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", addr, e);
                break;
            }
        };

        let response = match decode_response(&body) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Undecodable reply from {}: {}", addr, e);
                break;
            }
        };

        let waiter = lock_pending(&pending).calls.remove(&response.seq);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::trace!("Dropping late reply seq={} from {}", response.seq, addr),
        }
    }
    fail_all(&pending);
}
