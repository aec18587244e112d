//! Session pool
//!
//! One `ReplicaSession` per server address, connected on first use.
//! Dead sessions are replaced transparently; `close_all` shuts everything
//! down and makes later lookups fail.

use crate::client::session::ReplicaSession;
use crate::common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct SessionPool {
    sessions: Mutex<HashMap<String, Arc<ReplicaSession>>>,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            connect_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Get a live session to `addr`, connecting if needed.
    ///
    /// A fresh connect may take at most `budget`; when that is shorter than
    /// the pool's connect timeout and runs out, the caller's deadline is what
    /// failed and the error is `Timeout`.
    pub async fn get(&self, addr: &str, budget: Duration) -> Result<Arc<ReplicaSession>> {
        self.check_open()?;

        if let Some(session) = self.sessions.lock().await.get(addr) {
            if session.is_alive() {
                return Ok(session.clone());
            }
            tracing::debug!("Replacing dead session to {}", addr);
        }

        // Connect without holding the map lock so one slow address
        // does not stall calls to the others.
        let fresh = if budget < self.connect_timeout {
            tokio::time::timeout(budget, ReplicaSession::connect(addr, self.connect_timeout))
                .await
                .map_err(|_| {
                    Error::Timeout(format!("connect to {} cut short after {:?}", addr, budget))
                })??
        } else {
            ReplicaSession::connect(addr, self.connect_timeout).await?
        };

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(addr) {
            if existing.is_alive() {
                fresh.close();
                return Ok(existing.clone());
            }
        }
        if self.closed.load(Ordering::SeqCst) {
            fresh.close();
            return Err(Error::NotReady("client is closed".into()));
        }
        sessions.insert(addr.to_string(), fresh.clone());
        Ok(fresh)
    }

    /// Close every session; returns how many were open.
    pub async fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        for (_, session) in &drained {
            session.close();
        }
        drained.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::NotReady("client is closed".into()));
        }
        Ok(())
    }
}
