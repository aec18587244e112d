//! Batched scanners
//!
//! A scanner walks one or more partitions, pulling `batch_size` records per
//! round trip through a server-side scan context:
//!
//! ```text
//! context_id = NOT_EXIST  ──get_scanner──►  id >= 0  ──scan──►  ...  ──►  COMPLETED
//!                                             │                              │
//!                                             └──────── clear_scanner ◄── close()
//! ```
//!
//! When a partition reports `COMPLETED` the scanner moves on to its next
//! partition; after the last one it is exhausted and keeps returning `None`.

use crate::client::pegasus::{ClientInner, Target};
use crate::common::{Error, Result};
use crate::protocol::{
    decode_key, Filter, GetScannerRequest, KeyValue, Request, Response, ScanRange,
    CONTEXT_ID_COMPLETED, CONTEXT_ID_NOT_EXIST,
};
use futures_util::Stream;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Options shared by ordered and unordered scanners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Per-batch timeout
    pub timeout: Duration,
    /// Records fetched per round trip
    pub batch_size: u32,
    pub start_inclusive: bool,
    pub stop_inclusive: bool,
    pub hash_key_filter: Filter,
    pub sort_key_filter: Filter,
    /// Return keys only; values come back empty
    pub no_value: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            batch_size: 1000,
            start_inclusive: true,
            stop_inclusive: false,
            hash_key_filter: Filter::default(),
            sort_key_filter: Filter::default(),
            no_value: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanItem {
    pub hash_key: Vec<u8>,
    pub sort_key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    /// No request sent yet
    Created,
    Active,
    /// Every partition has been read
    Exhausted,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanTarget {
    HashKey(Vec<u8>),
    Partition(u32),
}

impl ScanTarget {
    fn as_target(&self) -> Target<'_> {
        match self {
            ScanTarget::HashKey(hash_key) => Target::HashKey(hash_key),
            ScanTarget::Partition(index) => Target::Partition(*index),
        }
    }
}

pub struct Scanner {
    client: Arc<ClientInner>,
    range: ScanRange,
    options: ScanOptions,
    pending: VecDeque<ScanTarget>,
    current: Option<ScanTarget>,
    context_id: i64,
    buffer: VecDeque<KeyValue>,
    state: ScannerState,
}

impl Scanner {
    pub(crate) fn ordered(
        client: Arc<ClientInner>,
        hash_key: Vec<u8>,
        range: ScanRange,
        options: ScanOptions,
    ) -> Self {
        Self::new(
            client,
            range,
            options,
            VecDeque::from([ScanTarget::HashKey(hash_key)]),
        )
    }

    pub(crate) fn unordered(
        client: Arc<ClientInner>,
        partitions: Range<u32>,
        options: ScanOptions,
    ) -> Self {
        Self::new(
            client,
            ScanRange::full(),
            options,
            partitions.map(ScanTarget::Partition).collect(),
        )
    }

    fn new(
        client: Arc<ClientInner>,
        range: ScanRange,
        options: ScanOptions,
        pending: VecDeque<ScanTarget>,
    ) -> Self {
        Self {
            client,
            range,
            options,
            pending,
            current: None,
            context_id: CONTEXT_ID_NOT_EXIST,
            buffer: VecDeque::new(),
            state: ScannerState::Created,
        }
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Partitions not yet started, plus the one in progress.
    pub fn remaining_partitions(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    /// Next record, or `None` once every partition is exhausted.
    ///
    /// A failed batch leaves the scanner where it was; calling again retries
    /// the same batch.
    pub async fn get_next(&mut self) -> Result<Option<ScanItem>> {
        loop {
            if matches!(self.state, ScannerState::Exhausted | ScannerState::Closed) {
                return Ok(None);
            }

            if let Some(kv) = self.buffer.pop_front() {
                let (hash_key, sort_key) = decode_key(&kv.key)?;
                return Ok(Some(ScanItem {
                    hash_key,
                    sort_key,
                    value: kv.value,
                }));
            }

            if self.current.is_none() || self.context_id == CONTEXT_ID_COMPLETED {
                match self.pending.pop_front() {
                    Some(next) => {
                        self.current = Some(next);
                        self.context_id = CONTEXT_ID_NOT_EXIST;
                    }
                    None => {
                        self.current = None;
                        self.state = ScannerState::Exhausted;
                        return Ok(None);
                    }
                }
            }

            self.state = ScannerState::Active;
            self.fetch_batch().await?;
        }
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let Some(current) = &self.current else {
            return Ok(());
        };

        let body = if self.context_id == CONTEXT_ID_NOT_EXIST {
            Request::GetScanner(GetScannerRequest {
                start_key: self.range.start.clone(),
                stop_key: self.range.stop.clone(),
                start_inclusive: self.range.start_inclusive,
                stop_inclusive: self.range.stop_inclusive,
                batch_size: self.options.batch_size.max(1),
                no_value: self.options.no_value,
                hash_key_filter: self.options.hash_key_filter.clone(),
                sort_key_filter: self.options.sort_key_filter.clone(),
            })
        } else {
            Request::Scan {
                context_id: self.context_id,
            }
        };

        let response = self
            .client
            .call(current.as_target(), body, self.options.timeout)
            .await?;

        match response {
            Response::Scan { context_id, .. } if context_id == CONTEXT_ID_NOT_EXIST => {
                Err(Error::Protocol(format!(
                    "{} reply without a scan context",
                    if self.context_id == CONTEXT_ID_NOT_EXIST {
                        "get_scanner"
                    } else {
                        "scan"
                    }
                )))
            }
            Response::Scan { kvs, context_id } => {
                tracing::trace!(
                    "Scan batch of {} records, next context {}",
                    kvs.len(),
                    context_id
                );
                self.buffer.extend(kvs);
                self.context_id = context_id;
                Ok(())
            }
            other => Err(Error::Protocol(format!(
                "unexpected reply to scan: {:?}",
                other
            ))),
        }
    }

    /// Release the server-side context, if any. Idempotent.
    ///
    /// Errors while clearing are logged and ignored; the server expires
    /// abandoned contexts on its own.
    pub async fn close(&mut self) {
        if self.state == ScannerState::Closed {
            return;
        }

        if self.context_id >= 0 {
            if let Some(current) = &self.current {
                let body = Request::ClearScanner {
                    context_id: self.context_id,
                };
                if let Err(e) = self
                    .client
                    .call(current.as_target(), body, self.options.timeout)
                    .await
                {
                    tracing::debug!("Failed to clear scan context {}: {}", self.context_id, e);
                }
            }
        }

        self.context_id = CONTEXT_ID_COMPLETED;
        self.current = None;
        self.pending.clear();
        self.buffer.clear();
        self.state = ScannerState::Closed;
    }

    /// Adapt into a `Stream` of records. The scanner is closed when the
    /// stream ends or yields an error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<ScanItem>> {
        async_stream::stream! {
            loop {
                match self.get_next().await {
                    Ok(Some(item)) => yield Ok(item),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
            self.close().await;
        }
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("context_id", &self.context_id)
            .field("buffered", &self.buffer.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if self.state != ScannerState::Closed && self.context_id >= 0 {
            tracing::warn!(
                "Scanner dropped with open context {}; call close() to release it",
                self.context_id
            );
        }
    }
}
