//! `PegasusClient`: the table-bound handle applications use
//!
//! ## Lifecycle
//! `Created` → `init()` → `Ready` → `close()` → `Closed`
//!
//! Every data operation requires `Ready`; anything else fails with
//! `Error::NotReady` without touching the network.
//!
//! ## Routing
//! Each call locates the partition for its hash key and sends the request
//! to that partition's primary. A stale-route reply or a dead connection
//! triggers one configuration refresh, after which the call is retried
//! while its deadline allows.

use crate::client::meta::MetaResolver;
use crate::client::pool::SessionPool;
use crate::client::table::{Route, RoutingTable};
use crate::common::{
    expire_ts_from_ttl, retry_with_backoff, split_partitions, validate_hash_key, ClientConfig,
    Error, ErrorCode, Result,
};
use crate::protocol::{encode_key, KeyValue, Request, Response, RpcResponse, ScanRange};
use crate::scanner::{ScanOptions, Scanner};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

const STATE_CREATED: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Ready,
    Closed,
}

/// What a request is addressed to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target<'a> {
    HashKey(&'a [u8]),
    Partition(u32),
}

/// Shared by every clone of a client and by the scanners it hands out.
pub(crate) struct ClientInner {
    config: ClientConfig,
    pool: SessionPool,
    meta: MetaResolver,
    routing: RwLock<Option<Arc<RoutingTable>>>,
    refresh: tokio::sync::Mutex<()>,
    state: AtomicU8,
}

impl ClientInner {
    fn state(&self) -> ClientState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CREATED => ClientState::Created,
            STATE_READY => ClientState::Ready,
            _ => ClientState::Closed,
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ClientState::Ready => Ok(()),
            ClientState::Created => Err(Error::NotReady(format!(
                "client for table {} is not initialized",
                self.config.table
            ))),
            ClientState::Closed => Err(Error::NotReady(format!(
                "client for table {} is closed",
                self.config.table
            ))),
        }
    }

    fn routing_table(&self) -> Result<Arc<RoutingTable>> {
        self.routing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::NotReady(format!("no routing for table {}", self.config.table)))
    }

    fn install(&self, table: RoutingTable) {
        *self.routing.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(table));
    }

    async fn resolve(&self, timeout: Duration, deadline: Instant) -> Result<RoutingTable> {
        let table = self.config.table.as_str();
        let config = self
            .meta
            .query_config(&self.pool, table, timeout, deadline)
            .await?;
        RoutingTable::from_config(table, config)
    }

    /// Replace `stale` with a fresh configuration unless another caller
    /// already did.
    async fn refresh(&self, stale: &Arc<RoutingTable>, timeout: Duration) -> Result<()> {
        let _guard = self.refresh.lock().await;
        if let Ok(current) = self.routing_table() {
            if !Arc::ptr_eq(&current, stale) {
                return Ok(());
            }
        }
        let table = self.resolve(timeout, Instant::now() + timeout).await?;
        tracing::debug!(
            "Refreshed routing for table {} ({} partitions)",
            table.table(),
            table.partition_count()
        );
        self.install(table);
        Ok(())
    }

    /// Send `body` to the primary for `target`, refreshing routing and
    /// retrying on stale-route replies until `timeout` elapses.
    pub(crate) async fn call(
        &self,
        target: Target<'_>,
        body: Request,
        timeout: Duration,
    ) -> Result<Response> {
        let name = body.name();
        let deadline = Instant::now() + timeout;
        let retry_delay = self.config.retry_delay();

        loop {
            self.ensure_ready()?;
            let table = self.routing_table()?;
            let route = match target {
                Target::HashKey(hash_key) => table.locate(hash_key),
                Target::Partition(index) => table.partition(index),
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!("{} after {:?}", name, timeout)));
            }

            let err = match self.send(&route, body.clone(), remaining).await {
                Ok(response) if response.code.is_ok() => return Ok(response.body),
                Ok(response) => Error::from_code(
                    response.code,
                    format!("{} on partition {}", name, route.gpid),
                ),
                Err(e) => e,
            };

            if !err.needs_route_refresh() {
                return Err(err);
            }
            if Instant::now() + retry_delay >= deadline {
                return Err(err);
            }

            tracing::debug!(
                "{} on partition {} needs fresh routing: {}",
                name,
                route.gpid,
                err
            );
            tokio::time::sleep(retry_delay).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = self.refresh(&table, remaining).await {
                tracing::warn!(
                    "Routing refresh for table {} failed: {}",
                    self.config.table,
                    e
                );
            }
        }
    }

    async fn send(&self, route: &Route, body: Request, timeout: Duration) -> Result<RpcResponse> {
        let primary = route.primary.as_deref().ok_or_else(|| {
            Error::from_code(
                ErrorCode::InvalidState,
                format!("partition {} has no primary", route.gpid),
            )
        })?;
        let started = Instant::now();
        let session = self.pool.get(primary, timeout).await?;
        let timeout = timeout.saturating_sub(started.elapsed());
        if timeout.is_zero() {
            return Err(Error::Timeout(format!(
                "{} to {}: deadline spent connecting",
                body.name(),
                primary
            )));
        }
        session.call(route.header(timeout), body, timeout).await
    }
}

/// Async client bound to one table.
///
/// Cheap to clone; clones share connections and routing.
#[derive(Clone)]
pub struct PegasusClient {
    inner: Arc<ClientInner>,
    timeout: Duration,
}

impl std::fmt::Debug for PegasusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PegasusClient")
            .field("table", &self.inner.config.table)
            .field("meta_servers", &self.inner.config.meta_servers)
            .field("state", &self.inner.state())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PegasusClient {
    /// Build a client without any I/O. Call `init` before use.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.operation_timeout();
        let inner = ClientInner {
            pool: SessionPool::new(config.connect_timeout()),
            meta: MetaResolver::new(config.meta_servers.clone()),
            routing: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(STATE_CREATED),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
            timeout,
        })
    }

    /// `new` followed by `init`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.init().await?;
        Ok(client)
    }

    /// Resolve the table's partitions from the meta servers.
    ///
    /// Retries unreachable meta servers until the configured init timeout.
    /// Fails with `TableNotFound` for an unknown table and `NotReady` when
    /// no meta server answered. Calling it again on a ready client reloads
    /// the routing table.
    pub async fn init(&self) -> Result<()> {
        let inner: &ClientInner = &self.inner;
        if inner.state() == ClientState::Closed {
            return Err(Error::NotReady("client is closed".into()));
        }

        let table_name = inner.config.table.clone();
        let timeout = inner.config.operation_timeout();
        let deadline = Instant::now() + inner.config.init_timeout();

        let table = retry_with_backoff(
            move || inner.resolve(timeout, deadline),
            deadline,
            inner.config.retry_delay(),
        )
        .await
        .map_err(|e| match e {
            Error::TableNotFound(_) | Error::NotReady(_) | Error::Protocol(_) => e,
            other => Error::NotReady(format!(
                "cannot resolve table {}: {}",
                table_name, other
            )),
        })?;

        tracing::info!(
            "Table {} ready: app_id={}, {} partitions",
            table_name,
            table.app_id(),
            table.partition_count()
        );
        inner.install(table);

        match inner.state.compare_exchange(
            STATE_CREATED,
            STATE_READY,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(()),
            Err(STATE_READY) => Ok(()),
            Err(_) => Err(Error::NotReady("client closed during init".into())),
        }
    }

    /// Release every connection. Idempotent; later calls fail with `NotReady`.
    pub async fn close(&self) {
        if self.inner.state.swap(STATE_CLOSED, Ordering::SeqCst) == STATE_CLOSED {
            return;
        }
        let released = self.inner.pool.close_all().await;
        *self
            .inner
            .routing
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!(
            "Client for table {} closed, {} sessions released",
            self.inner.config.table,
            released
        );
    }

    /// A handle sharing this client's connections with a different
    /// per-operation timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            inner: self.inner.clone(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    pub fn table_name(&self) -> &str {
        &self.inner.config.table
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Partition count of the resolved table, once initialized.
    pub fn partition_count(&self) -> Option<u32> {
        self.inner
            .routing_table()
            .ok()
            .map(|table| table.partition_count())
    }

    // === Single-record operations ===

    pub async fn set(&self, hash_key: &[u8], sort_key: &[u8], value: &[u8]) -> Result<()> {
        self.set_with_ttl(hash_key, sort_key, value, 0).await
    }

    /// Store a record that expires `ttl_seconds` from now; `0` never expires.
    pub async fn set_with_ttl(
        &self,
        hash_key: &[u8],
        sort_key: &[u8],
        value: &[u8],
        ttl_seconds: u32,
    ) -> Result<()> {
        self.inner.ensure_ready()?;
        let body = Request::Put {
            key: encode_key(hash_key, sort_key)?,
            value: value.to_vec(),
            expire_ts_seconds: expire_ts_from_ttl(ttl_seconds),
        };
        let response = self.call(hash_key, body).await?;
        expect_empty(response, "set")
    }

    pub async fn get(&self, hash_key: &[u8], sort_key: &[u8]) -> Result<Vec<u8>> {
        self.inner.ensure_ready()?;
        let body = Request::Get {
            key: encode_key(hash_key, sort_key)?,
        };
        match self.call(hash_key, body).await? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected("get", &other)),
        }
    }

    /// Removing an absent record succeeds.
    pub async fn remove(&self, hash_key: &[u8], sort_key: &[u8]) -> Result<()> {
        self.inner.ensure_ready()?;
        let body = Request::Remove {
            key: encode_key(hash_key, sort_key)?,
        };
        let response = self.call(hash_key, body).await?;
        expect_empty(response, "remove")
    }

    /// `Ok(())` when the record exists, `Err(Error::DataNotExist)` when not.
    pub async fn exist(&self, hash_key: &[u8], sort_key: &[u8]) -> Result<()> {
        self.ttl(hash_key, sort_key).await.map(|_| ())
    }

    /// Remaining seconds to live; `-1` when the record never expires.
    pub async fn ttl(&self, hash_key: &[u8], sort_key: &[u8]) -> Result<i32> {
        self.inner.ensure_ready()?;
        let body = Request::Ttl {
            key: encode_key(hash_key, sort_key)?,
        };
        match self.call(hash_key, body).await? {
            Response::Ttl(ttl) => Ok(ttl),
            other => Err(unexpected("ttl", &other)),
        }
    }

    // === Multi-record operations within one hash key ===

    pub async fn multi_set<I, K, V>(&self, hash_key: &[u8], kvs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        self.multi_set_with_ttl(hash_key, kvs, 0).await
    }

    /// Write several sort keys of one hash key atomically.
    pub async fn multi_set_with_ttl<I, K, V>(
        &self,
        hash_key: &[u8],
        kvs: I,
        ttl_seconds: u32,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        self.inner.ensure_ready()?;
        validate_hash_key(hash_key)?;
        let kvs: Vec<KeyValue> = kvs
            .into_iter()
            .map(|(k, v)| KeyValue {
                key: k.into(),
                value: v.into(),
            })
            .collect();
        if kvs.is_empty() {
            return Err(Error::InvalidArgument("multi_set needs at least one pair".into()));
        }
        let body = Request::MultiPut {
            hash_key: hash_key.to_vec(),
            kvs,
            expire_ts_seconds: expire_ts_from_ttl(ttl_seconds),
        };
        let response = self.call(hash_key, body).await?;
        expect_empty(response, "multi_set")
    }

    /// Fetch the listed sort keys, or every sort key when `sort_keys` is
    /// empty. Absent sort keys are left out of the result.
    pub async fn multi_get<I, K>(
        &self,
        hash_key: &[u8],
        sort_keys: I,
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Vec<u8>>,
    {
        self.inner.ensure_ready()?;
        validate_hash_key(hash_key)?;
        let sort_keys: BTreeSet<Vec<u8>> = sort_keys.into_iter().map(Into::into).collect();
        let body = Request::MultiGet {
            hash_key: hash_key.to_vec(),
            sort_keys: sort_keys.into_iter().collect(),
            no_value: false,
        };
        match self.call(hash_key, body).await? {
            Response::KeyValues(kvs) => Ok(kvs.into_iter().map(|kv| (kv.key, kv.value)).collect()),
            other => Err(unexpected("multi_get", &other)),
        }
    }

    /// Remove the listed sort keys.
    ///
    /// Deletion is idempotent per key, so the returned count is the number
    /// of distinct sort keys requested whether or not they existed.
    pub async fn multi_del<I, K>(&self, hash_key: &[u8], sort_keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: Into<Vec<u8>>,
    {
        self.inner.ensure_ready()?;
        validate_hash_key(hash_key)?;
        let sort_keys: BTreeSet<Vec<u8>> = sort_keys.into_iter().map(Into::into).collect();
        if sort_keys.is_empty() {
            return Err(Error::InvalidArgument("multi_del needs at least one sort key".into()));
        }
        let requested = sort_keys.len();
        let body = Request::MultiRemove {
            hash_key: hash_key.to_vec(),
            sort_keys: sort_keys.into_iter().collect(),
        };
        match self.call(hash_key, body).await? {
            Response::Count(_) => Ok(requested),
            other => Err(unexpected("multi_del", &other)),
        }
    }

    pub async fn sort_key_count(&self, hash_key: &[u8]) -> Result<i64> {
        self.inner.ensure_ready()?;
        validate_hash_key(hash_key)?;
        let body = Request::SortKeyCount {
            hash_key: hash_key.to_vec(),
        };
        match self.call(hash_key, body).await? {
            Response::Count(count) => Ok(count),
            other => Err(unexpected("sort_key_count", &other)),
        }
    }

    /// Every sort key under `hash_key`, ascending.
    pub async fn get_sort_keys(&self, hash_key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.inner.ensure_ready()?;
        validate_hash_key(hash_key)?;
        let body = Request::MultiGet {
            hash_key: hash_key.to_vec(),
            sort_keys: Vec::new(),
            no_value: true,
        };
        match self.call(hash_key, body).await? {
            Response::KeyValues(kvs) => Ok(kvs.into_iter().map(|kv| kv.key).collect()),
            other => Err(unexpected("get_sort_keys", &other)),
        }
    }

    // === Scanners ===

    /// Ordered scan over the sort keys of one hash key.
    ///
    /// Empty `start_sort_key` / `stop_sort_key` mean the first / last sort
    /// key. No request is sent until the first `get_next`.
    pub fn get_scanner(
        &self,
        hash_key: &[u8],
        start_sort_key: &[u8],
        stop_sort_key: &[u8],
        options: ScanOptions,
    ) -> Result<Scanner> {
        self.inner.ensure_ready()?;
        let range = ScanRange::for_hash_key(
            hash_key,
            start_sort_key,
            stop_sort_key,
            options.start_inclusive,
            options.stop_inclusive,
        )?;
        Ok(Scanner::ordered(
            self.inner.clone(),
            hash_key.to_vec(),
            range,
            options,
        ))
    }

    /// Split the whole table into exactly `split_count` scanners covering
    /// disjoint groups of partitions. Scanners beyond the partition count
    /// are empty.
    pub fn get_unordered_scanners(
        &self,
        split_count: usize,
        options: ScanOptions,
    ) -> Result<Vec<Scanner>> {
        self.inner.ensure_ready()?;
        if split_count == 0 {
            return Err(Error::InvalidArgument("split_count must be positive".into()));
        }
        let table = self.inner.routing_table()?;
        Ok(split_partitions(table.partition_count(), split_count)
            .into_iter()
            .map(|partitions| Scanner::unordered(self.inner.clone(), partitions, options.clone()))
            .collect())
    }

    async fn call(&self, hash_key: &[u8], body: Request) -> Result<Response> {
        self.inner
            .call(Target::HashKey(hash_key), body, self.timeout)
            .await
    }
}

fn expect_empty(response: Response, op: &str) -> Result<()> {
    match response {
        Response::Empty => Ok(()),
        other => Err(unexpected(op, &other)),
    }
}

fn unexpected(op: &str, response: &Response) -> Error {
    Error::Protocol(format!("unexpected reply to {}: {:?}", op, response))
}
