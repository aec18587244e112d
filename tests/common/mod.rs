//! In-process cluster for integration tests
//!
//! One meta server and one replica server on ephemeral loopback ports. The
//! replica hosts every partition of a single table in memory and honors
//! TTLs, multi-record operations, scan contexts and filters. Knobs on
//! `ClusterState` inject faults: stalled writes, stale-route replies and
//! dropped connections.

#![allow(dead_code)]

use pegasus_client::common::{remaining_ttl, timestamp_now};
use pegasus_client::protocol::{
    decode_key, decode_request, encode_key, encode_response, read_frame, write_frame, Gpid,
    KeyValue, PartitionConfiguration, QueryConfigResponse, Request, Response, RpcRequest,
    RpcResponse, ScanRange, CONTEXT_ID_COMPLETED, CONTEXT_ID_NOT_EXIST,
};
use pegasus_client::{ClientConfig, ErrorCode, PegasusClient};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

pub const TABLE: &str = "temp";
pub const APP_ID: i32 = 7;

#[derive(Debug, Clone)]
struct Record {
    value: Vec<u8>,
    expire_ts: u64,
}

impl Record {
    fn is_live(&self, now: u64) -> bool {
        self.expire_ts == 0 || self.expire_ts > now
    }
}

struct ScanContext {
    remaining: VecDeque<KeyValue>,
    batch_size: usize,
}

#[derive(Clone)]
enum Role {
    Meta,
    Follower(Option<String>),
    Replica,
}

pub struct ClusterState {
    pub partition_count: u32,
    replica_addr: String,
    /// Primary handed out by the meta server instead of our replica
    pub primary_override: Mutex<Option<String>>,
    partitions: Mutex<Vec<BTreeMap<Vec<u8>, Record>>>,
    contexts: Mutex<HashMap<i64, ScanContext>>,
    next_context: AtomicI64,

    /// Drop (never answer) puts whose value is larger than this
    pub stall_values_over: AtomicUsize,
    /// Answer this many replica requests with ERR_INVALID_STATE
    pub stale_replies: AtomicUsize,
    /// Close the connection instead of answering the next replica request
    pub reset_next: AtomicBool,
    /// Answer scans that have more to send with context id -1
    pub lose_contexts: AtomicBool,

    pub config_queries: AtomicUsize,
    pub replica_requests: AtomicUsize,
}

impl ClusterState {
    fn configuration(&self) -> QueryConfigResponse {
        let primary = self
            .primary_override
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.replica_addr.clone());
        QueryConfigResponse {
            app_id: APP_ID,
            partition_count: self.partition_count,
            partitions: (0..self.partition_count)
                .map(|i| PartitionConfiguration {
                    pid: Gpid {
                        app_id: APP_ID,
                        partition_index: i,
                    },
                    ballot: 1,
                    primary: Some(primary.clone()),
                    secondaries: Vec::new(),
                })
                .collect(),
        }
    }

    /// Scan contexts still held by the replica.
    pub fn open_contexts(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    /// Records stored across all partitions, expired ones included.
    pub fn record_count(&self) -> usize {
        self.partitions.lock().unwrap().iter().map(BTreeMap::len).sum()
    }

    fn handle_meta(&self, request: RpcRequest) -> RpcResponse {
        self.config_queries.fetch_add(1, Ordering::SeqCst);
        match request.body {
            Request::QueryConfig { table } if table == TABLE => {
                RpcResponse::ok(request.seq, Response::Config(self.configuration()))
            }
            Request::QueryConfig { .. } => RpcResponse::error(request.seq, ErrorCode::ObjectNotFound),
            _ => RpcResponse::error(request.seq, ErrorCode::HandlerNotFound),
        }
    }

    /// `None` means the request is swallowed without a reply.
    fn handle_replica(&self, request: RpcRequest) -> Option<RpcResponse> {
        self.replica_requests.fetch_add(1, Ordering::SeqCst);
        let seq = request.seq;

        if self
            .stale_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Some(RpcResponse::error(seq, ErrorCode::InvalidState));
        }

        if let Request::Put { value, .. } = &request.body {
            if value.len() > self.stall_values_over.load(Ordering::SeqCst) {
                return None;
            }
        }

        let gpid = request.header.gpid;
        if gpid.app_id != APP_ID || gpid.partition_index >= self.partition_count {
            return Some(RpcResponse::error(seq, ErrorCode::ObjectNotFound));
        }
        if request.header.partition_hash % self.partition_count as u64
            != gpid.partition_index as u64
        {
            return Some(RpcResponse::error(seq, ErrorCode::ParentPartitionMisused));
        }

        let result = self.apply(gpid.partition_index as usize, request.body);
        Some(match result {
            Ok(body) => RpcResponse::ok(seq, body),
            Err(code) => RpcResponse::error(seq, code),
        })
    }

    fn apply(&self, partition: usize, body: Request) -> Result<Response, ErrorCode> {
        let now = timestamp_now();
        let mut partitions = self.partitions.lock().unwrap();
        let data = &mut partitions[partition];

        match body {
            Request::Put {
                key,
                value,
                expire_ts_seconds,
            } => {
                data.insert(
                    key,
                    Record {
                        value,
                        expire_ts: expire_ts_seconds,
                    },
                );
                Ok(Response::Empty)
            }
            Request::Remove { key } => {
                data.remove(&key);
                Ok(Response::Empty)
            }
            Request::Get { key } => live(data, &key, now)
                .map(|r| Response::Value(r.value.clone()))
                .ok_or(ErrorCode::DataNotExist),
            Request::Ttl { key } => live(data, &key, now)
                .and_then(|r| remaining_ttl(r.expire_ts, now))
                .map(Response::Ttl)
                .ok_or(ErrorCode::DataNotExist),
            Request::MultiPut {
                hash_key,
                kvs,
                expire_ts_seconds,
            } => {
                for kv in kvs {
                    let key = encode_key(&hash_key, &kv.key).map_err(|_| ErrorCode::InvalidParameters)?;
                    data.insert(
                        key,
                        Record {
                            value: kv.value,
                            expire_ts: expire_ts_seconds,
                        },
                    );
                }
                Ok(Response::Empty)
            }
            Request::MultiGet {
                hash_key,
                sort_keys,
                no_value,
            } => {
                let mut kvs = if sort_keys.is_empty() {
                    hash_key_records(data, &hash_key, now)?
                } else {
                    let mut found = Vec::new();
                    for sort_key in sort_keys {
                        let key = encode_key(&hash_key, &sort_key)
                            .map_err(|_| ErrorCode::InvalidParameters)?;
                        if let Some(record) = live(data, &key, now) {
                            found.push(KeyValue {
                                key: sort_key,
                                value: record.value.clone(),
                            });
                        }
                    }
                    found
                };
                if no_value {
                    kvs.iter_mut().for_each(|kv| kv.value.clear());
                }
                Ok(Response::KeyValues(kvs))
            }
            Request::MultiRemove {
                hash_key,
                sort_keys,
            } => {
                let requested = sort_keys.len() as i64;
                for sort_key in sort_keys {
                    let key = encode_key(&hash_key, &sort_key)
                        .map_err(|_| ErrorCode::InvalidParameters)?;
                    data.remove(&key);
                }
                Ok(Response::Count(requested))
            }
            Request::SortKeyCount { hash_key } => {
                Ok(Response::Count(hash_key_records(data, &hash_key, now)?.len() as i64))
            }
            Request::GetScanner(scan) => {
                let range = ScanRange {
                    start: scan.start_key,
                    stop: scan.stop_key,
                    start_inclusive: scan.start_inclusive,
                    stop_inclusive: scan.stop_inclusive,
                };
                let mut matched: VecDeque<KeyValue> = data
                    .iter()
                    .filter(|(key, record)| range.contains(key) && record.is_live(now))
                    .filter_map(|(key, record)| {
                        let (hash_key, sort_key) = decode_key(key).ok()?;
                        let passes = scan.hash_key_filter.matches(&hash_key)
                            && scan.sort_key_filter.matches(&sort_key);
                        passes.then(|| KeyValue {
                            key: key.clone(),
                            value: if scan.no_value {
                                Vec::new()
                            } else {
                                record.value.clone()
                            },
                        })
                    })
                    .collect();
                drop(partitions);

                let batch_size = scan.batch_size.max(1) as usize;
                let kvs = take_batch(&mut matched, batch_size);
                let context_id = if matched.is_empty() {
                    CONTEXT_ID_COMPLETED
                } else if self.lose_contexts.load(Ordering::SeqCst) {
                    CONTEXT_ID_NOT_EXIST
                } else {
                    let id = self.next_context.fetch_add(1, Ordering::SeqCst);
                    self.contexts.lock().unwrap().insert(
                        id,
                        ScanContext {
                            remaining: matched,
                            batch_size,
                        },
                    );
                    id
                };
                Ok(Response::Scan { kvs, context_id })
            }
            Request::Scan { context_id } => {
                drop(partitions);
                let mut contexts = self.contexts.lock().unwrap();
                let context = contexts
                    .get_mut(&context_id)
                    .ok_or(ErrorCode::HandlerNotFound)?;
                let kvs = take_batch(&mut context.remaining, context.batch_size);
                let next = if context.remaining.is_empty() {
                    contexts.remove(&context_id);
                    CONTEXT_ID_COMPLETED
                } else {
                    context_id
                };
                Ok(Response::Scan {
                    kvs,
                    context_id: next,
                })
            }
            Request::ClearScanner { context_id } => {
                drop(partitions);
                self.contexts.lock().unwrap().remove(&context_id);
                Ok(Response::Empty)
            }
            Request::QueryConfig { .. } => Err(ErrorCode::HandlerNotFound),
        }
    }
}

fn live<'a>(data: &'a BTreeMap<Vec<u8>, Record>, key: &[u8], now: u64) -> Option<&'a Record> {
    data.get(key).filter(|r| r.is_live(now))
}

/// Live `(sort_key, value)` pairs of one hash key, ascending.
fn hash_key_records(
    data: &BTreeMap<Vec<u8>, Record>,
    hash_key: &[u8],
    now: u64,
) -> Result<Vec<KeyValue>, ErrorCode> {
    let range = ScanRange::for_hash_key(hash_key, b"", b"", true, false)
        .map_err(|_| ErrorCode::InvalidParameters)?;
    Ok(data
        .iter()
        .filter(|(key, record)| range.contains(key) && record.is_live(now))
        .filter_map(|(key, record)| {
            let (_, sort_key) = decode_key(key).ok()?;
            Some(KeyValue {
                key: sort_key,
                value: record.value.clone(),
            })
        })
        .collect())
}

fn take_batch(queue: &mut VecDeque<KeyValue>, batch_size: usize) -> Vec<KeyValue> {
    let n = batch_size.min(queue.len());
    queue.drain(..n).collect()
}

async fn serve(listener: TcpListener, state: Arc<ClusterState>, role: Role) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(handle_connection(stream, state.clone(), role.clone()));
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<ClusterState>, role: Role) {
    let (mut reader, mut writer) = stream.into_split();
    while let Ok(Some(body)) = read_frame(&mut reader).await {
        let Ok(request) = decode_request(&body) else {
            break;
        };

        let response = match &role {
            Role::Meta => Some(state.handle_meta(request)),
            Role::Follower(leader) => Some(RpcResponse {
                seq: request.seq,
                code: ErrorCode::ForwardToOthers,
                body: Response::Forward {
                    leader: leader.clone(),
                },
            }),
            Role::Replica => {
                if state.reset_next.swap(false, Ordering::SeqCst) {
                    break;
                }
                state.handle_replica(request)
            }
        };

        if let Some(response) = response {
            let frame = encode_response(&response).unwrap();
            if write_frame(&mut writer, &frame).await.is_err() {
                break;
            }
        }
    }
}

pub struct TestCluster {
    pub meta_addr: String,
    pub replica_addr: String,
    pub state: Arc<ClusterState>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestCluster {
    pub async fn start(partition_count: u32) -> Self {
        let meta = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let replica = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let meta_addr = meta.local_addr().unwrap().to_string();
        let replica_addr = replica.local_addr().unwrap().to_string();

        let state = Arc::new(ClusterState {
            partition_count,
            replica_addr: replica_addr.clone(),
            primary_override: Mutex::new(None),
            partitions: Mutex::new(vec![BTreeMap::new(); partition_count as usize]),
            contexts: Mutex::new(HashMap::new()),
            next_context: AtomicI64::new(1),
            stall_values_over: AtomicUsize::new(usize::MAX),
            stale_replies: AtomicUsize::new(0),
            reset_next: AtomicBool::new(false),
            lose_contexts: AtomicBool::new(false),
            config_queries: AtomicUsize::new(0),
            replica_requests: AtomicUsize::new(0),
        });

        let tasks = vec![
            tokio::spawn(serve(meta, state.clone(), Role::Meta)),
            tokio::spawn(serve(replica, state.clone(), Role::Replica)),
        ];

        Self {
            meta_addr,
            replica_addr,
            state,
            tasks,
        }
    }

    /// Start a meta server that is not the leader and points at ours.
    pub async fn start_follower(&mut self, hint: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let leader = hint.then(|| self.meta_addr.clone());
        self.tasks.push(tokio::spawn(serve(
            listener,
            self.state.clone(),
            Role::Follower(leader),
        )));
        addr
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            meta_servers: vec![self.meta_addr.clone()],
            table: TABLE.to_string(),
            operation_timeout_ms: 1000,
            connect_timeout_ms: 500,
            init_timeout_ms: 2000,
            retry_delay_ms: 20,
        }
    }

    pub async fn client(&self) -> PegasusClient {
        PegasusClient::connect(self.config()).await.unwrap()
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

/// A listener whose accept queue is full, so new connects hang.
///
/// Nothing is ever accepted; keep the value alive for as long as the
/// address should stay unresponsive.
pub struct Unresponsive {
    pub addr: String,
    _listener: TcpListener,
    _queued: Vec<TcpStream>,
}

pub async fn unresponsive_addr() -> Unresponsive {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let local = listener.local_addr().unwrap();

    let mut queued = Vec::new();
    for _ in 0..16 {
        match tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(local)).await {
            Ok(Ok(stream)) => queued.push(stream),
            _ => break,
        }
    }

    Unresponsive {
        addr: local.to_string(),
        _listener: listener,
        _queued: queued,
    }
}

pub fn random_hash_key() -> Vec<u8> {
    format!("hk-{}", uuid::Uuid::new_v4()).into_bytes()
}
