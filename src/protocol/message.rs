//! Request and response messages
//!
//! Every call travels as an `RpcRequest` and is answered by an `RpcResponse`
//! carrying the same `seq`. Several calls may be in flight on one connection.

use super::filter::Filter;
use crate::common::ErrorCode;
use serde::{Deserialize, Serialize};

/// Scan has not opened a server context yet.
pub const CONTEXT_ID_NOT_EXIST: i64 = -1;
/// Server context reached the end of its range.
pub const CONTEXT_ID_COMPLETED: i64 = -2;

/// Partition identity: table id plus partition index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Gpid {
    pub app_id: i32,
    pub partition_index: u32,
}

impl std::fmt::Display for Gpid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.app_id, self.partition_index)
    }
}

/// Routing header sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestHeader {
    pub gpid: Gpid,
    pub partition_hash: u64,
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Opens a scan context on a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetScannerRequest {
    /// Composite start key; empty means the beginning of the partition
    pub start_key: Vec<u8>,
    /// Composite stop key; empty means the end of the partition
    pub stop_key: Vec<u8>,
    pub start_inclusive: bool,
    pub stop_inclusive: bool,
    pub batch_size: u32,
    pub no_value: bool,
    pub hash_key_filter: Filter,
    pub sort_key_filter: Filter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Ask a meta server for a table's partition configuration
    QueryConfig { table: String },
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        expire_ts_seconds: u64,
    },
    Remove { key: Vec<u8> },
    Get { key: Vec<u8> },
    Ttl { key: Vec<u8> },
    MultiPut {
        hash_key: Vec<u8>,
        kvs: Vec<KeyValue>,
        expire_ts_seconds: u64,
    },
    /// Empty `sort_keys` fetches the whole hash key
    MultiGet {
        hash_key: Vec<u8>,
        sort_keys: Vec<Vec<u8>>,
        no_value: bool,
    },
    MultiRemove {
        hash_key: Vec<u8>,
        sort_keys: Vec<Vec<u8>>,
    },
    SortKeyCount { hash_key: Vec<u8> },
    GetScanner(GetScannerRequest),
    Scan { context_id: i64 },
    ClearScanner { context_id: i64 },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::QueryConfig { .. } => "query_config",
            Request::Put { .. } => "put",
            Request::Remove { .. } => "remove",
            Request::Get { .. } => "get",
            Request::Ttl { .. } => "ttl",
            Request::MultiPut { .. } => "multi_put",
            Request::MultiGet { .. } => "multi_get",
            Request::MultiRemove { .. } => "multi_remove",
            Request::SortKeyCount { .. } => "sort_key_count",
            Request::GetScanner(_) => "get_scanner",
            Request::Scan { .. } => "scan",
            Request::ClearScanner { .. } => "clear_scanner",
        }
    }
}

/// One partition as described by the meta server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfiguration {
    pub pid: Gpid,
    pub ballot: i64,
    pub primary: Option<String>,
    pub secondaries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfigResponse {
    pub app_id: i32,
    pub partition_count: u32,
    pub partitions: Vec<PartitionConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Empty,
    Config(QueryConfigResponse),
    /// Meta server is not the leader; `leader` is a hint when known
    Forward { leader: Option<String> },
    Value(Vec<u8>),
    Ttl(i32),
    KeyValues(Vec<KeyValue>),
    Count(i64),
    Scan { kvs: Vec<KeyValue>, context_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub seq: u64,
    pub header: RequestHeader,
    pub body: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub seq: u64,
    pub code: ErrorCode,
    pub body: Response,
}

impl RpcResponse {
    pub fn ok(seq: u64, body: Response) -> Self {
        Self {
            seq,
            code: ErrorCode::Ok,
            body,
        }
    }

    pub fn error(seq: u64, code: ErrorCode) -> Self {
        Self {
            seq,
            code,
            body: Response::Empty,
        }
    }
}
