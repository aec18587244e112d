//! Wire protocol between the client and the cluster
//!
//! - `message`: request/response types and routing header
//! - `key`: composite `(hash_key, sort_key)` layout and scan ranges
//! - `filter`: hash-key / sort-key filters applied during scans
//! - `codec`: length + CRC32 framed bincode

pub mod codec;
pub mod filter;
pub mod key;
pub mod message;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_frame, write_frame,
    FRAME_HEADER_SIZE, MAX_FRAME_SIZE,
};
pub use filter::{Filter, FilterType};
pub use key::{decode_key, encode_key, next_prefix, ScanRange};
pub use message::{
    GetScannerRequest, Gpid, KeyValue, PartitionConfiguration, QueryConfigResponse, Request,
    RequestHeader, Response, RpcRequest, RpcResponse, CONTEXT_ID_COMPLETED, CONTEXT_ID_NOT_EXIST,
};
