//! Common utilities and types shared across pegasus-client

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{ClientConfig, CONFIG_ENV};
pub use error::{Error, ErrorCode, Result};
pub use hash::{partition_hash, partition_index, split_partitions};
pub use utils::{
    expire_ts_from_ttl, parse_duration, remaining_ttl, retry_with_backoff, timestamp_now,
    validate_hash_key,
};
