//! # pegasus-client
//!
//! An async client for Pegasus-style distributed key-value stores, where
//! every record is addressed by a `(hash_key, sort_key)` pair:
//! - Hash keys pick the partition; sort keys order records within it
//! - Single-record get/set/remove/exist/ttl with optional expiry
//! - Atomic multi-record operations within one hash key
//! - Ordered scans of one hash key and unordered scans of the whole table
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              PegasusClient               │
//! │  routing table  ◄── query_config ──┐     │
//! └──────┬─────────────────────────────┼─────┘
//!        │ hash(hash_key) % count      │
//!   ┌────┴──────────┬──────────┐  ┌────┴──────────┐
//!   │               │          │  │  Meta servers │
//! ┌─▼──────────┐ ┌──▼───────┐  │  │ (leader hint) │
//! │ Primary p0 │ │Primary p1│ ...  └───────────────┘
//! └────────────┘ └──────────┘
//! ```
//!
//! One multiplexed TCP session per server carries every in-flight request.
//!
//! ## Usage
//!
//! ```no_run
//! use pegasus_client::{ClientConfig, PegasusClient, ScanOptions};
//!
//! # async fn demo() -> pegasus_client::Result<()> {
//! let client = PegasusClient::connect(ClientConfig::new(["127.0.0.1:34601"], "temp")).await?;
//!
//! client.set(b"user:42", b"name", b"alice").await?;
//! let name = client.get(b"user:42", b"name").await?;
//! assert_eq!(name, b"alice");
//!
//! let mut scanner = client.get_scanner(b"user:42", b"", b"", ScanOptions::default())?;
//! while let Some(item) = scanner.get_next().await? {
//!     println!("{:?} => {:?}", item.sort_key, item.value);
//! }
//! scanner.close().await;
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Use the CLI
//! ```bash
//! pegasus-cli --meta 127.0.0.1:34601 --table temp set user:42 name alice
//! pegasus-cli --meta 127.0.0.1:34601 --table temp scan user:42 --limit 10
//! ```

pub mod client;
pub mod common;
pub mod protocol;
pub mod scanner;

// Re-export commonly used types
pub use client::{ClientState, PegasusClient};
pub use common::{ClientConfig, Error, ErrorCode, Result};
pub use protocol::{Filter, FilterType};
pub use scanner::{ScanItem, ScanOptions, Scanner, ScannerState};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
