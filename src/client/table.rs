//! Routing table for one table
//!
//! Built from a meta server's partition configuration. Maps a hash key to
//! its partition and the address of that partition's primary.

use crate::common::{partition_hash, partition_index, Error, Result};
use crate::protocol::{Gpid, QueryConfigResponse, RequestHeader};
use std::time::Duration;

/// Where one request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub gpid: Gpid,
    pub partition_hash: u64,
    pub primary: Option<String>,
}

impl Route {
    pub fn header(&self, timeout: Duration) -> RequestHeader {
        RequestHeader {
            gpid: self.gpid,
            partition_hash: self.partition_hash,
            timeout_ms: timeout.as_millis().min(u32::MAX as u128) as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    table: String,
    app_id: i32,
    primaries: Vec<Option<String>>,
}

impl RoutingTable {
    pub fn from_config(table: &str, config: QueryConfigResponse) -> Result<Self> {
        let count = config.partition_count;
        if count == 0 {
            return Err(Error::Protocol(format!(
                "table {} reported zero partitions",
                table
            )));
        }

        let mut primaries = vec![None; count as usize];
        let mut seen = vec![false; count as usize];
        for partition in config.partitions {
            let index = partition.pid.partition_index;
            if index >= count || partition.pid.app_id != config.app_id {
                return Err(Error::Protocol(format!(
                    "table {}: unexpected partition {}",
                    table, partition.pid
                )));
            }
            seen[index as usize] = true;
            primaries[index as usize] = partition.primary.filter(|p| !p.is_empty());
        }

        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(Error::Protocol(format!(
                "table {}: partition {} missing from configuration",
                table, missing
            )));
        }

        Ok(Self {
            table: table.to_string(),
            app_id: config.app_id,
            primaries,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn app_id(&self) -> i32 {
        self.app_id
    }

    pub fn partition_count(&self) -> u32 {
        self.primaries.len() as u32
    }

    /// Route for a hash key.
    pub fn locate(&self, hash_key: &[u8]) -> Route {
        let hash = partition_hash(hash_key);
        let index = partition_index(hash, self.partition_count());
        self.route(index, hash)
    }

    /// Route addressing a partition directly, as unordered scans do.
    ///
    /// The partition index doubles as the hash so the replica's
    /// ownership check `hash % count == index` holds.
    pub fn partition(&self, index: u32) -> Route {
        self.route(index, index as u64)
    }

    fn route(&self, index: u32, hash: u64) -> Route {
        Route {
            gpid: Gpid {
                app_id: self.app_id,
                partition_index: index,
            },
            partition_hash: hash,
            primary: self.primaries.get(index as usize).cloned().flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PartitionConfiguration;

    fn config(count: u32) -> QueryConfigResponse {
        QueryConfigResponse {
            app_id: 3,
            partition_count: count,
            partitions: (0..count)
                .map(|i| PartitionConfiguration {
                    pid: Gpid {
                        app_id: 3,
                        partition_index: i,
                    },
                    ballot: 1,
                    primary: Some(format!("10.0.0.{}:34801", i)),
                    secondaries: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_locate_is_stable() {
        let table = RoutingTable::from_config("temp", config(8)).unwrap();
        let a = table.locate(b"user:42");
        let b = table.locate(b"user:42");
        assert_eq!(a, b);
        assert_eq!(a.gpid.app_id, 3);
        assert!(a.gpid.partition_index < 8);
        assert_eq!(
            a.partition_hash % 8,
            a.gpid.partition_index as u64
        );
        assert_eq!(
            a.primary.as_deref(),
            Some(format!("10.0.0.{}:34801", a.gpid.partition_index).as_str())
        );
    }

    #[test]
    fn test_partition_route() {
        let table = RoutingTable::from_config("temp", config(4)).unwrap();
        let route = table.partition(2);
        assert_eq!(route.gpid.partition_index, 2);
        assert_eq!(route.partition_hash % 4, 2);
    }

    #[test]
    fn test_missing_primary() {
        let mut cfg = config(2);
        cfg.partitions[1].primary = None;
        let table = RoutingTable::from_config("temp", cfg).unwrap();
        assert!(table.partition(1).primary.is_none());
        assert!(table.partition(0).primary.is_some());
    }

    #[test]
    fn test_rejects_incomplete_config() {
        let mut cfg = config(4);
        cfg.partitions.pop();
        assert!(RoutingTable::from_config("temp", cfg).is_err());
        assert!(RoutingTable::from_config("temp", config(0)).is_err());
    }

    #[test]
    fn test_header_carries_timeout() {
        let table = RoutingTable::from_config("temp", config(4)).unwrap();
        let header = table.locate(b"hk").header(Duration::from_millis(1500));
        assert_eq!(header.timeout_ms, 1500);
    }
}
