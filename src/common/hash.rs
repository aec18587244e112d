//! Partition hashing
//!
//! - BLAKE3 over the hash key picks the partition
//! - Unordered scans split partitions into contiguous blocks

use std::ops::Range;

/// Hash used to route a hash key to its partition.
pub fn partition_hash(hash_key: &[u8]) -> u64 {
    let hash = blake3::hash(hash_key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(prefix)
}

/// Partition index for a hash within a table of `partition_count` partitions.
pub fn partition_index(hash: u64, partition_count: u32) -> u32 {
    debug_assert!(partition_count > 0);
    (hash % partition_count as u64) as u32
}

/// Assign `partition_count` partitions to `split_count` splits.
///
/// The first `partition_count % split_count` splits get one extra partition.
/// Splits beyond `partition_count` get an empty range.
pub fn split_partitions(partition_count: u32, split_count: usize) -> Vec<Range<u32>> {
    if split_count == 0 {
        return Vec::new();
    }
    let size = partition_count as usize / split_count;
    let more = partition_count as usize % split_count;

    let mut splits = Vec::with_capacity(split_count);
    let mut start = 0u32;
    for i in 0..split_count {
        let len = (size + usize::from(i < more)) as u32;
        splits.push(start..start + len);
        start += len;
    }
    splits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_hash_deterministic() {
        let h1 = partition_hash(b"test_hkey_1");
        let h2 = partition_hash(b"test_hkey_1");
        assert_eq!(h1, h2);
        assert_ne!(h1, partition_hash(b"test_hkey_2"));
    }

    #[test]
    fn test_partition_index_in_range() {
        for i in 0..100 {
            let hk = format!("hk-{}", i);
            assert!(partition_index(partition_hash(hk.as_bytes()), 8) < 8);
        }
    }

    #[test]
    fn test_split_partitions_even() {
        let splits = split_partitions(8, 4);
        assert_eq!(splits, vec![0..2, 2..4, 4..6, 6..8]);
    }

    #[test]
    fn test_split_partitions_uneven() {
        let splits = split_partitions(8, 3);
        assert_eq!(splits, vec![0..3, 3..6, 6..8]);
        let covered: u32 = splits.iter().map(|r| r.len() as u32).sum();
        assert_eq!(covered, 8);
    }

    #[test]
    fn test_split_partitions_more_splits_than_partitions() {
        let splits = split_partitions(2, 5);
        assert_eq!(splits.len(), 5);
        assert_eq!(splits[0], 0..1);
        assert_eq!(splits[1], 1..2);
        assert!(splits[2..].iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_split_partitions_zero() {
        assert!(split_partitions(8, 0).is_empty());
    }
}
