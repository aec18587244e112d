//! Utility functions for pegasus-client

use crate::common::{Error, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest hash key the composite key layout can carry.
pub const MAX_HASH_KEY_LEN: usize = u16::MAX as usize - 1;

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgument("empty duration".into()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::InvalidArgument(format!("missing duration unit: {}", s)))?;
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid duration: {}", s)))?;

    let secs_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => {
            return Err(Error::InvalidArgument(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    num.checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::InvalidArgument(format!("duration out of range: {}", s)))
}

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Absolute expiry for a TTL given at write time. `0` means never.
pub fn expire_ts_from_ttl(ttl_seconds: u32) -> u64 {
    if ttl_seconds == 0 {
        0
    } else {
        timestamp_now() + ttl_seconds as u64
    }
}

/// Remaining TTL as reported to callers: `-1` for no expiry, `None` once expired.
pub fn remaining_ttl(expire_ts_seconds: u64, now: u64) -> Option<i32> {
    if expire_ts_seconds == 0 {
        return Some(-1);
    }
    if expire_ts_seconds <= now {
        return None;
    }
    Some((expire_ts_seconds - now).min(i32::MAX as u64) as i32)
}

/// Retry with exponential backoff until `deadline`.
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    deadline: tokio::time::Instant,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && tokio::time::Instant::now() + delay < deadline => {
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(1));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Validate hash key (must be non-empty and fit the key header)
pub fn validate_hash_key(hash_key: &[u8]) -> Result<()> {
    if hash_key.is_empty() {
        return Err(Error::InvalidArgument("hash key cannot be empty".into()));
    }

    if hash_key.len() > MAX_HASH_KEY_LEN {
        return Err(Error::InvalidArgument(format!(
            "hash key too long ({} bytes, max {})",
            hash_key.len(),
            MAX_HASH_KEY_LEN
        )));
    }

    Ok(())
}
