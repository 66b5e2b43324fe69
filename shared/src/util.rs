use chrono::{Datelike, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Custom epoch: 2024-01-01 00:00:00 UTC
const EPOCH_MS: i64 = 1_704_067_200_000;
const SEQUENCE_BITS: i64 = 12;

/// Last issued (timestamp << 12 | sequence), process wide.
static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Generate a Snowflake-style i64 for use as resource ID.
///
/// Layout (53 bits, fits in JavaScript's Number.MAX_SAFE_INTEGER):
///   - 41 bits: milliseconds since 2024-01-01 UTC (~69 years)
///   - 12 bits: per-millisecond sequence
///
/// IDs are strictly increasing within the process. When more than 4096 IDs
/// are requested in one millisecond the timestamp part borrows from the
/// next millisecond instead of colliding.
pub fn snowflake_id() -> i64 {
    let ts = ((now_millis() - EPOCH_MS) & 0x1FF_FFFF_FFFF) << SEQUENCE_BITS;
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = if ts > last { ts } else { last + 1 };
        match LAST_ID.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Opaque domain id: upper-case prefix + snowflake, e.g. `ORD21735400448000`.
pub fn domain_id(prefix: &str) -> String {
    format!("{prefix}{}", snowflake_id())
}

/// Calendar day key `YYYYMMDD` (UTC) for a millisecond timestamp.
pub fn day_key(millis: i64) -> i64 {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.year() as i64 * 10_000 + dt.month() as i64 * 100 + dt.day() as i64,
        None => 0,
    }
}

/// Calendar month key `YYYYMM` (UTC) for a millisecond timestamp.
pub fn month_key(millis: i64) -> i64 {
    day_key(millis) / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_snowflake_ids_are_unique_and_increasing() {
        let ids: Vec<i64> = (0..10_000).map(|_| snowflake_id()).collect();
        let set: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(set.len(), ids.len());
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_domain_id_prefix() {
        let id = domain_id("ORD");
        assert!(id.starts_with("ORD"));
        assert!(id[3..].parse::<i64>().is_ok());
    }

    #[test]
    fn test_day_and_month_keys() {
        // 2025-03-15 12:00:00 UTC
        let ts = 1_742_040_000_000;
        assert_eq!(day_key(ts), 20250315);
        assert_eq!(month_key(ts), 202503);
    }
}
