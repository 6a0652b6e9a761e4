//! Snowflake identifiers and the process-wide generator.
//!
//! [`Snowflake`] is a newtype around the signed 64-bit integer stored in
//! every `BIGINT` key column. [`SnowflakeGenerator`] mints new identifiers
//! for rows the bot creates itself (prefixes, tags, reminders, ...); rows
//! mirroring platform objects (accounts, guilds, channels) reuse the
//! platform's own snowflakes.
//!
//! # Layout
//!
//! ```text
//!  63                      22 21    17 16    12 11          0
//! +--------------------------+--------+--------+-------------+
//! | ms since 2015-01-01 UTC  | worker | process|  sequence   |
//! +--------------------------+--------+--------+-------------+
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds between the Unix epoch and 2015-01-01T00:00:00Z.
pub const EPOCH_MS: u64 = 1_420_070_400_000;

const SEQUENCE_BITS: u32 = 12;
const PROCESS_BITS: u32 = 5;
const WORKER_BITS: u32 = 5;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const PROCESS_SHIFT: u32 = SEQUENCE_BITS;
const WORKER_SHIFT: u32 = SEQUENCE_BITS + PROCESS_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + PROCESS_BITS + WORKER_BITS;
const NODE_MASK: u8 = (1 << WORKER_BITS) - 1;

/// Unique identifier of a persisted row.
///
/// Assigned once when the owning entity is constructed and never
/// reassigned. Orders roughly by creation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Snowflake(i64);

impl Snowflake {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Decodes the creation instant embedded in the identifier.
    ///
    /// Falls back to the Unix epoch for values that do not encode a
    /// representable instant (negative raw values).
    #[must_use]
    pub fn timestamp(self) -> DateTime<Utc> {
        let offset = u64::try_from(self.0).unwrap_or(0) >> TIMESTAMP_SHIFT;
        let millis = i64::try_from(EPOCH_MS.saturating_add(offset)).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Snowflake {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<Snowflake> for i64 {
    fn from(id: Snowflake) -> Self {
        id.0
    }
}

/// Lock-free generator of strictly increasing [`Snowflake`]s.
///
/// The timestamp and sequence of the last issued id live in one atomic
/// word (`timestamp << 12 | sequence`). Each call advances that word by
/// compare-and-swap, so the generator is safe to share between tasks and
/// threads and never blocks or suspends. When more than 4096 ids are
/// requested within one millisecond the sequence carries into the next
/// millisecond instead of waiting for the clock.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    node: u64,
    state: AtomicU64,
}

impl SnowflakeGenerator {
    /// Creates a generator for the given worker and process ids.
    ///
    /// Only the low five bits of each id are used.
    #[must_use]
    pub fn new(worker_id: u8, process_id: u8) -> Self {
        let node = (u64::from(worker_id & NODE_MASK) << WORKER_SHIFT)
            | (u64::from(process_id & NODE_MASK) << PROCESS_SHIFT);
        Self {
            node,
            state: AtomicU64::new(0),
        }
    }

    /// Issues the next identifier.
    pub fn next_id(&self) -> Snowflake {
        let now = current_millis();
        let mut prev = self.state.load(Ordering::Acquire);
        loop {
            let next = advance(prev, now);
            match self
                .state
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return self.compose(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Returns an endless iterator over fresh identifiers.
    #[must_use]
    pub fn iter(&self) -> Snowflakes<'_> {
        Snowflakes { generator: self }
    }

    fn compose(&self, state: u64) -> Snowflake {
        let timestamp = state >> SEQUENCE_BITS;
        let sequence = state & SEQUENCE_MASK;
        let raw = (timestamp << TIMESTAMP_SHIFT) | self.node | sequence;
        Snowflake(i64::try_from(raw).unwrap_or(i64::MAX))
    }
}

impl Default for SnowflakeGenerator {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Infinite iterator returned by [`SnowflakeGenerator::iter`].
#[derive(Debug, Clone, Copy)]
pub struct Snowflakes<'a> {
    generator: &'a SnowflakeGenerator,
}

impl Iterator for Snowflakes<'_> {
    type Item = Snowflake;

    fn next(&mut self) -> Option<Snowflake> {
        Some(self.generator.next_id())
    }
}

/// Computes the state following `prev` given the wall clock `now`.
fn advance(prev: u64, now: u64) -> u64 {
    let prev_timestamp = prev >> SEQUENCE_BITS;
    if now > prev_timestamp {
        return now << SEQUENCE_BITS;
    }
    if prev & SEQUENCE_MASK < SEQUENCE_MASK {
        prev + 1
    } else {
        (prev_timestamp + 1) << SEQUENCE_BITS
    }
}

/// Milliseconds elapsed since [`EPOCH_MS`].
fn current_millis() -> u64 {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    unix_ms.saturating_sub(EPOCH_MS)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn consecutive_ids_strictly_increase() {
        let generator = SnowflakeGenerator::default();
        let ids: Vec<Snowflake> = generator.iter().take(10_000).collect();
        for pair in ids.windows(2) {
            let [a, b] = pair else {
                panic!("windows(2) yields pairs");
            };
            assert!(a < b, "{a} !< {b}");
        }
    }

    #[test]
    fn ids_are_distinct_across_threads() {
        let generator = Arc::new(SnowflakeGenerator::new(3, 7));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || generator.iter().take(2_000).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let Ok(ids) = handle.join() else {
                panic!("worker thread panicked");
            };
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 16_000);
    }

    #[test]
    fn sequence_carries_into_next_interval() {
        let full = (5 << SEQUENCE_BITS) | SEQUENCE_MASK;
        assert_eq!(advance(full, 5), 6 << SEQUENCE_BITS);
        assert_eq!(advance(5 << SEQUENCE_BITS, 5), (5 << SEQUENCE_BITS) + 1);
    }

    #[test]
    fn clock_regression_keeps_counting() {
        let prev = (100 << SEQUENCE_BITS) | 4;
        assert_eq!(advance(prev, 90), prev + 1);
    }

    #[test]
    fn node_bits_are_embedded() {
        let generator = SnowflakeGenerator::new(3, 7);
        let raw = generator.next_id().get();
        assert_eq!((raw >> WORKER_SHIFT) & 0x1f, 3);
        assert_eq!((raw >> PROCESS_SHIFT) & 0x1f, 7);
    }

    #[test]
    fn timestamp_is_close_to_now() {
        let id = SnowflakeGenerator::default().next_id();
        let drift = (Utc::now() - id.timestamp()).num_seconds().abs();
        assert!(drift < 5);
    }

    #[test]
    fn known_platform_id_decodes() {
        // 175928847299117063 was issued on 2016-04-30.
        let id = Snowflake::new(175_928_847_299_117_063);
        assert_eq!(id.timestamp().format("%Y-%m-%d").to_string(), "2016-04-30");
    }

    #[test]
    fn serializes_as_plain_integer() {
        let id = Snowflake::new(42);
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "42");
    }

    #[test]
    fn display_is_raw_value() {
        assert_eq!(Snowflake::new(-7).to_string(), "-7");
    }
}
