//! Per-process, lock-free-read cache mapping a train tag to its seat list.
//!
//! Entries past their TTL are treated as a miss and lazily evicted on next
//! access; there is no background sweeper.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::core_types::TrainTag;
use crate::models::Seat;

struct Entry {
    seats: Vec<Seat>,
    expires_at: Instant,
}

#[derive(Default)]
pub struct CacheStats {
    pub hits: std::sync::atomic::AtomicU64,
    pub misses: std::sync::atomic::AtomicU64,
}

pub struct LocalCache {
    entries: DashMap<TrainTag, Entry>,
    ttl: Duration,
    stats: CacheStats,
}

impl LocalCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Returns `Some(seats)` on a live hit, `None` on miss or expiry.
    pub fn get(&self, tag: &str) -> Option<Vec<Seat>> {
        use std::sync::atomic::Ordering::Relaxed;
        let hit = self.entries.get(tag).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.seats.clone())
            } else {
                None
            }
        });
        match &hit {
            Some(_) => self.stats.hits.fetch_add(1, Relaxed),
            None => self.stats.misses.fetch_add(1, Relaxed),
        };
        hit
    }

    pub fn set(&self, tag: TrainTag, seats: Vec<Seat>) {
        self.entries.insert(
            tag,
            Entry {
                seats,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Synchronous, immediately visible to the next `get` call in this
    /// process.
    pub fn invalidate(&self, tag: &str) {
        self.entries.remove(tag);
    }

    pub fn len_for(&self, tag: &str) -> usize {
        self.entries.get(tag).map(|e| e.seats.len()).unwrap_or(0)
    }

    pub fn hits(&self) -> u64 {
        self.stats.hits.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.stats.misses.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeatStatus;
    use rust_decimal::Decimal;

    fn seat(id: i64, tag: &str) -> Seat {
        let now = chrono::Utc::now();
        Seat {
            seat_id: id,
            train_tag: tag.to_string(),
            seat_number: "1A".to_string(),
            price: Decimal::new(9999, 2),
            status: SeatStatus::Available,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn miss_then_hit() {
        let cache = LocalCache::new(Duration::from_secs(30));
        assert!(cache.get("G1").is_none());
        cache.set("G1".to_string(), vec![seat(1, "G1")]);
        let got = cache.get("G1").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = LocalCache::new(Duration::from_millis(1));
        cache.set("G1".to_string(), vec![seat(1, "G1")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("G1").is_none());
    }

    #[test]
    fn invalidate_is_immediately_visible() {
        let cache = LocalCache::new(Duration::from_secs(30));
        cache.set("G1".to_string(), vec![seat(1, "G1")]);
        cache.invalidate("G1");
        assert!(cache.get("G1").is_none());
    }
}
