use log::debug;
use std::{
    collections::{HashSet, VecDeque},
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio::time::Instant;

/// Bounded memory of already processed payment notifications.
///
/// Keys are forgotten once they are older than `ttl` or when `capacity` is
/// exceeded, oldest first. A capacity of zero disables deduplication.
pub struct NotificationLedger {
    capacity: usize,
    ttl: Duration,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    order: VecDeque<(String, Instant)>,
    keys: HashSet<String>,
}

impl NotificationLedger {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        NotificationLedger {
            capacity,
            ttl,
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Remember `key`, returns false if it was already recorded
    pub fn record(&self, key: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }

        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some((_, at)) = seen.order.front() {
            if now.duration_since(*at) < self.ttl {
                break;
            }
            if let Some((expired, _)) = seen.order.pop_front() {
                seen.keys.remove(&expired);
            }
        }

        if seen.keys.contains(key) {
            debug!("notification {key} already processed");
            return false;
        }

        if seen.order.len() >= self.capacity {
            if let Some((evicted, _)) = seen.order.pop_front() {
                seen.keys.remove(&evicted);
            }
        }

        seen.order.push_back((key.to_string(), now));
        seen.keys.insert(key.to_string());
        true
    }

    /// Forget `key` so a redelivery is processed again
    pub fn forget(&self, key: &str) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        if seen.keys.remove(key) {
            seen.order.retain(|(k, _)| k != key);
        }
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
