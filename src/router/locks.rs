//! Per-user serialization and inbound-event deduplication.
//!
//! Two concurrent messages for the same user (a double-tapped quick-reply
//! button, a retransmitted webhook) must not interleave the read-mode →
//! transition → write sequence, so every transition runs under that user's
//! exclusive lock. There is no cross-user ordering.
//!
//! The platform delivers webhooks at-least-once; [`EventDeduper`] keeps a
//! TTL-bounded set of processed event ids so a redelivery cannot append a
//! duplicate answer. The set is in-process only — a restart forgets it,
//! which is accepted for a single-instance deployment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Registry of per-user exclusive locks.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `user_id`'s state transitions. Entries are created
    /// on first use and kept for the process lifetime; the per-user cost is
    /// one mutex.
    pub fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }
}

/// TTL-bounded set of processed webhook event ids.
#[derive(Debug)]
pub struct EventDeduper {
    ttl: Duration,
    seen: DashMap<String, Instant>,
}

impl EventDeduper {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Record an event id. Returns `true` on first delivery, `false` if the
    /// id was already processed within the TTL window.
    pub fn first_delivery(&self, event_id: &str) -> bool {
        let now = Instant::now();
        self.seen
            .retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
        match self.seen.entry(event_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    /// Drop a recorded id so the platform's redelivery of it is processed
    /// again, for events whose handling failed after the id was recorded.
    pub fn forget(&self, event_id: &str) {
        self.seen.remove(event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_user_gets_same_lock() {
        let locks = UserLocks::new();
        let a = locks.lock_for("u1");
        let b = locks.lock_for("u1");
        assert!(Arc::ptr_eq(&a, &b));

        let other = locks.lock_for("u2");
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_lock_serializes() {
        let locks = UserLocks::new();
        let lock = locks.lock_for("u1");
        let guard = lock.lock().await;
        assert!(locks.lock_for("u1").try_lock().is_err());
        drop(guard);
        assert!(locks.lock_for("u1").try_lock().is_ok());
    }

    #[test]
    fn test_duplicate_event_is_rejected() {
        let dedup = EventDeduper::new(Duration::from_secs(600));
        assert!(dedup.first_delivery("evt-1"));
        assert!(!dedup.first_delivery("evt-1"));
        assert!(dedup.first_delivery("evt-2"));
    }

    #[test]
    fn test_expired_event_is_accepted_again() {
        let dedup = EventDeduper::new(Duration::ZERO);
        assert!(dedup.first_delivery("evt-1"));
        // TTL of zero expires immediately.
        assert!(dedup.first_delivery("evt-1"));
    }

    #[test]
    fn test_forgotten_event_is_accepted_again() {
        let dedup = EventDeduper::new(Duration::from_secs(600));
        assert!(dedup.first_delivery("evt-1"));
        dedup.forget("evt-1");
        assert!(dedup.first_delivery("evt-1"));
        assert!(!dedup.first_delivery("evt-1"));
    }
}
