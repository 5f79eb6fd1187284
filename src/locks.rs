//! Expiring key markers used as time-boxed mutual exclusion, independent of
//! any store transaction.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;

/// Key for the per-user pending-withdrawal marker.
pub fn withdrawal_lock_key(username: &str) -> String {
    format!("withdrawal_lock:{username}")
}

/// Proof of one acquisition. Only the holder of the current token can
/// release a key, so a stale holder never frees a newer acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(u64);

struct Entry {
    expires_at: DateTime<Utc>,
    token: LockToken,
}

#[derive(Default)]
struct Entries {
    keys: HashMap<String, Entry>,
    issued: u64,
}

/// In-process key store with a per-key TTL.
pub struct TtlLocks {
    entries: Mutex<Entries>,
    clock: Arc<dyn Clock>,
}

impl TtlLocks {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            clock,
        }
    }

    /// Set `key` for `ttl` unless it is already held.
    /// Returns the new token if this call took the lock.
    pub fn try_acquire(&self, key: &str, ttl: TimeDelta) -> Option<LockToken> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries.keys.get(key).is_some_and(|e| e.expires_at > now) {
            return None;
        }

        entries.issued += 1;
        let token = LockToken(entries.issued);
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        entries
            .keys
            .insert(key.to_string(), Entry { expires_at, token });
        Some(token)
    }

    pub fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .keys
            .get(key)
            .is_some_and(|e| e.expires_at > now)
    }

    /// Time left on `key`, if held.
    pub fn remaining(&self, key: &str) -> Option<TimeDelta> {
        let now = self.clock.now();
        self.entries
            .lock()
            .keys
            .get(key)
            .map(|e| e.expires_at - now)
            .filter(|left| *left > TimeDelta::zero())
    }

    /// Free `key` if `token` is its current acquisition.
    /// Returns `false` when the key is gone or was re-acquired since.
    pub fn release(&self, key: &str, token: LockToken) -> bool {
        let mut entries = self.entries.lock();
        match entries.keys.get(key) {
            Some(e) if e.token == token => {
                entries.keys.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drop expired keys. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.keys.len();
        entries.keys.retain(|_, e| e.expires_at > now);
        before - entries.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn locks() -> (Arc<ManualClock>, TtlLocks) {
        let clock = Arc::new(ManualClock::default());
        let locks = TtlLocks::new(clock.clone());
        (clock, locks)
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let (_, locks) = locks();
        assert!(locks.try_acquire("k", TimeDelta::minutes(3)).is_some());
        assert!(locks.try_acquire("k", TimeDelta::minutes(3)).is_none());
        assert!(locks.exists("k"));
    }

    #[test]
    fn lock_expires_after_ttl() {
        let (clock, locks) = locks();
        assert!(locks.try_acquire("k", TimeDelta::seconds(10)).is_some());

        clock.advance(TimeDelta::seconds(9));
        assert!(locks.exists("k"));
        assert_eq!(locks.remaining("k"), Some(TimeDelta::seconds(1)));

        clock.advance(TimeDelta::seconds(1));
        assert!(!locks.exists("k"));
        assert_eq!(locks.remaining("k"), None);
        assert!(locks.try_acquire("k", TimeDelta::seconds(10)).is_some());
    }

    #[test]
    fn release_frees_the_key() {
        let (_, locks) = locks();
        let token = locks.try_acquire("k", TimeDelta::hours(1)).unwrap();
        assert!(locks.release("k", token));
        assert!(!locks.exists("k"));
        assert!(!locks.release("k", token));
    }

    #[test]
    fn stale_token_does_not_release_newer_acquisition() {
        let (clock, locks) = locks();
        let first = locks.try_acquire("k", TimeDelta::seconds(10)).unwrap();
        clock.advance(TimeDelta::seconds(11));
        let second = locks.try_acquire("k", TimeDelta::seconds(10)).unwrap();
        assert_ne!(first, second);

        assert!(!locks.release("k", first));
        assert!(locks.exists("k"));
        assert!(locks.release("k", second));
    }

    #[test]
    fn huge_ttl_saturates() {
        let (clock, locks) = locks();
        assert!(locks.try_acquire("k", TimeDelta::MAX).is_some());
        clock.advance(TimeDelta::days(365 * 1_000));
        assert!(locks.exists("k"));
    }

    #[test]
    fn keys_are_independent() {
        let (_, locks) = locks();
        assert!(locks.try_acquire(&withdrawal_lock_key("alice"), TimeDelta::hours(1)).is_some());
        assert!(locks.try_acquire(&withdrawal_lock_key("bob"), TimeDelta::hours(1)).is_some());
    }

    #[test]
    fn purge_drops_only_expired() {
        let (clock, locks) = locks();
        locks.try_acquire("short", TimeDelta::seconds(1));
        locks.try_acquire("long", TimeDelta::hours(1));
        clock.advance(TimeDelta::seconds(2));
        assert_eq!(locks.purge_expired(), 1);
        assert!(locks.exists("long"));
    }
}
