use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

/// Fingerprint of (chat id, message id, text)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey([u8; 32]);

impl DedupKey {
    pub fn new(chat_id: i64, message_id: i32, text: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(chat_id.to_be_bytes());
        hasher.update(message_id.to_be_bytes());
        hasher.update(text.unwrap_or("").as_bytes());
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Last-seen times of recently forwarded messages.
///
/// Lookups never evict; expired entries stay until [`DedupCache::evict_expired`]
/// runs from the reaper.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: HashMap<DedupKey, Instant>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` is new (or its entry has aged out) and records `now`.
    /// A duplicate inside the window returns false and leaves the stored time alone.
    pub fn check_and_record(&mut self, key: DedupKey, now: Instant, window: Duration) -> bool {
        if let Some(seen) = self.entries.get(&key) {
            if now.saturating_duration_since(*seen) < window {
                return false;
            }
        }
        self.entries.insert(key, now);
        true
    }

    /// Drop entries older than `window`; returns how many were removed
    pub fn evict_expired(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, seen| now.saturating_duration_since(*seen) <= window);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_key_is_deterministic_and_mixes_all_fields() {
        let key = DedupKey::new(-1001, 7, Some("hi"));
        assert_eq!(key, DedupKey::new(-1001, 7, Some("hi")));
        assert_ne!(key, DedupKey::new(-1002, 7, Some("hi")));
        assert_ne!(key, DedupKey::new(-1001, 8, Some("hi")));
        assert_ne!(key, DedupKey::new(-1001, 7, Some("ho")));
        assert_eq!(DedupKey::new(5, 1, None), DedupKey::new(5, 1, Some("")));
    }

    #[test]
    fn test_duplicate_inside_window_is_rejected() {
        let mut cache = DedupCache::new();
        let key = DedupKey::new(1, 1, Some("a"));
        let t0 = Instant::now();

        assert!(cache.check_and_record(key, t0, WINDOW));
        assert!(!cache.check_and_record(key, t0 + Duration::from_secs(30), WINDOW));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_is_new_again_after_window() {
        let mut cache = DedupCache::new();
        let key = DedupKey::new(1, 1, Some("a"));
        let t0 = Instant::now();

        assert!(cache.check_and_record(key, t0, WINDOW));
        assert!(cache.check_and_record(key, t0 + WINDOW, WINDOW));
    }

    #[test]
    fn test_duplicates_do_not_extend_window() {
        let mut cache = DedupCache::new();
        let key = DedupKey::new(1, 1, None);
        let t0 = Instant::now();

        assert!(cache.check_and_record(key, t0, WINDOW));
        assert!(!cache.check_and_record(key, t0 + Duration::from_secs(50), WINDOW));
        // Measured from t0, not from the duplicate at t0+50
        assert!(cache.check_and_record(key, t0 + Duration::from_secs(61), WINDOW));
    }

    #[test]
    fn test_lookup_does_not_evict() {
        let mut cache = DedupCache::new();
        let t0 = Instant::now();
        cache.check_and_record(DedupKey::new(1, 1, None), t0, WINDOW);
        cache.check_and_record(DedupKey::new(2, 1, None), t0 + Duration::from_secs(600), WINDOW);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_evict_expired_keeps_fresh_entries() {
        let mut cache = DedupCache::new();
        let t0 = Instant::now();
        cache.check_and_record(DedupKey::new(1, 1, None), t0, WINDOW);
        cache.check_and_record(DedupKey::new(2, 1, None), t0 + Duration::from_secs(100), WINDOW);

        let removed = cache.evict_expired(t0 + Duration::from_secs(120), WINDOW);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.check_and_record(
            DedupKey::new(2, 1, None),
            t0 + Duration::from_secs(120),
            WINDOW
        ));
    }
}
