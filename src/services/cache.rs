use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::verification::VerificationResult;

struct CacheEntry {
    result: VerificationResult,
    expires_at: Instant,
}

/// In-memory TTL cache for verification results.
///
/// Entries are written only for authoritative outcomes (found or
/// not-found); timeouts and scrape failures are never stored, so transient
/// upstream trouble stays retryable. Expired entries are dropped lazily on
/// read; `purge_expired` exists for an optional sweep.
pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `key`, if any. An expired entry is removed and
    /// treated as absent.
    pub fn get(&self, key: &str) -> Option<VerificationResult> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `result` under `key`, overwriting any previous entry
    /// (last successful write wins).
    pub fn insert(&self, key: &str, result: VerificationResult) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key.to_string(),
            CacheEntry {
                result,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_result(name: &str) -> VerificationResult {
        VerificationResult {
            found: true,
            verified: true,
            document: "V-12345678".to_string(),
            full_name: Some(name.to_string()),
            professions: Vec::new(),
            postgraduates: Vec::new(),
            primary_profession: Some("MÉDICO CIRUJANO".to_string()),
            primary_license: Some("MPPS-12345".to_string()),
            specialty_display: Some("MEDICINA GENERAL".to_string()),
            normalized_profession: Some("MEDICO CIRUJANO".to_string()),
            is_human_medical_profession: true,
            rejection_reason: None,
            message: "ok".to_string(),
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn hit_within_ttl() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.insert("V-1", sample_result("ANA"));
        let hit = cache.get("V-1").unwrap();
        assert_eq!(hit.full_name.as_deref(), Some("ANA"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_is_absent_and_removed() {
        let cache = ResultCache::new(Duration::from_millis(20));
        cache.insert("V-1", sample_result("ANA"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("V-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.insert("V-1", sample_result("ANA"));
        cache.insert("V-1", sample_result("LUIS"));
        assert_eq!(cache.get("V-1").unwrap().full_name.as_deref(), Some("LUIS"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = ResultCache::new(Duration::from_millis(20));
        cache.insert("V-1", sample_result("ANA"));
        std::thread::sleep(Duration::from_millis(40));
        cache.insert("V-2", sample_result("LUIS"));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.get("V-2").is_some());
    }
}
