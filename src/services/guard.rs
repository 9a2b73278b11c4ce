//! Duplicate-delivery guard for inbound file events
//!
//! Keeps the last admission time per file identifier and drops repeats that
//! arrive inside the dedup window. Identifiers are independent of each other;
//! the guard never serializes distinct files.
//!
//! Every admission hands out an [`Admission`] token. Releasing requires the token,
//! so an operation that outlived its window cannot drop the entry of a newer
//! admission for the same identifier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Default dedup window
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// Entry count above which expired entries are swept on insert
const SWEEP_THRESHOLD: usize = 1024;

/// Proof of one admission, needed to release it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Admission(u64);

#[derive(Debug, Clone, Copy)]
struct Entry {
    admitted_at: Instant,
    admission: Admission,
}

/// TTL map from file identifier to last admission
pub struct ConcurrencyGuard {
    entries: Mutex<HashMap<String, Entry>>,
    window: Duration,
    next_admission: AtomicU64,
}

impl ConcurrencyGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            next_admission: AtomicU64::new(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit a file event. Returns false when the same identifier was admitted
    /// less than one window ago.
    pub fn admit(&self, file_id: &str) -> bool {
        self.try_admit(file_id).is_some()
    }

    /// Admit a file event, returning the token that releases it
    pub fn try_admit(&self, file_id: &str) -> Option<Admission> {
        self.admit_at(file_id, Instant::now())
    }

    fn admit_at(&self, file_id: &str, now: Instant) -> Option<Admission> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(file_id)
            && now.saturating_duration_since(entry.admitted_at) < self.window
        {
            debug!(file_id = file_id, "Dropping duplicate file event");
            return None;
        }

        if entries.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            entries.retain(|_, entry| now.saturating_duration_since(entry.admitted_at) < window);
        }

        let admission = Admission(self.next_admission.fetch_add(1, Ordering::Relaxed));
        entries.insert(
            file_id.to_string(),
            Entry {
                admitted_at: now,
                admission,
            },
        );
        Some(admission)
    }

    /// Forget an identifier so the same file can be processed again. A stale
    /// token (the identifier was re-admitted since) leaves the newer entry alone.
    pub fn release(&self, file_id: &str, admission: Admission) {
        let mut entries = self.entries.lock();
        if entries.get(file_id).is_some_and(|entry| entry.admission == admission) {
            entries.remove(file_id);
        }
    }

    /// Remove all expired entries
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let window = self.window;
        self.entries
            .lock()
            .retain(|_, entry| now.saturating_duration_since(entry.admitted_at) < window);
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_within_window_is_dropped() {
        let guard = ConcurrencyGuard::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(guard.admit_at("file-a", start).is_some());
        assert!(guard.admit_at("file-a", start + Duration::from_secs(9)).is_none());
    }

    #[test]
    fn test_readmitted_after_window() {
        let guard = ConcurrencyGuard::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(guard.admit_at("file-a", start).is_some());
        assert!(guard.admit_at("file-a", start + Duration::from_secs(11)).is_some());
    }

    #[test]
    fn test_real_clock_window() {
        let guard = ConcurrencyGuard::new(Duration::from_millis(50));
        assert!(guard.admit("file-a"));
        assert!(!guard.admit("file-a"));
        std::thread::sleep(Duration::from_millis(60));
        assert!(guard.admit("file-a"));
    }

    #[test]
    fn test_identifiers_are_independent() {
        let guard = ConcurrencyGuard::default();
        assert!(guard.admit("file-a"));
        assert!(guard.admit("file-b"));
        assert!(!guard.admit("file-a"));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_release_allows_reprocessing() {
        let guard = ConcurrencyGuard::default();
        let admission = guard.try_admit("file-a").expect("first admission");
        guard.release("file-a", admission);
        assert!(guard.is_empty());
        assert!(guard.admit("file-a"));
    }

    #[test]
    fn test_stale_release_keeps_newer_admission() {
        let guard = ConcurrencyGuard::new(Duration::from_secs(10));
        let start = Instant::now();
        let first = guard.admit_at("file-a", start).expect("first admission");
        let second = guard
            .admit_at("file-a", start + Duration::from_secs(11))
            .expect("admitted after window");
        assert_ne!(first, second);

        // the first operation finishing late must not free the second's entry
        guard.release("file-a", first);
        assert_eq!(guard.len(), 1);
        assert!(guard.admit_at("file-a", start + Duration::from_secs(12)).is_none());

        guard.release("file-a", second);
        assert!(guard.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let guard = ConcurrencyGuard::new(Duration::from_millis(10));
        guard.admit("file-a");
        std::thread::sleep(Duration::from_millis(20));
        guard.cleanup_expired();
        assert!(guard.is_empty());
    }
}
