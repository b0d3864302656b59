//! Per-file mutual exclusion.
//!
//! Every read-validate-write sequence on a file runs inside
//! [`FileLocks::with_lock`]. Locks are keyed by canonical path so two
//! spellings of the same file share one lock, and different files never
//! contend with each other.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry entries are pruned once it grows past this many idle locks.
const PRUNE_THRESHOLD: usize = 64;

/// Shared registry of per-path locks. Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct FileLocks {
    registry: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

/// Key used to identify a file across different spellings of its path.
pub fn lock_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the exclusive lock for `path`.
    ///
    /// The lock is released when `f` returns or unwinds.
    pub fn with_lock<R>(&self, path: &Path, f: impl FnOnce() -> R) -> R {
        let entry = self.entry(lock_key(path));
        let _guard = entry.lock();
        f()
    }

    fn entry(&self, key: PathBuf) -> Arc<Mutex<()>> {
        let mut registry = self.registry.lock();
        if registry.len() >= PRUNE_THRESHOLD {
            // Only the registry holds an idle entry.
            registry.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        registry.entry(key).or_default().clone()
    }

    /// Number of paths currently tracked.
    pub fn tracked(&self) -> usize {
        self.registry.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_path_is_serialized() {
        let locks = FileLocks::new();
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);
        let path = PathBuf::from("/nonexistent/shared.conf");

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    locks.with_lock(&path, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lock_released_after_panic() {
        let locks = FileLocks::new();
        let path = PathBuf::from("/nonexistent/panicky.conf");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            locks.with_lock(&path, || panic!("boom"));
        }));
        assert!(result.is_err());

        // Would deadlock if the guard leaked.
        assert_eq!(locks.with_lock(&path, || 7), 7);
    }

    #[test]
    fn test_idle_entries_are_pruned() {
        let locks = FileLocks::new();
        for i in 0..(PRUNE_THRESHOLD * 2) {
            let path = PathBuf::from(format!("/nonexistent/{i}.conf"));
            locks.with_lock(&path, || ());
        }
        assert!(locks.tracked() <= PRUNE_THRESHOLD);
    }

    #[test]
    fn test_spellings_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.conf");
        std::fs::write(&file, "x").unwrap();
        let dotted = dir.path().join(".").join("a.conf");
        assert_eq!(lock_key(&file), lock_key(&dotted));
    }
}
