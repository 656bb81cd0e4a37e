//! Registry of scans currently executing, keyed by scan ID.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::progress::PercentSource;

/// Live table of running scans and their progress accessors.
///
/// Uses a blocking `RwLock` rather than the async one so entries can be
/// removed from `Drop`. No lock is ever held across an await point.
#[derive(Default)]
pub struct RunningScans {
    scans: RwLock<HashMap<i64, Arc<dyn PercentSource>>>,
}

impl RunningScans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Replacing a live entry means a scan ID was reused
    /// while still running, which callers should never do.
    pub fn register(&self, scan_id: i64, source: Arc<dyn PercentSource>) {
        let previous = self
            .scans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scan_id, source);
        if previous.is_some() {
            tracing::warn!(scan_id, "Scan ID re-registered while still running");
        }
    }

    /// Progress accessor for a running scan.
    pub fn query(&self, scan_id: i64) -> Option<Arc<dyn PercentSource>> {
        self.scans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scan_id)
            .cloned()
    }

    /// Current percentage for a running scan.
    pub fn percent(&self, scan_id: i64) -> Option<f64> {
        self.query(scan_id).map(|source| source.percent())
    }

    /// Remove an entry. Missing IDs are ignored.
    pub fn unregister(&self, scan_id: i64) {
        self.scans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scan_id);
    }

    /// Remove the entry only if it still holds `source`. An entry that was
    /// replaced by a later scan with the same ID stays.
    pub fn unregister_if(&self, scan_id: i64, source: &Arc<dyn PercentSource>) {
        let mut scans = self.scans.write().unwrap_or_else(PoisonError::into_inner);
        if scans
            .get(&scan_id)
            .is_some_and(|current| Arc::ptr_eq(current, source))
        {
            scans.remove(&scan_id);
        }
    }

    /// IDs of all running scans, ascending.
    pub fn running(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .scans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.scans.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `scan_id` and return a guard that unregisters it on release
    /// or drop, whichever comes first.
    pub fn track(self: &Arc<Self>, scan_id: i64, source: Arc<dyn PercentSource>) -> Registration {
        self.register(scan_id, Arc::clone(&source));
        Registration {
            registry: Arc::clone(self),
            scan_id,
            source,
            active: true,
        }
    }
}

impl fmt::Debug for RunningScans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningScans")
            .field("running", &self.running())
            .finish()
    }
}

/// Handle for one registry entry. Releasing it removes the entry only while
/// the entry is still the one this handle created.
pub struct Registration {
    registry: Arc<RunningScans>,
    scan_id: i64,
    source: Arc<dyn PercentSource>,
    active: bool,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("scan_id", &self.scan_id)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Registration {
    pub fn scan_id(&self) -> i64 {
        self.scan_id
    }

    /// Remove the entry now. Later calls and the eventual drop do nothing.
    pub fn release(&mut self) {
        if self.active {
            self.registry.unregister_if(self.scan_id, &self.source);
            self.active = false;
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl PercentSource for Fixed {
        fn percent(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn register_query_unregister() {
        let registry = RunningScans::new();
        registry.register(7, Arc::new(Fixed(42.0)));

        assert_eq!(registry.percent(7), Some(42.0));
        assert!(registry.query(8).is_none());

        registry.unregister(7);
        assert!(registry.query(7).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn double_unregister_is_noop() {
        let registry = RunningScans::new();
        registry.register(1, Arc::new(Fixed(0.0)));
        registry.register(2, Arc::new(Fixed(10.0)));

        registry.unregister(1);
        registry.unregister(1);
        registry.unregister(99);

        assert_eq!(registry.running(), vec![2]);
        assert_eq!(registry.percent(2), Some(10.0));
    }

    #[test]
    fn reregister_replaces_accessor() {
        let registry = RunningScans::new();
        registry.register(5, Arc::new(Fixed(1.0)));
        registry.register(5, Arc::new(Fixed(2.0)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.percent(5), Some(2.0));
    }

    #[test]
    fn registration_guard_releases_once() {
        let registry = Arc::new(RunningScans::new());
        let mut guard = registry.track(3, Arc::new(Fixed(0.0)));
        assert!(registry.query(3).is_some());

        guard.release();
        assert!(registry.query(3).is_none());

        // A new scan reusing the ID after release must survive the old guard's drop.
        registry.register(3, Arc::new(Fixed(5.0)));
        drop(guard);
        assert_eq!(registry.percent(3), Some(5.0));
    }

    #[test]
    fn stale_guard_keeps_newer_entry_for_reused_id() {
        let registry = Arc::new(RunningScans::new());
        let first = registry.track(7, Arc::new(Fixed(10.0)));
        let second = registry.track(7, Arc::new(Fixed(50.0)));

        drop(first);
        assert_eq!(registry.percent(7), Some(50.0));

        drop(second);
        assert!(registry.query(7).is_none());
    }

    #[test]
    fn unregister_if_ignores_other_source() {
        let registry = RunningScans::new();
        let current: Arc<dyn PercentSource> = Arc::new(Fixed(1.0));
        let other: Arc<dyn PercentSource> = Arc::new(Fixed(1.0));
        registry.register(4, Arc::clone(&current));

        registry.unregister_if(4, &other);
        assert_eq!(registry.percent(4), Some(1.0));

        registry.unregister_if(4, &current);
        assert!(registry.is_empty());
    }

    #[test]
    fn registration_guard_releases_on_drop() {
        let registry = Arc::new(RunningScans::new());
        {
            let _guard = registry.track(11, Arc::new(Fixed(0.0)));
            assert_eq!(registry.running(), vec![11]);
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn concurrent_scans_do_not_interfere() {
        let registry = Arc::new(RunningScans::new());

        let handles: Vec<_> = (0..64i64)
            .map(|id| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let guard = registry.track(id, Arc::new(Fixed(id as f64)));
                    tokio::task::yield_now().await;
                    assert_eq!(registry.percent(id), Some(id as f64));
                    drop(guard);
                    assert!(registry.query(id).is_none());
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(registry.is_empty());
    }
}
