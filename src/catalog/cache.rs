use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::{CatalogError, CatalogProvider};
use crate::models::MedicalTest;

struct Snapshot {
    tests: Arc<[MedicalTest]>,
    fetched: Instant,
    loaded_at: DateTime<Utc>,
}

/// Freshness cache in front of another provider.
///
/// Serves the last snapshot while it is younger than `ttl`. A stale snapshot
/// is refreshed on the next call; if that refresh fails the error is
/// returned and the stale snapshot is discarded.
pub struct CatalogCache {
    inner: Arc<dyn CatalogProvider>,
    ttl: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl CatalogCache {
    pub fn new(inner: Arc<dyn CatalogProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            snapshot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop the cached snapshot so the next call refreshes.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = None;
        }
    }

    /// When the current snapshot was loaded, if any.
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.loaded_at))
    }
}

impl CatalogProvider for CatalogCache {
    fn list_tests(&self) -> Result<Arc<[MedicalTest]>, CatalogError> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| CatalogError::Unavailable("catalog cache lock poisoned".into()))?;

        if let Some(snapshot) = guard.as_ref() {
            if snapshot.fetched.elapsed() < self.ttl {
                return Ok(Arc::clone(&snapshot.tests));
            }
        }

        match self.inner.list_tests() {
            Ok(tests) => {
                tracing::info!(tests = tests.len(), "Catalog refreshed");
                *guard = Some(Snapshot {
                    tests: Arc::clone(&tests),
                    fetched: Instant::now(),
                    loaded_at: Utc::now(),
                });
                Ok(tests)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Catalog refresh failed");
                *guard = None;
                Err(e)
            }
        }
    }
}
