//! Per-artifact leases serializing attempts on one working copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::error::{HivemindError, Result};

/// Held for the duration of one attempt; dropping it releases the artifact.
#[derive(Debug)]
pub struct ArtifactLease {
    artifact: String,
    _guard: OwnedMutexGuard<()>,
}

impl ArtifactLease {
    pub fn artifact(&self) -> &str {
        &self.artifact
    }
}

/// Lease table shared by every attempt driven through one pipeline.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLeases {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ArtifactLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `artifact` or fail with
    /// [`HivemindError::ArtifactBusy`] when another attempt holds it.
    pub fn try_acquire(&self, artifact: &str) -> Result<ArtifactLease> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| HivemindError::ArtifactBusy(artifact.to_string()))?;
            Arc::clone(
                locks
                    .entry(artifact.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = lock
            .try_lock_owned()
            .map_err(|_| HivemindError::ArtifactBusy(artifact.to_string()))?;
        Ok(ArtifactLease {
            artifact: artifact.to_string(),
            _guard: guard,
        })
    }

    pub fn is_held(&self, artifact: &str) -> bool {
        let Ok(locks) = self.locks.lock() else {
            return true;
        };
        locks
            .get(artifact)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
