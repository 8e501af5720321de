//! Per-template build locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Serialises work on the local copy of a template.
///
/// Builds of the same template write the fields document into the same
/// directory and must not overlap. Different templates build in parallel.
#[derive(Debug, Clone, Default)]
pub struct TemplateLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TemplateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `template`.
    pub async fn lock(&self, template: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(template.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}
