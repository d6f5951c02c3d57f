//! Name → cleanup operation registry

use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;

use crate::operation::ExitOperation;

pub type OperationMap = FxHashMap<String, Arc<dyn ExitOperation>>;

/// Mutex-guarded registry of named cleanup operations.
///
/// Unordered: every entry is dispatched concurrently at shutdown.
#[derive(Default)]
pub struct Registry {
    ops: Mutex<OperationMap>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OperationMap> {
        // A panicking writer cannot leave the map half-updated
        self.ops.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert `op` under `name`, replacing any previous entry
    pub fn add(&self, name: impl Into<String>, op: Arc<dyn ExitOperation>) {
        let name = name.into();
        if self.lock().insert(name.clone(), op).is_some() {
            log::debug!("exit operation '{name}' replaced");
        } else {
            log::debug!("exit operation '{name}' registered");
        }
    }

    /// Same as calling [`add`](Self::add) for every entry
    pub fn add_many<I, S>(&self, ops: I)
    where
        I: IntoIterator<Item = (S, Arc<dyn ExitOperation>)>,
        S: Into<String>,
    {
        for (name, op) in ops {
            self.add(name, op);
        }
    }

    /// Copy of the current entries, taken under the lock
    pub fn snapshot(&self) -> OperationMap {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}
