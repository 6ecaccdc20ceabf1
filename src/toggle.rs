//! Per-record serialized completion transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use crate::error::Result;
use crate::store::TaskStore;
use crate::task::{Priority, TaskId, TaskRecord};

/// Read-modify-write operations on single records.
///
/// Calls on the same id run one at a time, so each one sees the result of
/// the previous one. Calls on different ids do not wait for each other.
#[derive(Debug, Clone)]
pub struct CompletionToggle {
    store: TaskStore,
    locks: Arc<Mutex<HashMap<TaskId, Arc<Mutex<()>>>>>,
}

impl CompletionToggle {
    pub fn new(store: TaskStore) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn toggle(&self, id: TaskId) -> Result<TaskRecord> {
        self.transition(id, |task| Ok(task.toggled(Utc::now())))
    }

    pub fn mark_completed(&self, id: TaskId) -> Result<TaskRecord> {
        self.transition(id, |task| Ok(task.mark_completed(Utc::now())))
    }

    pub fn mark_pending(&self, id: TaskId) -> Result<TaskRecord> {
        self.transition(id, |task| Ok(task.mark_pending()))
    }

    /// Whole-record edit of title, description and priority.
    pub fn revise(
        &self,
        id: TaskId,
        title: &str,
        description: Option<&str>,
        priority: Priority,
    ) -> Result<TaskRecord> {
        self.transition(id, |task| task.revised(title, description, priority))
    }

    fn transition(
        &self,
        id: TaskId,
        change: impl FnOnce(&TaskRecord) -> Result<TaskRecord>,
    ) -> Result<TaskRecord> {
        let lock = self.lock_for(id);
        let result = {
            let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.store
                .get(id)
                .and_then(|current| change(&current))
                .and_then(|next| self.store.update(next))
        };
        self.release(id, lock);
        if let Ok(task) = &result {
            tracing::debug!(id = %id, completed = task.completed, "transition applied");
        }
        result
    }

    fn lock_for(&self, id: TaskId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    fn release(&self, id: TaskId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        // Only the map's own reference left: nobody holds or waits on it.
        if locks.get(&id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn tracked_ids(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
