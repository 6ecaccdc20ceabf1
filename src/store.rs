//! The authoritative task collection.
//!
//! [`TaskStore`] owns record identity and durability. Mutations go through a
//! single writer lock held across persist, apply and notify, so watchers see
//! change events in mutation order and readers never observe a half-applied
//! mutation. Change events carry only the new revision; watchers re-read the
//! collection when they need it.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::Utc;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::journal::{Backend, CompactReport};
use crate::task::{Counters, TaskDraft, TaskId, TaskRecord};

/// "Something changed" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub revision: u64,
}

/// Consistent copy of the collection, in id order.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub records: Vec<TaskRecord>,
}

struct State {
    records: BTreeMap<TaskId, TaskRecord>,
    next_id: TaskId,
    revision: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    senders: HashMap<u64, Sender<StoreChange>>,
}

struct Inner {
    backend: Mutex<Box<dyn Backend>>,
    state: RwLock<State>,
    watchers: Mutex<Watchers>,
}

/// Shared handle to the task collection. Clones refer to the same store.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("TaskStore")
            .field("tasks", &state.records.len())
            .field("revision", &state.revision)
            .finish()
    }
}

/// Keeps a watch registered. Dropping it deregisters the watch.
#[derive(Debug)]
pub struct WatchGuard {
    id: u64,
    inner: Weak<Inner>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut watchers = inner.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            watchers.senders.remove(&self.id);
        }
    }
}

impl TaskStore {
    /// Load every record from `backend` and take ownership of it.
    pub fn open(backend: impl Backend + 'static) -> Result<Self> {
        let mut backend: Box<dyn Backend> = Box::new(backend);
        let loaded = backend.load_all()?;
        let records: BTreeMap<TaskId, TaskRecord> =
            loaded.into_iter().map(|task| (task.id, task)).collect();
        let next_id = next_id_after(&records, TaskId::new(1));
        tracing::debug!(
            backend = %backend.describe(),
            tasks = records.len(),
            next_id = %next_id,
            "task store opened"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                backend: Mutex::new(backend),
                state: RwLock::new(State {
                    records,
                    next_id,
                    revision: 0,
                }),
                watchers: Mutex::new(Watchers::default()),
            }),
        })
    }

    pub fn create(&self, draft: TaskDraft) -> Result<TaskId> {
        let draft = draft.validated()?;
        let mut backend = self.lock_backend();

        let next = self.read_state().next_id;
        // The backend has the final say: another writer may own `next`.
        let record = backend.insert(draft, next, Utc::now())?;
        let id = record.id;

        let revision = {
            let mut state = self.write_state();
            state.records.insert(id, record);
            state.next_id = state.next_id.max(id.next());
            state.bump()
        };
        self.notify(revision);
        tracing::debug!(id = %id, revision, "task created");
        Ok(id)
    }

    /// Replace a stored record. The record must already satisfy the
    /// completion invariant; its `created_at` is ignored in favour of the
    /// stored one.
    pub fn update(&self, record: TaskRecord) -> Result<TaskRecord> {
        record.check_invariant()?;
        let mut backend = self.lock_backend();

        let created_at = self
            .read_state()
            .records
            .get(&record.id)
            .map(|stored| stored.created_at)
            .ok_or(Error::NotFound(record.id))?;
        let record = TaskRecord {
            created_at,
            ..record
        };
        backend.persist(&record)?;

        let revision = {
            let mut state = self.write_state();
            state.records.insert(record.id, record.clone());
            state.bump()
        };
        self.notify(revision);
        tracing::debug!(id = %record.id, revision, completed = record.completed, "task updated");
        Ok(record)
    }

    /// Remove a record, returning what was stored.
    pub fn delete(&self, id: TaskId) -> Result<TaskRecord> {
        let mut backend = self.lock_backend();
        if !self.read_state().records.contains_key(&id) {
            return Err(Error::NotFound(id));
        }
        backend.remove(id)?;

        let (removed, revision) = {
            let mut state = self.write_state();
            let removed = state.records.remove(&id).ok_or(Error::NotFound(id))?;
            (removed, state.bump())
        };
        self.notify(revision);
        tracing::debug!(id = %id, revision, "task deleted");
        Ok(removed)
    }

    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.read_state()
            .records
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.read_state();
        StoreSnapshot {
            revision: state.revision,
            records: state.records.values().cloned().collect(),
        }
    }

    pub fn counters(&self) -> Counters {
        Counters::tally(self.read_state().records.values())
    }

    pub fn revision(&self) -> u64 {
        self.read_state().revision
    }

    pub fn len(&self) -> usize {
        self.read_state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a watcher. Events arrive on the receiver for as long as the
    /// guard is alive.
    pub fn watch(&self) -> (WatchGuard, Receiver<StoreChange>) {
        let (tx, rx) = mpsc::channel();
        let mut watchers = self.lock_watchers();
        let id = watchers.next_id;
        watchers.next_id += 1;
        watchers.senders.insert(id, tx);
        (
            WatchGuard {
                id,
                inner: Arc::downgrade(&self.inner),
            },
            rx,
        )
    }

    pub fn watcher_count(&self) -> usize {
        self.lock_watchers().senders.len()
    }

    /// Reload from the backend after another process changed it. Returns
    /// whether the collection changed.
    pub fn refresh(&self) -> Result<bool> {
        let mut backend = self.lock_backend();
        let loaded: BTreeMap<TaskId, TaskRecord> = backend
            .load_all()?
            .into_iter()
            .map(|task| (task.id, task))
            .collect();

        let revision = {
            let mut state = self.write_state();
            if state.records == loaded {
                return Ok(false);
            }
            state.next_id = next_id_after(&loaded, state.next_id);
            state.records = loaded;
            state.bump()
        };
        self.notify(revision);
        tracing::debug!(revision, "task store refreshed from backend");
        Ok(true)
    }

    pub fn compact(&self) -> Result<CompactReport> {
        self.lock_backend().compact()
    }

    pub fn backend_description(&self) -> String {
        self.lock_backend().describe()
    }

    fn notify(&self, revision: u64) {
        let watchers = self.lock_watchers();
        for sender in watchers.senders.values() {
            // A receiver dropped before its guard only misses events.
            let _ = sender.send(StoreChange { revision });
        }
    }

    fn lock_backend(&self) -> MutexGuard<'_, Box<dyn Backend>> {
        self.inner
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_watchers(&self) -> MutexGuard<'_, Watchers> {
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_id_after(records: &BTreeMap<TaskId, TaskRecord>, floor: TaskId) -> TaskId {
    records
        .keys()
        .next_back()
        .map(|last| last.next())
        .filter(|candidate| *candidate > floor)
        .unwrap_or(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryBackend;
    use crate::task::Priority;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Memory backend whose writes can be made to fail.
    #[derive(Clone, Default)]
    struct FlakyBackend {
        memory: MemoryBackend,
        failing: Arc<AtomicBool>,
    }

    impl FlakyBackend {
        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk unavailable",
                )));
            }
            Ok(())
        }
    }

    impl Backend for FlakyBackend {
        fn load_all(&mut self) -> Result<Vec<TaskRecord>> {
            self.memory.load_all()
        }

        fn persist(&mut self, task: &TaskRecord) -> Result<()> {
            self.check()?;
            self.memory.persist(task)
        }

        fn remove(&mut self, id: TaskId) -> Result<()> {
            self.check()?;
            self.memory.remove(id)
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn store() -> TaskStore {
        TaskStore::open(MemoryBackend::new()).unwrap()
    }

    #[test]
    fn create_then_get_returns_pending_record() {
        let store = store();
        let id = store
            .create(TaskDraft::new(" Pay rent ").priority(Priority::High))
            .unwrap();
        let task = store.get(id).unwrap();
        assert_eq!(task.title, "Pay rent");
        assert!(!task.completed);
        assert!(task.completed_at.is_none());
        assert_eq!(task.priority, Priority::High);
        assert_eq!(store.counters(), Counters { pending: 1, completed: 0 });
    }

    #[test]
    fn ids_are_unique_and_start_at_one() {
        let store = store();
        let a = store.create(TaskDraft::new("a")).unwrap();
        let b = store.create(TaskDraft::new("b")).unwrap();
        assert_eq!(a, TaskId::new(1));
        assert_eq!(b, TaskId::new(2));
    }

    #[test]
    fn blank_title_is_rejected_without_notification() {
        let store = store();
        let (_guard, rx) = store.watch();
        assert!(matches!(
            store.create(TaskDraft::new("   ")),
            Err(Error::Validation(_))
        ));
        assert!(rx.try_recv().is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn update_and_delete_unknown_ids_fail() {
        let store = store();
        let id = store.create(TaskDraft::new("a")).unwrap();
        let mut ghost = store.get(id).unwrap();
        ghost.id = TaskId::new(99);
        assert!(store.update(ghost).unwrap_err().is_not_found());
        assert!(store.delete(TaskId::new(99)).unwrap_err().is_not_found());
    }

    #[test]
    fn update_rejects_broken_invariant_and_keeps_created_at() {
        let store = store();
        let id = store.create(TaskDraft::new("a")).unwrap();
        let original = store.get(id).unwrap();

        let mut broken = original.clone();
        broken.completed = true;
        assert!(matches!(store.update(broken), Err(Error::Validation(_))));

        let mut moved = original.mark_completed(Utc::now());
        moved.created_at = original.created_at + chrono::Duration::days(3);
        let stored = store.update(moved).unwrap();
        assert_eq!(stored.created_at, original.created_at);
        assert!(stored.completed);
    }

    #[test]
    fn failed_persist_changes_nothing() {
        let backend = FlakyBackend::default();
        let failing = Arc::clone(&backend.failing);
        let store = TaskStore::open(backend).unwrap();
        let id = store.create(TaskDraft::new("a")).unwrap();
        let revision = store.revision();
        let (_guard, rx) = store.watch();

        failing.store(true, Ordering::SeqCst);
        let err = store.create(TaskDraft::new("b")).unwrap_err();
        assert!(err.is_storage());
        let done = store.get(id).unwrap().mark_completed(Utc::now());
        assert!(store.update(done).unwrap_err().is_storage());
        assert!(store.delete(id).unwrap_err().is_storage());

        assert_eq!(store.revision(), revision);
        assert_eq!(store.len(), 1);
        assert!(!store.get(id).unwrap().completed);
        assert!(rx.try_recv().is_err());

        failing.store(false, Ordering::SeqCst);
        assert_eq!(store.create(TaskDraft::new("b")).unwrap(), TaskId::new(2));
    }

    #[test]
    fn watchers_see_every_revision_in_order() {
        let store = store();
        let (_guard, rx) = store.watch();
        let id = store.create(TaskDraft::new("a")).unwrap();
        let done = store.get(id).unwrap().toggled(Utc::now());
        store.update(done).unwrap();
        store.delete(id).unwrap();

        let revisions: Vec<u64> = rx.try_iter().map(|change| change.revision).collect();
        assert_eq!(revisions, vec![1, 2, 3]);
    }

    #[test]
    fn dropping_the_guard_deregisters() {
        let store = store();
        let (first, _rx1) = store.watch();
        let (second, _rx2) = store.watch();
        assert_eq!(store.watcher_count(), 2);
        drop(first);
        assert_eq!(store.watcher_count(), 1);
        drop(second);
        assert_eq!(store.watcher_count(), 0);
    }

    #[test]
    fn reopening_continues_id_allocation() {
        let backend = MemoryBackend::new();
        let store = TaskStore::open(backend.clone()).unwrap();
        store.create(TaskDraft::new("a")).unwrap();
        let b = store.create(TaskDraft::new("b")).unwrap();
        store.delete(TaskId::new(1)).unwrap();
        drop(store);

        let reopened = TaskStore::open(backend).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(b).unwrap().title, "b");
        assert_eq!(reopened.create(TaskDraft::new("c")).unwrap(), TaskId::new(3));
    }

    #[test]
    fn refresh_picks_up_external_writes() {
        let backend = MemoryBackend::new();
        let ours = TaskStore::open(backend.clone()).unwrap();
        let theirs = TaskStore::open(backend).unwrap();
        let (_guard, rx) = ours.watch();

        assert!(!ours.refresh().unwrap());
        let id = theirs.create(TaskDraft::new("from elsewhere")).unwrap();
        assert!(ours.refresh().unwrap());
        assert_eq!(ours.get(id).unwrap().title, "from elsewhere");
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert_eq!(ours.create(TaskDraft::new("next")).unwrap(), TaskId::new(2));
    }

    #[test]
    fn snapshot_is_in_id_order() {
        let store = store();
        for title in ["c", "a", "b"] {
            store.create(TaskDraft::new(title)).unwrap();
        }
        let snapshot = store.snapshot();
        let ids: Vec<u64> = snapshot.records.iter().map(|t| t.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(snapshot.revision, 3);
    }
}
