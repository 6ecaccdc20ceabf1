//! Durable backends for the task store.
//!
//! The store talks to its durable side through [`Backend`]. Two backends
//! ship with the crate:
//!
//! - [`JournalBackend`]: an append-only JSON Lines journal in a data directory
//! - [`MemoryBackend`]: an in-process map, shared between clones
//!
//! # Directory Structure
//!
//! ```text
//! <data dir>/
//!   taskflow.toml     # Optional configuration
//!   tasks.jsonl       # Journal: one put/remove entry per line
//!   tasks.lock        # Exclusive lock held for every write
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::lock::{self, FileLock};
use crate::task::{TaskDraft, TaskId, TaskRecord};

pub const JOURNAL_FILE: &str = "tasks.jsonl";
pub const LOCK_FILE: &str = "tasks.lock";

/// Durable side of a [`TaskStore`](crate::store::TaskStore).
///
/// Each call either fully succeeds or leaves the durable state as it was.
pub trait Backend: Send {
    fn load_all(&mut self) -> Result<Vec<TaskRecord>>;

    fn persist(&mut self, task: &TaskRecord) -> Result<()>;

    /// Persist a new record built from `draft`, choosing its id. The id is
    /// at least `next` and unused in the durable store at the moment of
    /// writing, even when other writers share it.
    fn insert(&mut self, draft: TaskDraft, next: TaskId, now: DateTime<Utc>) -> Result<TaskRecord> {
        let record = draft.into_record(next, now);
        self.persist(&record)?;
        Ok(record)
    }

    fn remove(&mut self, id: TaskId) -> Result<()>;

    /// Rewrite the durable form without changing its contents.
    fn compact(&mut self) -> Result<CompactReport> {
        Ok(CompactReport::default())
    }

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactReport {
    pub before_entries: usize,
    pub after_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub op: JournalOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    Put { task: TaskRecord },
    Remove { id: TaskId },
}

impl JournalEntry {
    fn new(op: JournalOp) -> Self {
        Self {
            entry_id: Ulid::new().to_string(),
            timestamp: Utc::now(),
            op,
        }
    }
}

/// Journal-backed durable store.
#[derive(Debug)]
pub struct JournalBackend {
    dir: PathBuf,
    lock_timeout_ms: u64,
    compact_after: usize,
    entries: usize,
    live: HashSet<TaskId>,
}

impl JournalBackend {
    pub fn open(dir: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock_timeout_ms: config.lock_timeout_ms,
            compact_after: config.compact_after,
            entries: 0,
            live: HashSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(self.dir.join(LOCK_FILE), self.lock_timeout_ms)
    }

    fn append(&mut self, op: JournalOp) -> Result<()> {
        let _lock = self.lock()?;
        self.append_locked(op)
    }

    /// Append one entry. The journal lock must be held.
    fn append_locked(&mut self, op: JournalOp) -> Result<()> {
        let entry = JournalEntry::new(op);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        self.entries += 1;
        match &entry.op {
            JournalOp::Put { task } => {
                self.live.insert(task.id);
            }
            JournalOp::Remove { id } => {
                self.live.remove(id);
            }
        }
        Ok(())
    }

    /// Compact once the journal has grown past its bound. The write that
    /// triggered this has already succeeded, so a failure is only logged.
    fn maybe_compact(&mut self) {
        if self.entries <= self.live.len() + self.compact_after {
            return;
        }
        if let Err(err) = self.compact() {
            tracing::warn!(
                journal = %self.journal_path().display(),
                error = %err,
                "automatic compaction failed"
            );
        }
    }

    /// Replay the journal. Must be called with the journal lock held.
    fn replay(&self) -> Result<Replay> {
        let path = self.journal_path();
        let mut replay = Replay::default();
        if !path.exists() {
            return Ok(replay);
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut good_len: u64 = 0;
        let mut torn: Option<usize> = None;

        for (idx, line) in reader.split(b'\n').enumerate() {
            let raw = line?;
            let line_no = idx + 1;
            if let Some(previous) = torn {
                // Only the final line may be incomplete.
                return Err(Error::CorruptJournal {
                    path,
                    line: previous,
                    reason: "unparseable entry followed by more entries".to_string(),
                });
            }
            let text = String::from_utf8_lossy(&raw);
            if text.trim().is_empty() {
                good_len += raw.len() as u64 + 1;
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&text) {
                Ok(entry) => {
                    good_len += raw.len() as u64 + 1;
                    replay.apply(entry);
                }
                Err(_) => torn = Some(line_no),
            }
        }

        if let Some(line) = torn {
            // A complete line that fails to parse is corruption, not a crash.
            if file_ends_with_newline(&path)? {
                return Err(Error::CorruptJournal {
                    path,
                    line,
                    reason: "unparseable entry".to_string(),
                });
            }
            tracing::warn!(
                path = %path.display(),
                line,
                "dropping torn trailing journal entry"
            );
            OpenOptions::new().write(true).open(&path)?.set_len(good_len)?;
        }

        Ok(replay)
    }
}

fn file_ends_with_newline(path: &Path) -> Result<bool> {
    let data = fs::read(path)?;
    Ok(data.last() == Some(&b'\n'))
}

#[derive(Default)]
struct Replay {
    records: BTreeMap<TaskId, TaskRecord>,
    entries: usize,
    /// Highest id named by any entry, removed or not.
    max_id: Option<TaskId>,
}

impl Replay {
    fn apply(&mut self, entry: JournalEntry) {
        self.entries += 1;
        let id = match entry.op {
            JournalOp::Put { task } => {
                let id = task.id;
                self.records.insert(id, task);
                id
            }
            JournalOp::Remove { id } => {
                self.records.remove(&id);
                id
            }
        };
        self.max_id = self.max_id.max(Some(id));
    }
}

impl Backend for JournalBackend {
    fn load_all(&mut self) -> Result<Vec<TaskRecord>> {
        let _lock = self.lock()?;
        let replay = self.replay()?;
        self.entries = replay.entries;
        self.live = replay.records.keys().copied().collect();
        tracing::debug!(
            journal = %self.journal_path().display(),
            entries = replay.entries,
            tasks = replay.records.len(),
            "journal replayed"
        );
        Ok(replay.records.into_values().collect())
    }

    fn persist(&mut self, task: &TaskRecord) -> Result<()> {
        self.append(JournalOp::Put { task: task.clone() })?;
        self.maybe_compact();
        Ok(())
    }

    /// Replays under the journal lock so ids written by other processes
    /// since this one last read the journal are never handed out again.
    fn insert(&mut self, draft: TaskDraft, next: TaskId, now: DateTime<Utc>) -> Result<TaskRecord> {
        let record = {
            let _lock = self.lock()?;
            let replay = self.replay()?;
            self.entries = replay.entries;
            self.live = replay.records.keys().copied().collect();

            let id = replay.max_id.map_or(next, |max| next.max(max.next()));
            let record = draft.into_record(id, now);
            self.append_locked(JournalOp::Put {
                task: record.clone(),
            })?;
            record
        };
        self.maybe_compact();
        Ok(record)
    }

    fn remove(&mut self, id: TaskId) -> Result<()> {
        self.append(JournalOp::Remove { id })?;
        self.maybe_compact();
        Ok(())
    }

    fn compact(&mut self) -> Result<CompactReport> {
        let _lock = self.lock()?;
        let replay = self.replay()?;

        let mut buffer = Vec::new();
        for task in replay.records.values() {
            let entry = JournalEntry::new(JournalOp::Put { task: task.clone() });
            buffer.extend_from_slice(serde_json::to_string(&entry)?.as_bytes());
            buffer.push(b'\n');
        }
        lock::write_atomic(self.journal_path(), &buffer)?;

        let report = CompactReport {
            before_entries: replay.entries,
            after_entries: replay.records.len(),
        };
        self.entries = report.after_entries;
        self.live = replay.records.keys().copied().collect();
        tracing::info!(
            before = report.before_entries,
            after = report.after_entries,
            "journal compacted"
        );
        Ok(report)
    }

    fn describe(&self) -> String {
        self.journal_path().display().to_string()
    }
}

/// In-process backend. Clones share the same records, which lets a second
/// store "reopen" what the first one persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<Mutex<BTreeMap<TaskId, TaskRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Backend for MemoryBackend {
    fn load_all(&mut self) -> Result<Vec<TaskRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    fn persist(&mut self, task: &TaskRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(task.id, task.clone());
        Ok(())
    }

    fn insert(&mut self, draft: TaskDraft, next: TaskId, now: DateTime<Utc>) -> Result<TaskRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let id = records
            .keys()
            .next_back()
            .map_or(next, |max| next.max(max.next()));
        let record = draft.into_record(id, now);
        records.insert(id, record.clone());
        Ok(record)
    }

    fn remove(&mut self, id: TaskId) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(&id);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use tempfile::TempDir;

    fn config(compact_after: usize) -> StoreConfig {
        StoreConfig {
            compact_after,
            ..StoreConfig::default()
        }
    }

    fn task(id: u64, title: &str) -> TaskRecord {
        TaskDraft::new(title)
            .priority(Priority::High)
            .into_record(TaskId::new(id), Utc::now())
    }

    #[test]
    fn journal_replays_puts_and_removes() {
        let dir = TempDir::new().unwrap();
        let mut backend = JournalBackend::open(dir.path(), &config(256)).unwrap();
        backend.persist(&task(1, "one")).unwrap();
        backend.persist(&task(2, "two")).unwrap();
        backend.persist(&task(1, "one, edited")).unwrap();
        backend.remove(TaskId::new(2)).unwrap();

        let mut reopened = JournalBackend::open(dir.path(), &config(256)).unwrap();
        let records = reopened.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "one, edited");
        assert_eq!(records[0].priority, Priority::High);
    }

    #[test]
    fn torn_trailing_line_is_dropped_and_truncated() {
        let dir = TempDir::new().unwrap();
        let mut backend = JournalBackend::open(dir.path(), &config(256)).unwrap();
        backend.persist(&task(1, "kept")).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(backend.journal_path())
            .unwrap();
        file.write_all(b"{\"entry_id\":\"01H").unwrap();
        drop(file);

        let records = backend.load_all().unwrap();
        assert_eq!(records.len(), 1);

        backend.persist(&task(2, "after crash")).unwrap();
        let records = backend.load_all().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut backend = JournalBackend::open(dir.path(), &config(256)).unwrap();
        backend.persist(&task(1, "one")).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(backend.journal_path())
            .unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);
        backend.persist(&task(2, "two")).unwrap();

        let err = backend.load_all().unwrap_err();
        assert!(matches!(err, Error::CorruptJournal { line: 2, .. }));
        assert!(err.is_storage());
    }

    #[test]
    fn compaction_keeps_one_entry_per_live_task() {
        let dir = TempDir::new().unwrap();
        let mut backend = JournalBackend::open(dir.path(), &config(1000)).unwrap();
        for round in 0..5 {
            backend.persist(&task(1, &format!("rev {round}"))).unwrap();
        }
        backend.persist(&task(2, "gone")).unwrap();
        backend.remove(TaskId::new(2)).unwrap();

        let report = backend.compact().unwrap();
        assert_eq!(report.before_entries, 7);
        assert_eq!(report.after_entries, 1);

        let records = backend.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "rev 4");
    }

    #[test]
    fn automatic_compaction_bounds_the_journal() {
        let dir = TempDir::new().unwrap();
        let mut backend = JournalBackend::open(dir.path(), &config(4)).unwrap();
        for round in 0..20 {
            backend.persist(&task(1, &format!("rev {round}"))).unwrap();
        }
        let lines = fs::read_to_string(backend.journal_path())
            .unwrap()
            .lines()
            .count();
        assert!(lines <= 1 + 4 + 1, "journal has {lines} lines");
        assert_eq!(backend.load_all().unwrap()[0].title, "rev 19");
    }

    #[test]
    fn failed_automatic_compaction_keeps_the_write() {
        let dir = TempDir::new().unwrap();
        let mut backend = JournalBackend::open(dir.path(), &config(1)).unwrap();
        // Occupy the temp path so the atomic rewrite cannot create its file.
        let blocker = dir
            .path()
            .join(format!("{JOURNAL_FILE}.tmp.{}", std::process::id()));
        fs::create_dir(&blocker).unwrap();

        backend.persist(&task(1, "first")).unwrap();
        backend.persist(&task(1, "second")).unwrap();
        backend.persist(&task(1, "third")).unwrap();
        backend.remove(TaskId::new(1)).unwrap();
        assert!(backend.compact().is_err());

        let mut reopened = JournalBackend::open(dir.path(), &config(1)).unwrap();
        assert!(reopened.load_all().unwrap().is_empty());
        assert_eq!(fs::read_to_string(backend.journal_path()).unwrap().lines().count(), 4);
    }

    #[test]
    fn insert_skips_ids_written_by_another_writer() {
        let dir = TempDir::new().unwrap();
        let mut first = JournalBackend::open(dir.path(), &config(256)).unwrap();
        let mut second = JournalBackend::open(dir.path(), &config(256)).unwrap();
        first.load_all().unwrap();
        second.load_all().unwrap();

        let a = first
            .insert(TaskDraft::new("from first"), TaskId::new(1), Utc::now())
            .unwrap();
        let b = second
            .insert(TaskDraft::new("from second"), TaskId::new(1), Utc::now())
            .unwrap();
        assert_eq!(a.id, TaskId::new(1));
        assert_eq!(b.id, TaskId::new(2));

        // Removed ids are not reused either while the journal remembers them.
        second.remove(b.id).unwrap();
        let c = first
            .insert(TaskDraft::new("later"), TaskId::new(2), Utc::now())
            .unwrap();
        assert_eq!(c.id, TaskId::new(3));
        assert_eq!(first.load_all().unwrap().len(), 2);
    }

    #[test]
    fn memory_backend_clones_share_records() {
        let mut first = MemoryBackend::new();
        let mut second = first.clone();
        first.persist(&task(3, "shared")).unwrap();
        assert_eq!(second.load_all().unwrap().len(), 1);
        second.remove(TaskId::new(3)).unwrap();
        assert!(first.is_empty());
    }
}
