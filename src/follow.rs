//! Follow journal changes made by other processes.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::Result;
use crate::journal::JOURNAL_FILE;
use crate::store::TaskStore;

const IDLE_WAIT: Duration = Duration::from_secs(3600);

enum Signal {
    Fs(notify::Result<Event>),
    Stop,
}

/// Reloads a [`TaskStore`] whenever its journal changes on disk. Stops when
/// dropped.
pub struct Follower {
    stop: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Follower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Follower")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Follower {
    pub fn spawn(store: TaskStore, data_dir: impl Into<PathBuf>, debounce: Duration) -> Result<Self> {
        let data_dir = data_dir.into();
        let (tx, rx) = mpsc::channel();
        let fs_tx = tx.clone();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = fs_tx.send(Signal::Fs(res));
        })?;
        watcher.watch(&data_dir, RecursiveMode::NonRecursive)?;

        let handle = thread::Builder::new()
            .name("taskflow-follow".to_string())
            .spawn(move || {
                // Keep the watcher alive for as long as the loop runs.
                let _watcher = watcher;
                let mut pending: Option<Instant> = None;

                loop {
                    let timeout = pending
                        .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                        .unwrap_or(IDLE_WAIT);
                    match rx.recv_timeout(timeout) {
                        Ok(Signal::Fs(Ok(event))) => {
                            if is_journal_event(&event, &data_dir) {
                                pending = Some(Instant::now() + debounce);
                            }
                        }
                        Ok(Signal::Fs(Err(err))) => {
                            tracing::warn!(error = %err, "journal watch error");
                        }
                        Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if pending.take().is_some() {
                                match store.refresh() {
                                    Ok(changed) => {
                                        tracing::debug!(changed, "journal changed on disk")
                                    }
                                    Err(err) => {
                                        tracing::warn!(error = %err, "reload after journal change failed")
                                    }
                                }
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            stop: tx,
            handle: Some(handle),
        })
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        let _ = self.stop.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn is_journal_event(event: &Event, data_dir: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    // Some platforms report directory-level events without paths.
    event.paths.is_empty()
        || event.paths.iter().any(|path| {
            path.file_name().is_some_and(|name| name == JOURNAL_FILE)
                || path.as_path() == data_dir
        })
}
