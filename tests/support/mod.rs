#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;

use assert_cmd::Command;
use serde_json::Value;
use taskflow::journal::JOURNAL_FILE;
use taskflow::{Delivery, MemoryBackend, TaskStore};
use tempfile::TempDir;

/// Scratch data directory for one test.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.path().join(JOURNAL_FILE)
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join("taskflow.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn journal_lines(&self) -> Vec<String> {
        fs::read_to_string(self.journal_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `taskflow --dir <this dir>` with a clean environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("taskflow").expect("binary");
        cmd.env_remove("TASKFLOW_DIR")
            .env_remove("RUST_LOG")
            .arg("--dir")
            .arg(self.path());
        cmd
    }

    /// Run a command with `--json` and return the envelope.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(args)
            .arg("--json")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("json envelope")
    }
}

pub fn memory_store() -> TaskStore {
    TaskStore::open(MemoryBackend::new()).expect("memory store")
}

/// Callback that forwards every delivery to the returned receiver.
pub fn collector() -> (impl Fn(&Delivery) + Send + Sync + 'static, Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback = move |delivery: &Delivery| {
        let _ = tx.lock().expect("collector lock").send(delivery.clone());
    };
    (callback, rx)
}
