//! Error types for taskflow
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (validation, unknown task, bad arguments or config)
//! - 4: Operation failed (durable store I/O, lock contention, corrupt journal)

use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskId;

/// Exit codes for the taskflow CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskflow operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Storage failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Corrupt journal {path} at line {line}: {reason}")]
    CorruptJournal {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_)
            | Error::NotFound(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::CorruptJournal { .. }
            | Error::Watch(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// True for failures of the environment (journal, lock, config file
    /// I/O, file watcher) rather than of the request. Agrees with the
    /// operation-failed exit code.
    pub fn is_storage(&self) -> bool {
        self.exit_code() == exit_codes::OPERATION_FAILED
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::NotFound(id) => Some(serde_json::json!({ "id": id })),
            Error::LockFailed(path) => Some(serde_json::json!({
                "path": path.to_string_lossy(),
            })),
            Error::CorruptJournal { path, line, .. } => Some(serde_json::json!({
                "path": path.to_string_lossy(),
                "line": line,
            })),
            _ => None,
        }
    }
}

/// Result type alias for taskflow operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_map_to_exit_code_two() {
        assert_eq!(
            Error::Validation("title cannot be empty".into()).exit_code(),
            exit_codes::USER_ERROR
        );
        assert_eq!(Error::NotFound(TaskId::new(7)).exit_code(), exit_codes::USER_ERROR);
        assert!(!Error::NotFound(TaskId::new(7)).is_storage());
    }

    #[test]
    fn storage_errors_map_to_exit_code_four() {
        let err = Error::LockFailed(PathBuf::from("/tmp/tasks.lock"));
        assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
        assert!(err.is_storage());

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(io.is_storage());
    }

    #[test]
    fn storage_class_matches_exit_code() {
        let toml_err = toml::from_str::<toml::Value>("[store").unwrap_err();
        let errors = [
            Error::from(toml_err),
            Error::from(notify::Error::generic("watch limit reached")),
            Error::CorruptJournal {
                path: PathBuf::from("tasks.jsonl"),
                line: 3,
                reason: "unparseable entry".into(),
            },
            Error::InvalidConfig("view.order".into()),
            Error::InvalidArgument("nothing to edit".into()),
        ];
        for err in errors {
            assert_eq!(
                err.is_storage(),
                err.exit_code() == exit_codes::OPERATION_FAILED,
                "{err}"
            );
        }
    }

    #[test]
    fn not_found_carries_the_id() {
        let err = Error::NotFound(TaskId::new(42));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Task not found: 42");
        assert_eq!(err.details(), Some(serde_json::json!({ "id": 42 })));
    }
}
