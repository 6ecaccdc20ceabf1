//! taskflow - Reactive Task Tracking Library
//!
//! This library provides the core of the taskflow CLI: a task store that
//! emits live, filtered views of its records to any number of subscribers.
//!
//! # Core Concepts
//!
//! - **Tasks**: records with a completion lifecycle whose timestamp always
//!   agrees with the completed flag
//! - **Store**: the authoritative collection, persisted to a journal and
//!   watched through change notifications
//! - **Views**: named filter + ordering pairs materialized on demand
//! - **Subscriptions**: at most one live view per subscriber context
//! - **Reconciliation**: minimal edit scripts between two materializations
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `taskflow.toml`
//! - `error`: Error types and result aliases
//! - `follow`: Reloading the store when the journal changes on disk
//! - `journal`: Durable backends (journal file, in-memory)
//! - `lock`: File locking and atomic operations for concurrency safety
//! - `output`: Human and JSON output for CLI commands
//! - `reconcile`: Identity-keyed diff of ordered task sequences
//! - `store`: The task store and its change notifications
//! - `subscription`: Per-context live views
//! - `task`: Task records and lifecycle transitions
//! - `toggle`: Per-record serialized completion changes
//! - `view`: Filters and orderings

pub mod cli;
pub mod config;
pub mod error;
pub mod follow;
pub mod journal;
pub mod lock;
pub mod output;
pub mod reconcile;
pub mod store;
pub mod subscription;
pub mod task;
pub mod toggle;
pub mod view;

pub use error::{Error, Result};
pub use journal::{Backend, JournalBackend, MemoryBackend};
pub use reconcile::{diff, EditOp, EditScript};
pub use store::{StoreChange, TaskStore, WatchGuard};
pub use subscription::{ContextId, Delivery, SubscriptionManager};
pub use task::{Counters, Priority, TaskDraft, TaskId, TaskRecord};
pub use toggle::CompletionToggle;
pub use view::{Filter, FilteredView, Order};
