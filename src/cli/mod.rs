//! Command-line interface for taskflow
//!
//! This module defines the CLI structure using clap derive macros.
//! Task commands live in `task`, the live view in `watch`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{self, Config};
use crate::error::Result;
use crate::journal::JournalBackend;
use crate::output::HumanOutput;
use crate::store::TaskStore;
use crate::view::{Filter, FilteredView, Order};

mod init;
mod task;
mod watch;

/// taskflow - a task tracker with live filtered views
///
/// Tasks live in an append-only journal in the data directory. Every command
/// opens the journal, applies one change or query, and exits; `watch` stays
/// attached and prints each change to its view as an edit script.
#[derive(Parser, Debug)]
#[command(name = "taskflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory holding the task journal
    #[arg(long, global = true, env = config::DIR_ENV)]
    pub dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and a default taskflow.toml
    Init,

    /// Create a task
    Add {
        /// Task title
        title: String,

        /// Longer description
        #[arg(short, long = "desc")]
        description: Option<String>,

        /// Priority: high, medium, low
        #[arg(short, long)]
        priority: Option<String>,
    },

    /// List tasks through a view
    List {
        /// Filter: all, pending, completed, high_priority
        #[arg(short, long)]
        filter: Option<String>,

        /// Order: created_desc, created_asc, priority
        #[arg(short, long)]
        order: Option<String>,
    },

    /// Show one task
    Show {
        /// Task ID
        id: String,
    },

    /// Edit title, description or priority
    Edit {
        /// Task ID
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long = "desc")]
        description: Option<String>,

        /// Remove the description
        #[arg(long, conflicts_with = "description")]
        clear_desc: bool,

        #[arg(short, long)]
        priority: Option<String>,
    },

    /// Flip a task between pending and completed
    Toggle {
        /// Task ID
        id: String,
    },

    /// Mark a task completed
    Done {
        /// Task ID
        id: String,
    },

    /// Mark a task pending again
    Reopen {
        /// Task ID
        id: String,
    },

    /// Delete a task
    Rm {
        /// Task ID
        id: String,
    },

    /// Pending and completed counters
    Stats,

    /// Follow a view and print every change to it
    Watch {
        /// Filter: all, pending, completed, high_priority
        #[arg(short, long)]
        filter: Option<String>,

        /// Order: created_desc, created_asc, priority
        #[arg(short, long)]
        order: Option<String>,

        /// Exit after this many deliveries
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,
    },

    /// Rewrite the journal with one entry per task
    Compact,
}

/// Opened data directory shared by every command.
pub(crate) struct CliContext {
    pub dir: PathBuf,
    pub config: Config,
    pub store: TaskStore,
    pub warnings: Vec<String>,
}

impl CliContext {
    /// Human output carrying the context's warnings.
    pub fn human(&self, header: impl Into<String>) -> HumanOutput {
        let mut human = HumanOutput::new(header);
        for warning in &self.warnings {
            human.push_warning(warning.clone());
        }
        human
    }
}

pub(crate) fn load_context(dir: Option<PathBuf>) -> Result<CliContext> {
    let dir = config::resolve_data_dir(dir)?;
    let (config, warning) = Config::load_from_dir(&dir);
    let backend = JournalBackend::open(&dir, &config.store)?;
    let store = TaskStore::open(backend)?;
    Ok(CliContext {
        dir,
        config,
        store,
        warnings: warning.into_iter().collect(),
    })
}

/// Command-line filter and order over the configured default view.
pub(crate) fn resolve_view(
    filter: Option<&str>,
    order: Option<&str>,
    config: &Config,
) -> Result<FilteredView> {
    let defaults = config.view.view()?;
    let filter = match filter {
        Some(raw) => raw.parse::<Filter>()?,
        None => defaults.filter(),
    };
    let order = match order {
        Some(raw) => raw.parse::<Order>()?,
        None => defaults.order(),
    };
    Ok(FilteredView::new(filter, order))
}

pub(crate) fn parse_priority(raw: Option<&str>) -> Result<Option<crate::task::Priority>> {
    raw.map(str::parse).transpose()
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => init::run(init::InitOptions {
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Add {
                title,
                description,
                priority,
            } => task::run_add(task::AddOptions {
                title,
                description,
                priority,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::List { filter, order } => task::run_list(task::ListOptions {
                filter,
                order,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Show { id } => task::run_show(task::ShowOptions {
                id,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Edit {
                id,
                title,
                description,
                clear_desc,
                priority,
            } => task::run_edit(task::EditOptions {
                id,
                title,
                description,
                clear_desc,
                priority,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Toggle { id } => task::run_transition(task::TransitionOptions {
                id,
                transition: task::Transition::Toggle,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Done { id } => task::run_transition(task::TransitionOptions {
                id,
                transition: task::Transition::Complete,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Reopen { id } => task::run_transition(task::TransitionOptions {
                id,
                transition: task::Transition::Reopen,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Rm { id } => task::run_rm(task::RmOptions {
                id,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Stats => task::run_stats(task::StatsOptions {
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Watch {
                filter,
                order,
                limit,
            } => watch::run(watch::WatchOptions {
                filter,
                order,
                limit,
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Compact => task::run_compact(task::CompactOptions {
                dir: self.dir,
                json: self.json,
                quiet: self.quiet,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_configured_view() {
        let mut config = Config::default();
        config.view.filter = "pending".to_string();
        let view = resolve_view(None, Some("priority"), &config).unwrap();
        assert_eq!(view.name(), "pending/priority");
        assert!(resolve_view(Some("nope"), None, &config).is_err());
    }
}
