//! Named predicate and ordering over the task collection.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::task::TaskRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    All,
    Pending,
    Completed,
    HighPriority,
}

impl Filter {
    pub const ALL: [Filter; 4] = [
        Filter::All,
        Filter::Pending,
        Filter::Completed,
        Filter::HighPriority,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::HighPriority => "high_priority",
        }
    }

    pub fn matches(self, task: &TaskRecord) -> bool {
        match self {
            Self::All => true,
            Self::Pending => !task.completed,
            Self::Completed => task.completed,
            Self::HighPriority => task.priority == crate::task::Priority::High,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "all" => Ok(Self::All),
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "high_priority" | "highPriority" | "high-priority" => Ok(Self::HighPriority),
            other => Err(Error::InvalidArgument(format!(
                "unknown filter '{other}' (expected all, pending, completed or high_priority)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Order {
    /// Newest first
    #[default]
    CreatedDesc,
    CreatedAsc,
    /// High before medium before low, newest first within a priority
    Priority,
}

impl Order {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedDesc => "created_desc",
            Self::CreatedAsc => "created_asc",
            Self::Priority => "priority",
        }
    }

    /// Total order: every ordering falls back to id ascending.
    pub fn compare(self, a: &TaskRecord, b: &TaskRecord) -> Ordering {
        let primary = match self {
            Self::CreatedDesc => b.created_at.cmp(&a.created_at),
            Self::CreatedAsc => a.created_at.cmp(&b.created_at),
            Self::Priority => a
                .priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| b.created_at.cmp(&a.created_at)),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Order {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "created_desc" | "newest" => Ok(Self::CreatedDesc),
            "created_asc" | "oldest" => Ok(Self::CreatedAsc),
            "priority" => Ok(Self::Priority),
            other => Err(Error::InvalidArgument(format!(
                "unknown order '{other}' (expected created_desc, created_asc or priority)"
            ))),
        }
    }
}

/// A (filter, order) pair. Owns no records; [`FilteredView::recompute`]
/// materializes it against a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FilteredView {
    filter: Filter,
    order: Order,
}

impl FilteredView {
    pub fn new(filter: Filter, order: Order) -> Self {
        Self { filter, order }
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.filter, self.order)
    }

    pub fn recompute<'a>(&self, records: impl IntoIterator<Item = &'a TaskRecord>) -> Vec<TaskRecord> {
        let mut selected: Vec<TaskRecord> = records
            .into_iter()
            .filter(|task| self.filter.matches(task))
            .cloned()
            .collect();
        selected.sort_by(|a, b| self.order.compare(a, b));
        selected
    }
}

impl From<Filter> for FilteredView {
    fn from(filter: Filter) -> Self {
        Self::new(filter, Order::default())
    }
}

impl fmt::Display for FilteredView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.filter, self.order)
    }
}

impl FromStr for FilteredView {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((filter, order)) => Ok(Self::new(filter.parse()?, order.parse()?)),
            None => Ok(Self::from(s.parse::<Filter>()?)),
        }
    }
}

impl Serialize for FilteredView {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
