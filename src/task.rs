//! Task records and their lifecycle transitions.
//!
//! A [`TaskRecord`] is only ever changed by building a new value: either a
//! whole-record revision or one of the completion transitions. Every
//! transition keeps `completed_at` present exactly when `completed` is true.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stable task identity, assigned by the store on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('#');
        trimmed
            .parse::<u64>()
            .ok()
            .filter(|raw| *raw > 0)
            .map(TaskId)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid task id '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort rank, most urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "h" => Ok(Self::High),
            "medium" | "m" => Ok(Self::Medium),
            "low" | "l" => Ok(Self::Low),
            _ => Err(Error::Validation(format!(
                "invalid priority '{}' (expected high, medium or low)",
                s.trim()
            ))),
        }
    }
}

/// A task as submitted by a client, before the store has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: Priority::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Trim the text fields and reject a blank title.
    pub fn validated(self) -> Result<Self> {
        Ok(Self {
            title: normalize_title(&self.title)?,
            description: normalize_description(self.description.as_deref()),
            priority: self.priority,
        })
    }

    /// Materialize the draft as a fresh pending record. Callers are expected
    /// to have run [`TaskDraft::validated`] first.
    pub fn into_record(self, id: TaskId, now: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            completed: false,
            created_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Flip completion. Newly completed records are stamped with `at`,
    /// newly pending ones lose their completion time.
    pub fn toggled(&self, at: DateTime<Utc>) -> Self {
        if self.completed {
            self.mark_pending()
        } else {
            self.mark_completed(at)
        }
    }

    /// Completed as of `at`; an already completed record keeps its instant.
    pub fn mark_completed(&self, at: DateTime<Utc>) -> Self {
        if self.completed {
            return self.clone();
        }
        Self {
            completed: true,
            completed_at: Some(at),
            ..self.clone()
        }
    }

    pub fn mark_pending(&self) -> Self {
        Self {
            completed: false,
            completed_at: None,
            ..self.clone()
        }
    }

    /// Whole-record edit of the client-owned fields. Identity, creation
    /// time and completion state carry over unchanged.
    pub fn revised(
        &self,
        title: &str,
        description: Option<&str>,
        priority: Priority,
    ) -> Result<Self> {
        Ok(Self {
            title: normalize_title(title)?,
            description: normalize_description(description),
            priority,
            ..self.clone()
        })
    }

    /// Field-wise equality of everything a view renders.
    pub fn content_eq(&self, other: &TaskRecord) -> bool {
        self.title == other.title
            && self.completed == other.completed
            && self.priority == other.priority
            && self.description == other.description
            && self.completed_at == other.completed_at
    }

    pub fn check_invariant(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation(format!(
                "task {} has an empty title",
                self.id
            )));
        }
        if self.completed != self.completed_at.is_some() {
            return Err(Error::Validation(format!(
                "task {}: completed is {} but completed_at is {}",
                self.id,
                self.completed,
                if self.completed_at.is_some() { "set" } else { "absent" }
            )));
        }
        Ok(())
    }
}

/// Dashboard counters over a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Counters {
    pub pending: usize,
    pub completed: usize,
}

impl Counters {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        records.into_iter().fold(Self::default(), |mut acc, task| {
            if task.completed {
                acc.completed += 1;
            } else {
                acc.pending += 1;
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.pending + self.completed
    }
}

fn normalize_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("title cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> TaskRecord {
        TaskDraft::new("Write report")
            .validated()
            .unwrap()
            .into_record(TaskId::new(1), Utc::now())
    }

    #[test]
    fn draft_trims_and_rejects_blank_titles() {
        let draft = TaskDraft::new("  Buy milk ")
            .description("   ")
            .validated()
            .unwrap();
        assert_eq!(draft.title, "Buy milk");
        assert!(draft.description.is_none());
        assert_eq!(draft.priority, Priority::Medium);

        assert!(matches!(
            TaskDraft::new("   ").validated(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn priority_parsing() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" l ".parse::<Priority>().unwrap(), Priority::Low);
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn task_id_parsing() {
        assert_eq!("#12".parse::<TaskId>().unwrap(), TaskId::new(12));
        assert!("0".parse::<TaskId>().is_err());
        assert!("abc".parse::<TaskId>().is_err());
    }

    #[test]
    fn toggle_twice_restores_pending_state() {
        let task = record();
        let now = Utc::now();
        let done = task.toggled(now);
        assert!(done.completed);
        assert_eq!(done.completed_at, Some(now));
        done.check_invariant().unwrap();

        let back = done.toggled(now + Duration::seconds(5));
        assert!(!back.completed);
        assert!(back.completed_at.is_none());
        assert_eq!(back, task);
    }

    #[test]
    fn mark_completed_keeps_existing_instant() {
        let first = Utc::now();
        let done = record().mark_completed(first);
        let again = done.mark_completed(first + Duration::minutes(1));
        assert_eq!(again.completed_at, Some(first));
    }

    #[test]
    fn revised_preserves_lifecycle_fields() {
        let done = record().mark_completed(Utc::now());
        let edited = done
            .revised(" New title ", Some("details"), Priority::High)
            .unwrap();
        assert_eq!(edited.id, done.id);
        assert_eq!(edited.created_at, done.created_at);
        assert_eq!(edited.completed_at, done.completed_at);
        assert_eq!(edited.title, "New title");
        assert!(done.revised("", None, Priority::Low).is_err());
    }

    #[test]
    fn invariant_check_catches_mismatch() {
        let mut task = record();
        task.completed = true;
        assert!(task.check_invariant().is_err());
        task.completed_at = Some(Utc::now());
        assert!(task.check_invariant().is_ok());
    }

    #[test]
    fn content_eq_ignores_identity_only() {
        let task = record();
        let mut other = task.clone();
        other.id = TaskId::new(99);
        assert!(task.content_eq(&other));
        other.priority = Priority::Low;
        assert!(!task.content_eq(&other));
    }

    #[test]
    fn counters_tally() {
        let pending = record();
        let done = pending.mark_completed(Utc::now());
        let counters = Counters::tally([&pending, &pending, &done]);
        assert_eq!(counters, Counters { pending: 2, completed: 1 });
        assert_eq!(counters.total(), 3);
    }
}
