//! taskflow task command implementations.

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::{load_context, parse_priority, resolve_view};
use crate::error::{Error, Result};
use crate::journal::CompactReport;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::task::{Counters, TaskDraft, TaskId, TaskRecord};
use crate::toggle::CompletionToggle;
use crate::view::FilteredView;

pub struct AddOptions {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct ListOptions {
    pub filter: Option<String>,
    pub order: Option<String>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct ShowOptions {
    pub id: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct EditOptions {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub clear_desc: bool,
    pub priority: Option<String>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Toggle,
    Complete,
    Reopen,
}

pub struct TransitionOptions {
    pub id: String,
    pub transition: Transition,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct RmOptions {
    pub id: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct StatsOptions {
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct CompactOptions {
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct TaskListOutput {
    view: FilteredView,
    total: usize,
    counters: Counters,
    tasks: Vec<TaskRecord>,
}

#[derive(Serialize)]
struct StatsOutput {
    total: usize,
    pending: usize,
    completed: usize,
}

pub fn run_add(options: AddOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let mut draft = TaskDraft::new(options.title);
    if let Some(description) = options.description {
        draft = draft.description(description);
    }
    if let Some(priority) = parse_priority(options.priority.as_deref())? {
        draft = draft.priority(priority);
    }

    let id = ctx.store.create(draft)?;
    let task = ctx.store.get(id)?;

    let mut human = ctx.human("Task created");
    human.push_summary("ID", id.to_string());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Priority", task.priority.to_string());
    human.push_next_step(format!("taskflow done {id}"));

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "add",
        &task,
        Some(&human),
    )
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let view = resolve_view(
        options.filter.as_deref(),
        options.order.as_deref(),
        &ctx.config,
    )?;
    let snapshot = ctx.store.snapshot();
    let tasks = view.recompute(&snapshot.records);
    let counters = Counters::tally(&snapshot.records);

    let mut human = ctx.human(format!("Tasks ({view})"));
    human.push_summary("Shown", tasks.len().to_string());
    human.push_summary("Pending", counters.pending.to_string());
    human.push_summary("Completed", counters.completed.to_string());
    for task in &tasks {
        human.push_detail(task_line(task));
    }
    if snapshot.records.is_empty() {
        human.push_next_step("taskflow add \"<title>\"");
    }

    let output = TaskListOutput {
        view,
        total: tasks.len(),
        counters,
        tasks,
    };
    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "list",
        &output,
        Some(&human),
    )
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let id: TaskId = options.id.parse()?;
    let task = ctx.store.get(id)?;

    let mut human = ctx.human(format!("Task {id}"));
    push_task_summary(&mut human, &task);

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "show",
        &task,
        Some(&human),
    )
}

pub fn run_edit(options: EditOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let id: TaskId = options.id.parse()?;
    let priority = parse_priority(options.priority.as_deref())?;
    if options.title.is_none()
        && options.description.is_none()
        && !options.clear_desc
        && priority.is_none()
    {
        return Err(Error::InvalidArgument(
            "nothing to edit (pass --title, --desc, --clear-desc or --priority)".to_string(),
        ));
    }

    let current = ctx.store.get(id)?;
    let title = options.title.unwrap_or_else(|| current.title.clone());
    let description = if options.clear_desc {
        None
    } else {
        options.description.or_else(|| current.description.clone())
    };
    let priority = priority.unwrap_or(current.priority);

    let toggle = CompletionToggle::new(ctx.store.clone());
    let task = toggle.revise(id, &title, description.as_deref(), priority)?;

    let mut human = ctx.human(format!("Task {id} updated"));
    push_task_summary(&mut human, &task);

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "edit",
        &task,
        Some(&human),
    )
}

pub fn run_transition(options: TransitionOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let id: TaskId = options.id.parse()?;
    let toggle = CompletionToggle::new(ctx.store.clone());
    let (command, task) = match options.transition {
        Transition::Toggle => ("toggle", toggle.toggle(id)?),
        Transition::Complete => ("done", toggle.mark_completed(id)?),
        Transition::Reopen => ("reopen", toggle.mark_pending(id)?),
    };

    let state = if task.completed { "completed" } else { "pending" };
    let mut human = ctx.human(format!("Task {id} {state}"));
    human.push_summary("Title", task.title.clone());
    if let Some(at) = task.completed_at {
        human.push_summary("Completed at", at.to_rfc3339());
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        command,
        &task,
        Some(&human),
    )
}

pub fn run_rm(options: RmOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let id: TaskId = options.id.parse()?;
    let removed = ctx.store.delete(id)?;

    let mut human = ctx.human(format!("Task {id} deleted"));
    human.push_summary("Title", removed.title.clone());

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "rm",
        &removed,
        Some(&human),
    )
}

pub fn run_stats(options: StatsOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let counters = ctx.store.counters();
    let output = StatsOutput {
        total: counters.total(),
        pending: counters.pending,
        completed: counters.completed,
    };

    let mut human = ctx.human("Task stats");
    human.push_summary("Total", output.total.to_string());
    human.push_summary("Pending", output.pending.to_string());
    human.push_summary("Completed", output.completed.to_string());

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "stats",
        &output,
        Some(&human),
    )
}

pub fn run_compact(options: CompactOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let report: CompactReport = ctx.store.compact()?;

    let mut human = ctx.human("Journal compacted");
    human.push_summary("Journal", ctx.store.backend_description());
    human.push_summary("Entries before", report.before_entries.to_string());
    human.push_summary("Entries after", report.after_entries.to_string());

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "compact",
        &report,
        Some(&human),
    )
}

pub(crate) fn task_line(task: &TaskRecord) -> String {
    let mark = if task.completed { "x" } else { " " };
    format!("[{mark}] #{} [{}] {}", task.id, task.priority, task.title)
}

fn push_task_summary(human: &mut HumanOutput, task: &TaskRecord) {
    human.push_summary("Title", task.title.clone());
    if let Some(description) = task.description.as_ref() {
        human.push_summary("Description", description.clone());
    }
    human.push_summary("Priority", task.priority.to_string());
    human.push_summary(
        "Status",
        if task.completed { "completed" } else { "pending" },
    );
    human.push_summary("Created", task.created_at.to_rfc3339());
    if let Some(at) = task.completed_at {
        human.push_summary("Completed", at.to_rfc3339());
    }
}
