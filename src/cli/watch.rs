//! taskflow watch: print every change to a live view.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::time::Duration;

use crate::cli::task::task_line;
use crate::cli::{load_context, resolve_view};
use crate::error::Result;
use crate::follow::Follower;
use crate::output::emit_line;
use crate::reconcile::EditOp;
use crate::subscription::{ContextId, Delivery, SubscriptionManager};

pub struct WatchOptions {
    pub filter: Option<String>,
    pub order: Option<String>,
    pub limit: Option<u64>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub fn run(options: WatchOptions) -> Result<()> {
    let ctx = load_context(options.dir)?;
    let view = resolve_view(
        options.filter.as_deref(),
        options.order.as_deref(),
        &ctx.config,
    )?;

    if !options.quiet {
        for warning in &ctx.warnings {
            eprintln!("warning: {warning}");
        }
    }

    let _follower = Follower::spawn(
        ctx.store.clone(),
        ctx.dir.clone(),
        Duration::from_millis(ctx.config.watch.debounce_ms),
    )?;
    let manager = SubscriptionManager::new(ctx.store);
    let context = ContextId::generate();

    let (tx, rx) = mpsc::channel::<Delivery>();
    let tx: Mutex<Sender<Delivery>> = Mutex::new(tx);
    manager.subscribe(context.clone(), view, move |delivery| {
        let sender = tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = sender.send(delivery.clone());
    })?;

    let mut delivered = 0u64;
    while let Ok(delivery) = rx.recv() {
        if options.json {
            emit_line("watch", &delivery)?;
        } else if !options.quiet {
            println!("{}", format_delivery(&delivery));
        }
        delivered += 1;
        if options.limit.is_some_and(|limit| delivered >= limit) {
            break;
        }
    }

    manager.unsubscribe(&context);
    Ok(())
}

fn format_delivery(delivery: &Delivery) -> String {
    let mut lines = vec![format!(
        "rev {} {}: {} shown, {} pending, {} completed",
        delivery.revision,
        delivery.view,
        delivery.tasks.len(),
        delivery.counters.pending,
        delivery.counters.completed
    )];
    for op in &delivery.script {
        lines.push(match op {
            EditOp::Insert { index, task } => format!("  + {index} {}", task_line(task)),
            EditOp::Remove { index, id } => format!("  - {index} #{id}"),
            EditOp::Move { from, to, id } => format!("  > {from}->{to} #{id}"),
            EditOp::Update { index, task } => format!("  ~ {index} {}", task_line(task)),
        });
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::diff;
    use crate::task::{Counters, TaskDraft, TaskId};
    use crate::view::FilteredView;
    use chrono::Utc;

    #[test]
    fn delivery_lines_describe_each_edit() {
        let task = TaskDraft::new("Plan trip").into_record(TaskId::new(1), Utc::now());
        let tasks = vec![task];
        let delivery = Delivery {
            context: ContextId::new("cli"),
            view: FilteredView::default(),
            revision: 1,
            script: diff(&[], &tasks),
            tasks,
            counters: Counters {
                pending: 1,
                completed: 0,
            },
        };
        assert_eq!(
            format_delivery(&delivery),
            "rev 1 all/created_desc: 1 shown, 1 pending, 0 completed\n  + 0 [ ] #1 [medium] Plan trip"
        );
    }
}
