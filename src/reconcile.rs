//! Identity-keyed diff between two ordered task sequences.
//!
//! [`diff`] produces an [`EditScript`] that, applied in order to the old
//! sequence, yields the new one. The script is built in three phases:
//!
//! 1. in-place updates for surviving records whose content changed, at their
//!    old indices
//! 2. removals, from the highest old index down
//! 3. a single left-to-right pass over the new order that inserts new
//!    records and moves surviving ones
//!
//! Survivors on a longest increasing subsequence of their new positions stay
//! put, so the number of moves is the minimum for the given orders. Position
//! lookups scan the working sequence, which keeps the whole diff within
//! O(n·d) for d changes, plus O(n log n) for the subsequence.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::task::{TaskId, TaskRecord};

/// One step of an edit script. Indices refer to the sequence as it stands
/// when the step is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    Insert { index: usize, task: TaskRecord },
    Remove { index: usize, id: TaskId },
    /// Take the record out at `from`, then insert it at `to`.
    Move { from: usize, to: usize, id: TaskId },
    Update { index: usize, task: TaskRecord },
}

impl EditOp {
    pub fn id(&self) -> TaskId {
        match self {
            Self::Insert { task, .. } | Self::Update { task, .. } => task.id,
            Self::Remove { id, .. } | Self::Move { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScriptSummary {
    pub inserts: usize,
    pub removes: usize,
    pub moves: usize,
    pub updates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EditScript {
    ops: Vec<EditOp>,
}

impl EditScript {
    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn summary(&self) -> ScriptSummary {
        self.ops.iter().fold(ScriptSummary::default(), |mut acc, op| {
            match op {
                EditOp::Insert { .. } => acc.inserts += 1,
                EditOp::Remove { .. } => acc.removes += 1,
                EditOp::Move { .. } => acc.moves += 1,
                EditOp::Update { .. } => acc.updates += 1,
            }
            acc
        })
    }

    /// Apply every step to `target`. Fails without touching `target` further
    /// once a step's index is out of range for the sequence it was given.
    pub fn apply_to(&self, target: &mut Vec<TaskRecord>) -> Result<()> {
        for (step, op) in self.ops.iter().enumerate() {
            let len = target.len();
            let out_of_range = |index: usize| {
                Error::InvalidArgument(format!(
                    "edit step {step} index {index} out of range for {len} records"
                ))
            };
            match op {
                EditOp::Insert { index, task } => {
                    if *index > len {
                        return Err(out_of_range(*index));
                    }
                    target.insert(*index, task.clone());
                }
                EditOp::Remove { index, .. } => {
                    if *index >= len {
                        return Err(out_of_range(*index));
                    }
                    target.remove(*index);
                }
                EditOp::Move { from, to, .. } => {
                    if *from >= len || *to >= len {
                        return Err(out_of_range((*from).max(*to)));
                    }
                    let task = target.remove(*from);
                    target.insert(*to, task);
                }
                EditOp::Update { index, task } => {
                    let slot = target.get_mut(*index).ok_or_else(|| out_of_range(*index))?;
                    *slot = task.clone();
                }
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a EditScript {
    type Item = &'a EditOp;
    type IntoIter = std::slice::Iter<'a, EditOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

/// Compute the edit script turning `old` into `new`.
///
/// Both sequences are expected to hold each id at most once.
pub fn diff(old: &[TaskRecord], new: &[TaskRecord]) -> EditScript {
    let new_pos: HashMap<TaskId, usize> = new
        .iter()
        .enumerate()
        .map(|(index, task)| (task.id, index))
        .collect();
    let mut ops = Vec::new();

    for (index, task) in old.iter().enumerate() {
        if let Some(&target) = new_pos.get(&task.id) {
            if !task.content_eq(&new[target]) {
                ops.push(EditOp::Update {
                    index,
                    task: new[target].clone(),
                });
            }
        }
    }

    for (index, task) in old.iter().enumerate().rev() {
        if !new_pos.contains_key(&task.id) {
            ops.push(EditOp::Remove { index, id: task.id });
        }
    }

    let mut working: Vec<TaskId> = old
        .iter()
        .map(|task| task.id)
        .filter(|id| new_pos.contains_key(id))
        .collect();
    let targets: Vec<usize> = working.iter().map(|id| new_pos[id]).collect();
    let anchors: HashSet<TaskId> = longest_increasing_run(&targets)
        .into_iter()
        .map(|index| working[index])
        .collect();
    let survivors: HashSet<TaskId> = working.iter().copied().collect();

    for (index, task) in new.iter().enumerate() {
        if anchors.contains(&task.id) {
            continue;
        }
        let after = match index.checked_sub(1) {
            Some(prev) => position(&working, new[prev].id).map(|at| at + 1),
            None => Some(0),
        };
        let Some(slot) = after else {
            continue;
        };

        if survivors.contains(&task.id) {
            let Some(from) = position(&working, task.id) else {
                continue;
            };
            if from == slot {
                continue;
            }
            // Removing first shifts the slot left when it lies past `from`.
            let to = if from < slot { slot - 1 } else { slot };
            let id = working.remove(from);
            working.insert(to, id);
            ops.push(EditOp::Move { from, to, id });
        } else {
            working.insert(slot, task.id);
            ops.push(EditOp::Insert {
                index: slot,
                task: task.clone(),
            });
        }
    }

    EditScript { ops }
}

fn position(working: &[TaskId], id: TaskId) -> Option<usize> {
    working.iter().position(|candidate| *candidate == id)
}

/// Indices into `values` of one longest strictly increasing subsequence.
fn longest_increasing_run(values: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];

    for (index, &value) in values.iter().enumerate() {
        let length = tails.partition_point(|&tail| values[tail] < value);
        if length > 0 {
            previous[index] = Some(tails[length - 1]);
        }
        if length == tails.len() {
            tails.push(index);
        } else {
            tails[length] = index;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(index) = cursor {
        run.push(index);
        cursor = previous[index];
    }
    run.reverse();
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, TaskDraft};
    use chrono::{TimeZone, Utc};

    fn task(id: u64, title: &str) -> TaskRecord {
        TaskDraft::new(title).into_record(
            TaskId::new(id),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn seq(ids: &[u64]) -> Vec<TaskRecord> {
        ids.iter().map(|id| task(*id, &format!("t{id}"))).collect()
    }

    fn assert_reproduces(old: &[TaskRecord], new: &[TaskRecord]) -> EditScript {
        let script = diff(old, new);
        let mut applied = old.to_vec();
        script.apply_to(&mut applied).unwrap();
        assert_eq!(applied, new, "script {script:?}");
        script
    }

    #[test]
    fn update_remove_insert_scenario() {
        let old = vec![task(1, "A"), task(2, "B")];
        let new = vec![
            task(2, "B").mark_completed(Utc::now()),
            task(3, "C"),
        ];
        let script = assert_reproduces(&old, &new);
        assert_eq!(
            script.ops(),
            &[
                EditOp::Update {
                    index: 1,
                    task: new[0].clone()
                },
                EditOp::Remove {
                    index: 0,
                    id: TaskId::new(1)
                },
                EditOp::Insert {
                    index: 1,
                    task: new[1].clone()
                },
            ]
        );
    }

    #[test]
    fn empty_to_full_is_all_inserts() {
        let new = seq(&[4, 2, 9]);
        let script = assert_reproduces(&[], &new);
        assert_eq!(
            script.summary(),
            ScriptSummary {
                inserts: 3,
                ..ScriptSummary::default()
            }
        );
    }

    #[test]
    fn full_to_empty_is_all_removes() {
        let old = seq(&[1, 2, 3]);
        let script = assert_reproduces(&old, &[]);
        let indices: Vec<usize> = script
            .ops()
            .iter()
            .map(|op| match op {
                EditOp::Remove { index, .. } => *index,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(indices, vec![2, 1, 0]);
    }

    #[test]
    fn identical_sequences_need_no_edits() {
        let old = seq(&[1, 2, 3]);
        assert!(diff(&old, &old.clone()).is_empty());
    }

    #[test]
    fn rotation_is_a_single_move() {
        let old = seq(&[1, 2, 3, 4]);
        let new = seq(&[2, 3, 4, 1]);
        let script = assert_reproduces(&old, &new);
        assert_eq!(script.summary().moves, 1);
        assert_eq!(script.len(), 1);

        let back = assert_reproduces(&new, &old);
        assert_eq!(back.summary().moves, 1);
    }

    #[test]
    fn reversal_moves_all_but_one() {
        let old = seq(&[1, 2, 3, 4, 5]);
        let new = seq(&[5, 4, 3, 2, 1]);
        let script = assert_reproduces(&old, &new);
        assert_eq!(script.summary().moves, 4);
    }

    #[test]
    fn same_id_with_new_content_is_update_not_replace() {
        let old = seq(&[1, 2]);
        let mut new = old.clone();
        new[1] = new[1]
            .revised("renamed", Some("now with notes"), Priority::High)
            .unwrap();
        let script = assert_reproduces(&old, &new);
        assert_eq!(script.summary(), ScriptSummary { updates: 1, ..Default::default() });
    }

    #[test]
    fn moved_and_changed_record_is_update_plus_move() {
        let old = seq(&[1, 2, 3]);
        let mut new = seq(&[3, 1, 2]);
        new[0] = new[0].mark_completed(Utc::now());
        let script = assert_reproduces(&old, &new);
        assert_eq!(
            script.summary(),
            ScriptSummary {
                moves: 1,
                updates: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn apply_rejects_out_of_range_steps() {
        let script = diff(&seq(&[1, 2, 3]), &seq(&[3]));
        let mut too_short = seq(&[1]);
        assert!(script.apply_to(&mut too_short).is_err());
    }

    #[test]
    fn longest_run_picks_a_maximal_subsequence() {
        let values = [3, 0, 4, 1, 2, 5];
        let run = longest_increasing_run(&values);
        let picked: Vec<usize> = run.iter().map(|i| values[*i]).collect();
        assert_eq!(picked, vec![0, 1, 2, 5]);
        assert!(longest_increasing_run(&[]).is_empty());
    }
}
