//! Live filtered views, one per subscriber context.
//!
//! Each context holds at most one subscription. A subscription owns exactly
//! one store watch and one worker thread; the worker recomputes the view on
//! every change, diffs it against what it delivered last and hands the
//! result to the context's callback.
//!
//! Deliveries pass through a per-context gate. `subscribe` and `unsubscribe`
//! advance the gate's generation and then wait for any callback already
//! running to return, so once either call returns no delivery from the
//! replaced subscription can reach the callback. A callback may call back
//! into the manager for its own context; the stale worker then stops at its
//! next check instead of being waited on.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::reconcile::{self, EditScript};
use crate::store::{StoreChange, TaskStore, WatchGuard};
use crate::task::{Counters, TaskRecord};
use crate::view::FilteredView;

/// Opaque subscriber identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ContextId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// What a subscriber receives on every change of its view.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub context: ContextId,
    pub view: FilteredView,
    pub revision: u64,
    pub tasks: Vec<TaskRecord>,
    /// Edits from the previously delivered `tasks` to these.
    pub script: EditScript,
    pub counters: Counters,
}

type Callback = Arc<dyn Fn(&Delivery) + Send + Sync + 'static>;

#[derive(Default)]
struct DeliveryGate {
    generation: AtomicU64,
    turn: Mutex<()>,
    delivering: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Run `deliver` unless `generation` has been superseded.
    fn deliver(&self, generation: u64, deliver: impl FnOnce()) -> bool {
        let _turn = self.turn.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(generation) {
            return false;
        }
        let _marker = DeliveringMarker::enter(self);
        deliver();
        true
    }

    /// Wait for an in-flight delivery to return. Called from inside that
    /// delivery it returns at once.
    fn settle(&self) {
        let current = thread::current().id();
        let delivering = *self
            .delivering
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if delivering == Some(current) {
            return;
        }
        drop(self.turn.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

struct DeliveringMarker<'a> {
    gate: &'a DeliveryGate,
}

impl<'a> DeliveringMarker<'a> {
    fn enter(gate: &'a DeliveryGate) -> Self {
        *gate.delivering.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(thread::current().id());
        Self { gate }
    }
}

impl Drop for DeliveringMarker<'_> {
    fn drop(&mut self) {
        *self
            .gate
            .delivering
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

struct ActiveWatch {
    generation: u64,
    view: FilteredView,
    _watch: WatchGuard,
}

struct ContextSlot {
    gate: Arc<DeliveryGate>,
    active: ActiveWatch,
}

/// Tracks the current view of every subscriber context.
pub struct SubscriptionManager {
    store: TaskStore,
    slots: Mutex<HashMap<ContextId, ContextSlot>>,
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("contexts", &self.contexts())
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new(store: TaskStore) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Make `view` the context's active view, replacing any previous one.
    ///
    /// The first delivery carries the view's current contents and follows
    /// shortly after this returns, on the subscription's worker thread.
    pub fn subscribe<F>(
        &self,
        context: impl Into<ContextId>,
        view: FilteredView,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        let context = context.into();
        let (gate, generation, changes, replaced) = {
            let mut slots = self.lock_slots();
            let previous = slots.remove(&context);
            let replaced = previous.as_ref().map(|slot| slot.active.view);
            // The previous watch is released before the new one registers.
            let gate = previous
                .map(|slot| slot.gate)
                .unwrap_or_else(|| Arc::new(DeliveryGate::default()));
            let generation = gate.advance();
            let (watch, changes) = self.store.watch();
            slots.insert(
                context.clone(),
                ContextSlot {
                    gate: Arc::clone(&gate),
                    active: ActiveWatch {
                        generation,
                        view,
                        _watch: watch,
                    },
                },
            );
            (gate, generation, changes, replaced)
        };

        if replaced.is_some() {
            gate.settle();
        }
        tracing::debug!(
            context = %context,
            view = %view,
            replaced = ?replaced.map(|old| old.name()),
            "subscribed"
        );

        let worker = Worker {
            context: context.clone(),
            view,
            generation,
            gate,
            store: self.store.clone(),
            changes,
            callback: Arc::new(callback),
        };
        let spawned = thread::Builder::new()
            .name(format!("taskflow-view-{context}"))
            .spawn(move || worker.run());
        if let Err(err) = spawned {
            let mut slots = self.lock_slots();
            if slots
                .get(&context)
                .is_some_and(|slot| slot.active.generation == generation)
            {
                if let Some(slot) = slots.remove(&context) {
                    slot.gate.advance();
                }
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Drop the context's subscription. Returns whether one existed; calling
    /// it again is a no-op.
    pub fn unsubscribe(&self, context: &ContextId) -> bool {
        let gate = {
            let mut slots = self.lock_slots();
            match slots.remove(context) {
                Some(slot) => {
                    slot.gate.advance();
                    drop(slot.active);
                    slot.gate
                }
                None => return false,
            }
        };
        gate.settle();
        tracing::debug!(context = %context, "unsubscribed");
        true
    }

    pub fn unsubscribe_all(&self) -> usize {
        let gates: Vec<Arc<DeliveryGate>> = {
            let mut slots = self.lock_slots();
            slots
                .drain()
                .map(|(_, slot)| {
                    slot.gate.advance();
                    slot.gate
                })
                .collect()
        };
        for gate in &gates {
            gate.settle();
        }
        gates.len()
    }

    pub fn active_view(&self, context: &ContextId) -> Option<FilteredView> {
        self.lock_slots().get(context).map(|slot| slot.active.view)
    }

    /// Live store watches held for `context`: 0 or 1.
    pub fn live_watches(&self, context: &ContextId) -> usize {
        usize::from(self.lock_slots().contains_key(context))
    }

    pub fn contexts(&self) -> Vec<ContextId> {
        let mut contexts: Vec<ContextId> = self.lock_slots().keys().cloned().collect();
        contexts.sort();
        contexts
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<ContextId, ContextSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

struct Worker {
    context: ContextId,
    view: FilteredView,
    generation: u64,
    gate: Arc<DeliveryGate>,
    store: TaskStore,
    changes: Receiver<StoreChange>,
    callback: Callback,
}

impl Worker {
    fn run(self) {
        let mut shown: Vec<TaskRecord> = Vec::new();
        let mut shown_counters: Option<Counters> = None;

        while self.gate.is_current(self.generation) {
            let snapshot = self.store.snapshot();
            let tasks = self.view.recompute(&snapshot.records);
            let counters = Counters::tally(&snapshot.records);
            let script = reconcile::diff(&shown, &tasks);

            if shown_counters != Some(counters) || !script.is_empty() {
                let delivery = Delivery {
                    context: self.context.clone(),
                    view: self.view,
                    revision: snapshot.revision,
                    tasks,
                    script,
                    counters,
                };
                let delivered = self
                    .gate
                    .deliver(self.generation, || (self.callback)(&delivery));
                if !delivered {
                    tracing::debug!(
                        context = %self.context,
                        view = %self.view,
                        revision = snapshot.revision,
                        "dropped stale delivery"
                    );
                    break;
                }
                tracing::debug!(
                    context = %self.context,
                    revision = snapshot.revision,
                    edits = delivery.script.len(),
                    "delivered"
                );
                shown = delivery.tasks;
                shown_counters = Some(counters);
            }

            if self.changes.recv().is_err() {
                break;
            }
            // Only the newest state matters.
            while self.changes.try_recv().is_ok() {}
        }
    }
}
