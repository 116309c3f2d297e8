//! Delayed-task queue for the launcher execution context.
//!
//! Everything the ranking, the binding manager and the launcher defer
//! (rebind passes, background eviction, delayed binding removal, metric
//! samples) is posted here and executed by the launcher, one task at a
//! time, in due order. The queue owns its own notion of "now"; it never
//! reads a clock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BindingTier, ConnectionId};

/// Work deferred onto the launcher queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum LauncherTask {
    /// Rebind the high-rank connections to refresh their recency.
    RebindHighRank,
    /// Drop every binding held by the binding manager (app backgrounded).
    ReleaseAllBindings,
    /// Delayed removal of a binding tier after an importance downgrade.
    RemoveBinding { id: ConnectionId, tier: BindingTier },
    SampleMetrics,
}

/// Deterministic delayed-task queue with coalescing and cancellation.
#[derive(Debug, Clone, Default)]
pub struct LauncherQueue {
    now_ms: u64,
    next_seq: u64,
    /// Keyed by `(due_ms, seq)` so equal due times run in post order.
    pending: BTreeMap<(u64, u64), LauncherTask>,
}

impl LauncherQueue {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms,
            ..Default::default()
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Move the queue clock forward. Time never goes backwards.
    pub fn advance_to(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    /// Post `task` to run `delay_ms` from now, unconditionally.
    pub fn post_delayed(&mut self, task: LauncherTask, delay_ms: u64) {
        let due = self.now_ms.saturating_add(delay_ms);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert((due, seq), task);
    }

    /// Post `task` unless an identical task is already pending.
    ///
    /// Returns `true` if the task was posted.
    pub fn post_coalesced(&mut self, task: LauncherTask, delay_ms: u64) -> bool {
        if self.is_pending(&task) {
            return false;
        }
        self.post_delayed(task, delay_ms);
        true
    }

    pub fn is_pending(&self, task: &LauncherTask) -> bool {
        self.pending.values().any(|t| t == task)
    }

    /// Remove every pending copy of `task`. Returns `true` if any was removed.
    pub fn cancel(&mut self, task: &LauncherTask) -> bool {
        self.cancel_where(|t| t == task) > 0
    }

    /// Remove every pending task matching `pred`, returning how many were removed.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&LauncherTask) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, task| !pred(task));
        before - self.pending.len()
    }

    /// Due time of the earliest pending task.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.pending.keys().next().map(|(due, _)| *due)
    }

    /// Pop the earliest task whose due time has been reached.
    pub fn pop_due(&mut self) -> Option<LauncherTask> {
        let (&(due, seq), _) = self.pending.iter().next()?;
        if due > self.now_ms {
            return None;
        }
        self.pending.remove(&(due, seq))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
