//! Rebind strategies that keep high-rank connections recent in the OS's
//! recency-ordered kill list while low-rank group reassignments churn it.
//!
//! Two strategies exist, selected once when the ranking is built:
//!
//! - [`LegacyRebindAll`]: any group reassignment schedules a pass that
//!   rebinds every high-rank connection.
//! - [`StrictConflictRebind`]: passes are also scheduled on low-rank
//!   removal and host focus/foreground changes, but only rebind high-rank
//!   connections whose binding is no stronger than the strongest low-rank
//!   binding, unless the host is backgrounded or unfocused, in which case
//!   every high-rank connection is rebound.

use crate::types::{BindingState, ConnectionId, HostState};

/// Event that may call for a rebind pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebindTrigger {
    /// A low-rank group assignment changed a binding.
    GroupChanged,
    /// A connection holding a low-rank group slot was removed.
    LowRankRemoved,
    /// Host foreground or focus state changed.
    HostChanged,
}

/// Inputs to a rebind pass.
#[derive(Debug, Clone, Copy)]
pub struct RebindCandidates<'a> {
    /// High-rank connections with their current binding state, lowest first.
    pub high_rank: &'a [(ConnectionId, BindingState)],
    /// Strongest binding state held by any low-rank connection.
    pub strongest_low_rank: Option<BindingState>,
    pub host: HostState,
}

/// Strategy deciding when to schedule rebind passes and whom to rebind.
pub trait RebindPolicy: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn should_schedule(&self, trigger: RebindTrigger) -> bool;

    /// Connections to rebind, in the order the rebinds must be issued.
    fn select(&self, candidates: &RebindCandidates<'_>) -> Vec<ConnectionId>;
}

/// Build the strategy for the `strict_high_rank_lru` flag.
pub fn policy_for(strict_high_rank_lru: bool) -> Box<dyn RebindPolicy> {
    if strict_high_rank_lru {
        Box::new(StrictConflictRebind)
    } else {
        Box::new(LegacyRebindAll)
    }
}

// ─── Legacy ──────────────────────────────────────────────────────────

// TODO: remove once the strict strategy is the default everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyRebindAll;

impl RebindPolicy for LegacyRebindAll {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn should_schedule(&self, trigger: RebindTrigger) -> bool {
        trigger == RebindTrigger::GroupChanged
    }

    fn select(&self, candidates: &RebindCandidates<'_>) -> Vec<ConnectionId> {
        candidates.high_rank.iter().map(|(id, _)| *id).collect()
    }
}

// ─── Strict ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct StrictConflictRebind;

impl RebindPolicy for StrictConflictRebind {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn should_schedule(&self, _trigger: RebindTrigger) -> bool {
        true
    }

    fn select(&self, candidates: &RebindCandidates<'_>) -> Vec<ConnectionId> {
        // Priority capping flattens binding strengths, so nothing separates
        // the tiers except recency.
        if candidates.host.priority_capped() {
            return candidates.high_rank.iter().map(|(id, _)| *id).collect();
        }
        let Some(strongest_low) = candidates.strongest_low_rank else {
            return Vec::new();
        };
        candidates
            .high_rank
            .iter()
            .filter(|(_, state)| *state <= strongest_low)
            .map(|(id, _)| *id)
            .collect()
    }
}
