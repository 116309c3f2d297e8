//! Total order over live child-process connections, most important first.
//!
//! The order decides which process the OS should kill last. On top of the
//! order the ranking optionally maintains a *low-rank group*: the
//! contiguous tail of the order is placed into one OS binding group with a
//! per-connection importance value, so the OS can sort those processes
//! without a full service rebind for each of them.
//!
//! ## Tiers (most important first)
//!
//! 1. visible main frame, or `Important`
//! 2. visible subframe intersecting the viewport, or `Moderate`
//! 3. any other visible connection
//! 4. `Perceptible`
//! 5. everything else (not ordered by frame depth: a crashed background
//!    frame is reloaded when it becomes visible again)
//!
//! Inside tiers 1-4 viewport intersection wins, then lower frame depth.
//! With the spare-renderer lowest-ranking policy, spares sort after
//! non-spares of their tier, and spares outside the viewport drop to tier 5.
//!
//! ## Group importance space
//!
//! Low-rank members get values in `[0, i32::MAX)` that strictly increase
//! from the tail towards the high-rank boundary. New positions are carved
//! out of the gap between neighbours; when no gap is left the whole group
//! is renumbered in steps of [`FROM_RIGHT`].

use std::cmp::Ordering;

use crate::backend::BindingBackend;
use crate::queue::{LauncherQueue, LauncherTask};
use crate::rebind::{RebindCandidates, RebindPolicy, RebindTrigger};
use crate::types::{BindingGroup, BindingState, ConnectionId, HostState, Importance, RankSignals};

// ─── Constants ───────────────────────────────────────────────────────

/// Spacing unit of the group importance space. A large gap is split at
/// `right - FROM_RIGHT` instead of the middle, since promoting a connection
/// to the top of the group (tab switches) is by far the common update.
pub const FROM_RIGHT: i32 = 32_768;

/// Most low-rank members a reshuffle can give distinct group importances.
/// Fixed-size rankings are bounded by it.
pub const MAX_FIXED_CONNECTIONS: usize = (i32::MAX / FROM_RIGHT) as usize;

/// Debounce delay for rebind passes over the high-rank connections.
pub const REBIND_DELAY_MS: u64 = 1_000;

// ─── Comparator ──────────────────────────────────────────────────────

fn tier(s: &RankSignals, spare_lowest: bool) -> u8 {
    if spare_lowest && s.is_spare_renderer && !s.in_viewport_visible() {
        return 5;
    }
    if (s.visible && s.frame_depth == 0) || s.importance == Importance::Important {
        1
    } else if (s.visible && s.frame_depth > 0 && s.intersects_viewport)
        || s.importance == Importance::Moderate
    {
        2
    } else if s.visible {
        3
    } else if s.importance == Importance::Perceptible {
        4
    } else {
        5
    }
}

/// Compare two connections by rank. `Less` means `a` is more important.
pub fn compare_rank(a: &RankSignals, b: &RankSignals, spare_renderer_lowest: bool) -> Ordering {
    let (ta, tb) = (
        tier(a, spare_renderer_lowest),
        tier(b, spare_renderer_lowest),
    );
    if ta != tb {
        return ta.cmp(&tb);
    }
    if spare_renderer_lowest && a.is_spare_renderer != b.is_spare_renderer {
        return if a.is_spare_renderer {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if ta == 5 {
        return Ordering::Equal;
    }
    b.intersects_viewport
        .cmp(&a.intersects_viewport)
        .then(a.frame_depth.cmp(&b.frame_depth))
}

/// Whether a connection belongs in the low-rank binding group.
pub fn should_be_in_low_rank_group(s: &RankSignals, spare_renderer_lowest: bool) -> bool {
    !s.in_viewport_visible()
        && ((spare_renderer_lowest && s.is_spare_renderer)
            || s.importance <= Importance::Perceptible)
}

// ─── Iteration Contract ──────────────────────────────────────────────

/// Something that can list connections from least to most important.
///
/// The binding manager evicts in this order. Borrowing the order for the
/// duration of the iteration statically rules out mutation mid-iteration.
pub trait RankedOrder {
    fn lowest_first(&self) -> impl Iterator<Item = ConnectionId> + '_;
}

/// A slice ordered most important first.
impl RankedOrder for [ConnectionId] {
    fn lowest_first(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.iter().rev().copied()
    }
}

// ─── Ranking ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RankedConnection {
    id: ConnectionId,
    signals: RankSignals,
}

/// Ordered list of connections plus low-rank group bookkeeping.
#[derive(Debug)]
pub struct ChildProcessRanking {
    /// Most important first.
    rankings: Vec<RankedConnection>,
    /// `None` means the list grows without bound.
    max_size: Option<usize>,
    spare_renderer_lowest: bool,
    service_group_importance: bool,
    rebind_policy: Box<dyn RebindPolicy>,
    rebind_delay_ms: u64,
    host: HostState,
}

impl ChildProcessRanking {
    pub fn new(max_size: Option<usize>, rebind_policy: Box<dyn RebindPolicy>) -> Self {
        assert!(
            max_size != Some(0),
            "fixed-size ranking needs a positive capacity"
        );
        assert!(
            max_size.is_none_or(|n| n <= MAX_FIXED_CONNECTIONS),
            "fixed-size ranking capacity exceeds {MAX_FIXED_CONNECTIONS}"
        );
        Self {
            rankings: Vec::new(),
            max_size,
            spare_renderer_lowest: false,
            service_group_importance: false,
            rebind_policy,
            rebind_delay_ms: REBIND_DELAY_MS,
            host: HostState::default(),
        }
    }

    #[must_use]
    pub fn with_spare_renderer_lowest_ranking(mut self, enabled: bool) -> Self {
        self.spare_renderer_lowest = enabled;
        self
    }

    #[must_use]
    pub fn with_rebind_delay_ms(mut self, delay_ms: u64) -> Self {
        self.rebind_delay_ms = delay_ms;
        self
    }

    pub fn rebind_policy_name(&self) -> &'static str {
        self.rebind_policy.name()
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.rankings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rankings.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn signals(&self, id: ConnectionId) -> Option<&RankSignals> {
        self.index_of(id).map(|i| &self.rankings[i].signals)
    }

    /// The least important connection, if any.
    pub fn lowest_ranked(&self) -> Option<ConnectionId> {
        self.rankings.last().map(|c| c.id)
    }

    /// Connections most important first, with their signals.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &RankSignals)> + '_ {
        self.rankings.iter().map(|c| (c.id, &c.signals))
    }

    pub fn is_low_rank(&self, id: ConnectionId) -> bool {
        self.signals(id)
            .is_some_and(|s| should_be_in_low_rank_group(s, self.spare_renderer_lowest))
    }

    /// Index of the first low-rank connection (`len()` if there is none).
    pub fn low_rank_boundary(&self) -> usize {
        self.rankings
            .partition_point(|c| !should_be_in_low_rank_group(&c.signals, self.spare_renderer_lowest))
    }

    pub fn service_group_importance_enabled(&self) -> bool {
        self.service_group_importance
    }

    pub fn host_state(&self) -> HostState {
        self.host
    }

    // ── Mutation ─────────────────────────────────────────────────

    /// Start placing low-rank connections into the shared binding group.
    ///
    /// Can only be turned on once; it stays on for the life of the ranking.
    pub fn enable_service_group_importance(
        &mut self,
        backend: &mut impl BindingBackend,
        queue: &mut LauncherQueue,
    ) {
        assert!(
            !self.service_group_importance,
            "service group importance is already enabled"
        );
        self.service_group_importance = true;
        if let Some(last) = self.reshuffle_group_importance(backend) {
            backend.rebind(last);
            self.request_rebind(RebindTrigger::GroupChanged, queue);
        }
    }

    /// Insert a new connection at its ranked position.
    ///
    /// Panics if the connection is already ranked or a fixed-size ranking
    /// is full.
    pub fn add_connection(
        &mut self,
        backend: &mut impl BindingBackend,
        queue: &mut LauncherQueue,
        id: ConnectionId,
        signals: RankSignals,
    ) {
        assert!(!self.contains(id), "{id} is already ranked");
        if let Some(max) = self.max_size {
            assert!(self.rankings.len() < max, "ranking is full ({max} connections)");
        }
        self.rankings.push(RankedConnection { id, signals });
        self.reposition(backend, queue, self.rankings.len() - 1);
    }

    /// Replace a ranked connection's signals and move it to its new position.
    ///
    /// Panics if the connection is not ranked.
    pub fn update_connection(
        &mut self,
        backend: &mut impl BindingBackend,
        queue: &mut LauncherQueue,
        id: ConnectionId,
        signals: RankSignals,
    ) {
        let index = self.expect_index(id);
        self.rankings[index].signals = signals;
        self.reposition(backend, queue, index);
    }

    /// Drop a connection from the ranking.
    ///
    /// Panics if the connection is not ranked.
    pub fn remove_connection(
        &mut self,
        backend: &impl BindingBackend,
        queue: &mut LauncherQueue,
        id: ConnectionId,
    ) {
        let index = self.expect_index(id);
        let was_grouped =
            self.service_group_importance && backend.group(id) == BindingGroup::LowRank;
        self.rankings.remove(index);
        // Unbinding a grouped process can move unrelated processes in the
        // OS recency list.
        if was_grouped {
            self.request_rebind(RebindTrigger::LowRankRemoved, queue);
        }
    }

    /// Record the embedding application's foreground / focus state.
    pub fn set_host_state(&mut self, host: HostState, queue: &mut LauncherQueue) {
        if self.host == host {
            return;
        }
        self.host = host;
        self.request_rebind(RebindTrigger::HostChanged, queue);
    }

    /// Run a rebind pass over the high-rank connections.
    ///
    /// Returns the connections that were rebound, in issue order.
    pub fn rebind_high_rank_connections(
        &mut self,
        backend: &mut impl BindingBackend,
    ) -> Vec<ConnectionId> {
        let boundary = self.low_rank_boundary();
        // Issue the top of the ranking last so it ends up the most recent.
        let high_rank: Vec<(ConnectionId, BindingState)> = self.rankings[..boundary]
            .iter()
            .rev()
            .map(|c| (c.id, backend.binding_state(c.id)))
            .collect();
        let strongest_low_rank = self.rankings[boundary..]
            .iter()
            .map(|c| backend.binding_state(c.id))
            .max();
        let targets = self.rebind_policy.select(&RebindCandidates {
            high_rank: &high_rank,
            strongest_low_rank,
            host: self.host,
        });
        for id in &targets {
            backend.rebind(*id);
        }
        tracing::debug!(
            policy = self.rebind_policy.name(),
            high_rank = high_rank.len(),
            rebound = targets.len(),
            "rebind pass"
        );
        targets
    }

    // ── Internals ────────────────────────────────────────────────

    fn index_of(&self, id: ConnectionId) -> Option<usize> {
        self.rankings.iter().position(|c| c.id == id)
    }

    fn expect_index(&self, id: ConnectionId) -> usize {
        match self.index_of(id) {
            Some(index) => index,
            None => panic!("{id} is not ranked"),
        }
    }

    fn low_rank_at(&self, index: usize) -> bool {
        should_be_in_low_rank_group(&self.rankings[index].signals, self.spare_renderer_lowest)
    }

    fn request_rebind(&self, trigger: RebindTrigger, queue: &mut LauncherQueue) {
        if !self.service_group_importance || !self.rebind_policy.should_schedule(trigger) {
            return;
        }
        if queue.post_coalesced(LauncherTask::RebindHighRank, self.rebind_delay_ms) {
            tracing::debug!(?trigger, "rebind pass scheduled");
        }
    }

    fn reposition(
        &mut self,
        backend: &mut impl BindingBackend,
        queue: &mut LauncherQueue,
        index: usize,
    ) {
        let entry = self.rankings.remove(index);
        let spare_lowest = self.spare_renderer_lowest;
        // Placed ahead of equally ranked connections: the latest update wins ties.
        let new_index = self.rankings.partition_point(|c| {
            compare_rank(&c.signals, &entry.signals, spare_lowest) == Ordering::Less
        });
        let id = entry.id;
        self.rankings.insert(new_index, entry);

        if !self.service_group_importance {
            self.debug_check(backend);
            return;
        }

        if !self.low_rank_at(new_index) {
            if backend.group(id) != BindingGroup::None
                && backend.set_group(id, BindingGroup::None, 0)
            {
                backend.rebind(id);
                self.request_rebind(RebindTrigger::GroupChanged, queue);
            }
            self.debug_check(backend);
            return;
        }

        let left = if new_index + 1 == self.rankings.len() {
            0
        } else {
            backend.importance_in_group(self.rankings[new_index + 1].id)
        };
        let right = if new_index == 0 || !self.low_rank_at(new_index - 1) {
            i32::MAX
        } else {
            backend.importance_in_group(self.rankings[new_index - 1].id)
        };

        let current = backend.importance_in_group(id);
        if backend.group(id) == BindingGroup::LowRank && left < current && current < right {
            self.debug_check(backend);
            return;
        }

        let gap = i64::from(right) - i64::from(left);
        let changed = if gap > 2 * i64::from(FROM_RIGHT) {
            backend
                .set_group(id, BindingGroup::LowRank, right - FROM_RIGHT)
                .then_some(id)
        } else if gap > 2 {
            // gap / 2 < right - left, so the sum fits.
            let mid = left + (gap / 2) as i32;
            backend.set_group(id, BindingGroup::LowRank, mid).then_some(id)
        } else {
            self.reshuffle_group_importance(backend)
        };

        if let Some(last) = changed {
            backend.rebind(last);
            self.request_rebind(RebindTrigger::GroupChanged, queue);
        }
        self.debug_check(backend);
    }

    /// Renumber every low-rank connection from the top down.
    ///
    /// Returns the last connection whose group binding changed. A single
    /// rebind of it applies all pending group changes at once.
    fn reshuffle_group_importance(
        &mut self,
        backend: &mut impl BindingBackend,
    ) -> Option<ConnectionId> {
        let mut importance = i32::MAX - FROM_RIGHT;
        let mut last_changed = None;
        let mut members = 0usize;
        for c in &self.rankings {
            if !should_be_in_low_rank_group(&c.signals, self.spare_renderer_lowest) {
                continue;
            }
            if backend.set_group(c.id, BindingGroup::LowRank, importance) {
                last_changed = Some(c.id);
            }
            importance = importance.saturating_sub(FROM_RIGHT);
            members += 1;
        }
        tracing::debug!(members, "reshuffled group importance");
        last_changed
    }

    fn debug_check(&self, backend: &impl BindingBackend) {
        if cfg!(debug_assertions) {
            self.check_invariants(backend);
        }
    }

    /// Assert the order, the low-rank partition and the group values.
    pub fn check_invariants(&self, backend: &impl BindingBackend) {
        let spare_lowest = self.spare_renderer_lowest;
        for pair in self.rankings.windows(2) {
            assert_ne!(
                compare_rank(&pair[0].signals, &pair[1].signals, spare_lowest),
                Ordering::Greater,
                "{} ranked above {} out of order",
                pair[0].id,
                pair[1].id
            );
        }

        for pair in self.rankings.windows(2) {
            assert!(
                !should_be_in_low_rank_group(&pair[0].signals, spare_lowest)
                    || should_be_in_low_rank_group(&pair[1].signals, spare_lowest),
                "low-rank {} ranked above high-rank {}",
                pair[0].id,
                pair[1].id
            );
        }

        let boundary = self.low_rank_boundary();

        if self.service_group_importance {
            for pair in self.rankings[boundary..].windows(2) {
                let (upper, lower) = (
                    backend.importance_in_group(pair[0].id),
                    backend.importance_in_group(pair[1].id),
                );
                assert!(
                    upper > lower,
                    "group importance not decreasing: {}={upper} above {}={lower}",
                    pair[0].id,
                    pair[1].id
                );
            }
        }
    }
}

impl RankedOrder for ChildProcessRanking {
    fn lowest_first(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.rankings.iter().rev().map(|c| c.id)
    }
}
