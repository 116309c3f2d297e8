//! Bounded working set of connections holding an extra not-perceptible
//! binding.
//!
//! The manager never judges importance itself: eviction and the waived
//! slot both follow the ranking's lowest-first order, which makes it a
//! bounded cache over that order.
//!
//! Per tracked connection there are two conditions:
//!
//! - *bound*: holds the extra binding
//! - *waived*: the single lowest-ranked tracked connection, left without
//!   the extra binding so it stays the first kill candidate

use std::collections::HashSet;
use std::fmt;

use crate::backend::BindingBackend;
use crate::queue::{LauncherQueue, LauncherTask};
use crate::ranking::RankedOrder;
use crate::types::{BindingTier, ConnectionId, TrimLevel};

/// Delay before a backgrounded app drops every managed binding.
pub const BACKGROUND_RELEASE_DELAY_MS: u64 = 10_000;

/// Invoked with the first connection whose binding changed as a side
/// effect of a ranking change.
pub type ImplicitChangeCallback = Box<dyn FnMut(ConnectionId) + Send>;

const EXTRA_BINDING: BindingTier = BindingTier::NotPerceptible;

pub struct BindingManager {
    /// `None` means uncapped.
    max_size: Option<usize>,
    connections: HashSet<ConnectionId>,
    waived: Option<ConnectionId>,
    release_delay_ms: u64,
    on_implicit_change: Option<ImplicitChangeCallback>,
}

impl fmt::Debug for BindingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingManager")
            .field("max_size", &self.max_size)
            .field("connections", &self.connections)
            .field("waived", &self.waived)
            .field("release_delay_ms", &self.release_delay_ms)
            .finish_non_exhaustive()
    }
}

impl BindingManager {
    /// Create a manager tracking at most `max_size` connections.
    ///
    /// Panics on `Some(0)`: a capped manager needs room for one connection.
    pub fn new(max_size: Option<usize>) -> Self {
        assert!(
            max_size != Some(0),
            "binding manager cap must be positive"
        );
        Self {
            max_size,
            connections: HashSet::new(),
            waived: None,
            release_delay_ms: BACKGROUND_RELEASE_DELAY_MS,
            on_implicit_change: None,
        }
    }

    #[must_use]
    pub fn with_release_delay_ms(mut self, delay_ms: u64) -> Self {
        self.release_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn with_implicit_change_callback(mut self, callback: ImplicitChangeCallback) -> Self {
        self.on_implicit_change = Some(callback);
        self
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn is_tracked(&self, id: ConnectionId) -> bool {
        self.connections.contains(&id)
    }

    pub fn waived(&self) -> Option<ConnectionId> {
        self.waived
    }

    /// Number of tracked connections, waived one included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of tracked connections actually holding the extra binding.
    pub fn bound_count(&self) -> usize {
        self.connections.len() - usize::from(self.waived.is_some())
    }

    /// Tracked connections in id order.
    pub fn tracked(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ── Membership ───────────────────────────────────────────────

    /// Start tracking `id`, evicting the lowest-ranked member if over cap.
    pub fn add_connection<R: RankedOrder + ?Sized>(
        &mut self,
        backend: &mut impl BindingBackend,
        ranking: &R,
        id: ConnectionId,
    ) {
        if !self.connections.insert(id) {
            return;
        }
        backend.add_binding(id, EXTRA_BINDING);
        if self
            .max_size
            .is_some_and(|max| self.connections.len() > max)
        {
            self.remove_old_connections(backend, ranking, 1);
        }
        self.ensure_lowest_rank_is_waived(backend, ranking);
    }

    /// Stop tracking `id` and release its extra binding.
    pub fn remove_connection<R: RankedOrder + ?Sized>(
        &mut self,
        backend: &mut impl BindingBackend,
        ranking: &R,
        id: ConnectionId,
    ) {
        if self.release(backend, id) {
            self.ensure_lowest_rank_is_waived(backend, ranking);
        }
    }

    /// Re-derive the waived connection after the ranking moved.
    pub fn ranking_changed<R: RankedOrder + ?Sized>(
        &mut self,
        backend: &mut impl BindingBackend,
        ranking: &R,
    ) {
        let Some(changed) = self.ensure_lowest_rank_is_waived(backend, ranking) else {
            return;
        };
        if let Some(callback) = self.on_implicit_change.as_mut() {
            callback(changed);
        }
    }

    /// Release every tracked connection.
    pub fn remove_all_connections(&mut self, backend: &mut impl BindingBackend) {
        let count = self.connections.len();
        for id in self.tracked() {
            self.release(backend, id);
        }
        debug_assert!(self.waived.is_none());
        if count > 0 {
            tracing::info!(count, "released all managed bindings");
        }
    }

    // ── Host lifecycle ───────────────────────────────────────────

    pub fn on_sent_to_background(&self, queue: &mut LauncherQueue) {
        queue.post_coalesced(LauncherTask::ReleaseAllBindings, self.release_delay_ms);
    }

    pub fn on_brought_to_foreground(&self, queue: &mut LauncherQueue) {
        queue.cancel(&LauncherTask::ReleaseAllBindings);
    }

    // ── Memory pressure ──────────────────────────────────────────

    pub fn on_trim_memory<R: RankedOrder + ?Sized>(
        &mut self,
        backend: &mut impl BindingBackend,
        ranking: &R,
        level: TrimLevel,
    ) {
        tracing::info!(?level, tracked = self.connections.len(), "trim memory");
        match level {
            TrimLevel::RunningModerate => self.reduce(backend, ranking, 0.25),
            TrimLevel::RunningLow => self.reduce(backend, ranking, 0.5),
            // Covered by the delayed background release.
            TrimLevel::UiHidden => {}
            TrimLevel::RunningCritical
            | TrimLevel::Background
            | TrimLevel::Moderate
            | TrimLevel::Complete => self.remove_all_connections(backend),
        }
    }

    pub fn on_low_memory(&mut self, backend: &mut impl BindingBackend) {
        tracing::info!(tracked = self.connections.len(), "low memory");
        self.remove_all_connections(backend);
    }

    // ── Internals ────────────────────────────────────────────────

    fn reduce<R: RankedOrder + ?Sized>(
        &mut self,
        backend: &mut impl BindingBackend,
        ranking: &R,
        ratio: f64,
    ) {
        let old_size = self.connections.len();
        let new_size = ((old_size as f64) * (1.0 - ratio)) as usize;
        self.remove_old_connections(backend, ranking, old_size - new_size);
        self.ensure_lowest_rank_is_waived(backend, ranking);
    }

    fn remove_old_connections<R: RankedOrder + ?Sized>(
        &mut self,
        backend: &mut impl BindingBackend,
        ranking: &R,
        count: usize,
    ) {
        if count == 0 {
            return;
        }
        let victims: Vec<ConnectionId> = ranking
            .lowest_first()
            .filter(|id| self.connections.contains(id))
            .take(count)
            .collect();
        debug_assert_eq!(victims.len(), count, "tracked connections missing from ranking");
        for id in victims {
            tracing::debug!(%id, "evicting managed binding");
            self.release(backend, id);
        }
    }

    /// Drop `id` from the tracked set. Returns `false` if it was not tracked.
    fn release(&mut self, backend: &mut impl BindingBackend, id: ConnectionId) -> bool {
        if !self.connections.remove(&id) {
            return false;
        }
        if self.waived == Some(id) {
            self.waived = None;
        } else {
            backend.remove_binding(id, EXTRA_BINDING);
        }
        true
    }

    /// Make the lowest-ranked tracked connection the waived one.
    ///
    /// Returns the first connection whose binding changed.
    fn ensure_lowest_rank_is_waived<R: RankedOrder + ?Sized>(
        &mut self,
        backend: &mut impl BindingBackend,
        ranking: &R,
    ) -> Option<ConnectionId> {
        let lowest = ranking
            .lowest_first()
            .find(|id| self.connections.contains(id));
        if lowest == self.waived {
            return None;
        }

        let mut first_changed = None;
        if let Some(previous) = self.waived.take() {
            debug_assert!(self.connections.contains(&previous));
            backend.add_binding(previous, EXTRA_BINDING);
            first_changed = Some(previous);
        }
        if let Some(next) = lowest {
            backend.remove_binding(next, EXTRA_BINDING);
            self.waived = Some(next);
            first_changed.get_or_insert(next);
        }
        first_changed
    }
}
