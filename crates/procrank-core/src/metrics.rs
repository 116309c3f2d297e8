//! Periodic read-only sampling of connection binding states.

use serde::{Deserialize, Serialize};

use crate::backend::BindingBackend;
use crate::binding_manager::BindingManager;
use crate::ranking::ChildProcessRanking;
use crate::types::BindingState;

/// Counts taken at one sample tick.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub at_ms: u64,
    pub total: usize,
    pub strong: usize,
    pub visible: usize,
    pub not_perceptible: usize,
    pub waived: usize,
    pub unbound: usize,
    pub low_rank: usize,
    pub managed_tracked: usize,
    pub managed_bound: usize,
}

/// Sampler state. Holds the interval and the most recent sample.
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    interval_ms: u64,
    last: Option<MetricsSnapshot>,
    samples_taken: u64,
}

impl ConnectionMetrics {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last: None,
            samples_taken: 0,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last(&self) -> Option<&MetricsSnapshot> {
        self.last.as_ref()
    }

    pub fn samples_taken(&self) -> u64 {
        self.samples_taken
    }

    /// Count every ranked connection by binding state and keep the result.
    pub fn sample(
        &mut self,
        backend: &impl BindingBackend,
        ranking: &ChildProcessRanking,
        binding_manager: Option<&BindingManager>,
        now_ms: u64,
    ) -> &MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            at_ms: now_ms,
            total: ranking.len(),
            low_rank: ranking.len() - ranking.low_rank_boundary(),
            ..Default::default()
        };
        for (id, _) in ranking.iter() {
            let slot = match backend.binding_state(id) {
                BindingState::Strong => &mut snapshot.strong,
                BindingState::Visible => &mut snapshot.visible,
                BindingState::NotPerceptible => &mut snapshot.not_perceptible,
                BindingState::Waived => &mut snapshot.waived,
                BindingState::Unbound => &mut snapshot.unbound,
            };
            *slot += 1;
        }
        if let Some(manager) = binding_manager {
            snapshot.managed_tracked = manager.len();
            snapshot.managed_bound = manager.bound_count();
        }

        tracing::info!(
            total = snapshot.total,
            strong = snapshot.strong,
            visible = snapshot.visible,
            not_perceptible = snapshot.not_perceptible,
            waived = snapshot.waived,
            low_rank = snapshot.low_rank,
            managed = snapshot.managed_tracked,
            "connection metrics"
        );
        self.samples_taken += 1;
        self.last.insert(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBindings;
    use crate::queue::LauncherQueue;
    use crate::rebind::LegacyRebindAll;
    use crate::types::{BindingTier, ConnectionId, RankSignals};

    #[test]
    fn counts_by_binding_state() {
        let mut backend = InMemoryBindings::new();
        let mut queue = LauncherQueue::new(0);
        let mut ranking = ChildProcessRanking::new(None, Box::new(LegacyRebindAll));
        let mut manager = BindingManager::new(None);
        for n in 1..=4 {
            let id = ConnectionId(n);
            backend.register(id);
            ranking.add_connection(&mut backend, &mut queue, id, RankSignals::default());
            manager.add_connection(&mut backend, &ranking, id);
        }
        // #1 is lowest ranked and waived; #2 keeps only the managed binding.
        backend.add_binding(ConnectionId(4), BindingTier::Strong);
        backend.add_binding(ConnectionId(3), BindingTier::Visible);

        let mut metrics = ConnectionMetrics::new(1_000);
        let snapshot = metrics
            .sample(&backend, &ranking, Some(&manager), 42)
            .clone();
        assert_eq!(snapshot.at_ms, 42);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.strong, 1);
        assert_eq!(snapshot.visible, 1);
        assert_eq!(snapshot.not_perceptible, 1);
        assert_eq!(snapshot.waived, 1);
        assert_eq!(snapshot.low_rank, 4);
        assert_eq!(snapshot.managed_tracked, 4);
        assert_eq!(snapshot.managed_bound, 3);
        assert_eq!(metrics.samples_taken(), 1);
        assert_eq!(metrics.last(), Some(&snapshot));
    }

    #[test]
    fn empty_sample() {
        let backend = InMemoryBindings::new();
        let ranking = ChildProcessRanking::new(None, Box::new(LegacyRebindAll));
        let mut metrics = ConnectionMetrics::new(1_000);
        let snapshot = metrics.sample(&backend, &ranking, None, 0);
        assert_eq!(snapshot, &MetricsSnapshot::default());
    }
}
