//! Binding backend boundary: the OS-visible bind / unbind / rebind surface.
//!
//! The ranking and the binding manager never hold binding state of their
//! own; group membership and binding tiers are read back from the backend,
//! which is the single source of truth for them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{BindingGroup, BindingState, BindingTier, ConnectionId};

/// Outbound operations on a connection's process bindings.
///
/// Mutations are only ever issued from the launcher context. Calls are
/// fire-and-forget: a refused bind is reported to the launcher as a lost
/// connection, never as an error here.
pub trait BindingBackend {
    fn add_binding(&mut self, id: ConnectionId, tier: BindingTier);
    fn remove_binding(&mut self, id: ConnectionId, tier: BindingTier);
    /// Re-issue the current bindings to refresh the connection's recency.
    fn rebind(&mut self, id: ConnectionId);
    fn binding_state(&self, id: ConnectionId) -> BindingState;
    /// Place the connection into `group`. Returns `true` if this changed
    /// anything that requires a rebind to take effect.
    fn set_group(&mut self, id: ConnectionId, group: BindingGroup, importance_in_group: i32)
    -> bool;
    fn group(&self, id: ConnectionId) -> BindingGroup;
    fn importance_in_group(&self, id: ConnectionId) -> i32;

    /// The launcher established a connection to a new child process.
    fn connection_established(&mut self, _id: ConnectionId) {}

    /// The launcher tore the connection down.
    fn connection_lost(&mut self, _id: ConnectionId) {}
}

impl<T: BindingBackend + ?Sized> BindingBackend for &mut T {
    fn add_binding(&mut self, id: ConnectionId, tier: BindingTier) {
        (**self).add_binding(id, tier);
    }

    fn remove_binding(&mut self, id: ConnectionId, tier: BindingTier) {
        (**self).remove_binding(id, tier);
    }

    fn rebind(&mut self, id: ConnectionId) {
        (**self).rebind(id);
    }

    fn binding_state(&self, id: ConnectionId) -> BindingState {
        (**self).binding_state(id)
    }

    fn set_group(
        &mut self,
        id: ConnectionId,
        group: BindingGroup,
        importance_in_group: i32,
    ) -> bool {
        (**self).set_group(id, group, importance_in_group)
    }

    fn group(&self, id: ConnectionId) -> BindingGroup {
        (**self).group(id)
    }

    fn importance_in_group(&self, id: ConnectionId) -> i32 {
        (**self).importance_in_group(id)
    }

    fn connection_established(&mut self, id: ConnectionId) {
        (**self).connection_established(id);
    }

    fn connection_lost(&mut self, id: ConnectionId) {
        (**self).connection_lost(id);
    }
}

// ─── In-Memory Backend ───────────────────────────────────────────────

/// One outbound call, as recorded by [`InMemoryBindings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BindingOp {
    Add {
        id: ConnectionId,
        tier: BindingTier,
    },
    Remove {
        id: ConnectionId,
        tier: BindingTier,
    },
    Rebind {
        id: ConnectionId,
    },
    SetGroup {
        id: ConnectionId,
        group: BindingGroup,
        importance_in_group: i32,
    },
}

#[derive(Debug, Clone, Default)]
struct BindingRecord {
    /// Reference counts indexed by [`tier_slot`].
    counts: [u32; 3],
    group: BindingGroup,
    importance_in_group: i32,
    rebinds: u64,
}

fn tier_slot(tier: BindingTier) -> usize {
    match tier {
        BindingTier::NotPerceptible => 0,
        BindingTier::Visible => 1,
        BindingTier::Strong => 2,
    }
}

/// Simulated binding layer with reference-counted tiers and a call log.
///
/// Used by the runtime to replay scenarios and by tests as the recording
/// fake.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBindings {
    records: HashMap<ConnectionId, BindingRecord>,
    ops: Vec<BindingOp>,
}

impl InMemoryBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a connected process. Re-registering resets its state.
    pub fn register(&mut self, id: ConnectionId) {
        self.records.insert(id, BindingRecord::default());
    }

    pub fn unregister(&mut self, id: ConnectionId) {
        self.records.remove(&id);
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.records.contains_key(&id)
    }

    /// Current reference count of `tier` on `id` (0 if unknown).
    pub fn tier_count(&self, id: ConnectionId, tier: BindingTier) -> u32 {
        self.records
            .get(&id)
            .map_or(0, |r| r.counts[tier_slot(tier)])
    }

    /// Number of `rebind()` calls issued for `id` since registration.
    pub fn rebind_count(&self, id: ConnectionId) -> u64 {
        self.records.get(&id).map_or(0, |r| r.rebinds)
    }

    pub fn ops(&self) -> &[BindingOp] {
        &self.ops
    }

    /// Drain the call log, returning everything recorded so far.
    pub fn take_ops(&mut self) -> Vec<BindingOp> {
        std::mem::take(&mut self.ops)
    }
}

impl BindingBackend for InMemoryBindings {
    fn add_binding(&mut self, id: ConnectionId, tier: BindingTier) {
        self.ops.push(BindingOp::Add { id, tier });
        match self.records.get_mut(&id) {
            Some(record) => record.counts[tier_slot(tier)] += 1,
            None => tracing::warn!(%id, ?tier, "add_binding on unregistered connection"),
        }
    }

    fn remove_binding(&mut self, id: ConnectionId, tier: BindingTier) {
        self.ops.push(BindingOp::Remove { id, tier });
        let Some(record) = self.records.get_mut(&id) else {
            tracing::warn!(%id, ?tier, "remove_binding on unregistered connection");
            return;
        };
        let count = &mut record.counts[tier_slot(tier)];
        if *count == 0 {
            tracing::warn!(%id, ?tier, "remove_binding without matching add");
        } else {
            *count -= 1;
        }
    }

    fn rebind(&mut self, id: ConnectionId) {
        self.ops.push(BindingOp::Rebind { id });
        if let Some(record) = self.records.get_mut(&id) {
            record.rebinds += 1;
        }
    }

    fn binding_state(&self, id: ConnectionId) -> BindingState {
        let Some(record) = self.records.get(&id) else {
            return BindingState::Unbound;
        };
        BindingTier::ALL
            .iter()
            .rev()
            .find(|tier| record.counts[tier_slot(**tier)] > 0)
            .map_or(BindingState::Waived, |tier| tier.as_state())
    }

    fn set_group(
        &mut self,
        id: ConnectionId,
        group: BindingGroup,
        importance_in_group: i32,
    ) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        if record.group == group && record.importance_in_group == importance_in_group {
            return false;
        }
        record.group = group;
        record.importance_in_group = importance_in_group;
        self.ops.push(BindingOp::SetGroup {
            id,
            group,
            importance_in_group,
        });
        true
    }

    fn group(&self, id: ConnectionId) -> BindingGroup {
        self.records.get(&id).map_or(BindingGroup::None, |r| r.group)
    }

    fn importance_in_group(&self, id: ConnectionId) -> i32 {
        self.records.get(&id).map_or(0, |r| r.importance_in_group)
    }

    fn connection_established(&mut self, id: ConnectionId) {
        self.register(id);
    }

    fn connection_lost(&mut self, id: ConnectionId) {
        self.unregister(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConnectionId = ConnectionId(1);

    #[test]
    fn unregistered_is_unbound() {
        let backend = InMemoryBindings::new();
        assert_eq!(backend.binding_state(A), BindingState::Unbound);
    }

    #[test]
    fn registered_without_tiers_is_waived() {
        let mut backend = InMemoryBindings::new();
        backend.register(A);
        assert_eq!(backend.binding_state(A), BindingState::Waived);
    }

    #[test]
    fn strongest_tier_wins() {
        let mut backend = InMemoryBindings::new();
        backend.register(A);
        backend.add_binding(A, BindingTier::NotPerceptible);
        backend.add_binding(A, BindingTier::Strong);
        assert_eq!(backend.binding_state(A), BindingState::Strong);
        backend.remove_binding(A, BindingTier::Strong);
        assert_eq!(backend.binding_state(A), BindingState::NotPerceptible);
    }

    #[test]
    fn tiers_are_reference_counted() {
        let mut backend = InMemoryBindings::new();
        backend.register(A);
        backend.add_binding(A, BindingTier::Visible);
        backend.add_binding(A, BindingTier::Visible);
        backend.remove_binding(A, BindingTier::Visible);
        assert_eq!(backend.binding_state(A), BindingState::Visible);
        assert_eq!(backend.tier_count(A, BindingTier::Visible), 1);
        backend.remove_binding(A, BindingTier::Visible);
        assert_eq!(backend.binding_state(A), BindingState::Waived);
    }

    #[test]
    fn unmatched_remove_saturates() {
        let mut backend = InMemoryBindings::new();
        backend.register(A);
        backend.remove_binding(A, BindingTier::Strong);
        assert_eq!(backend.tier_count(A, BindingTier::Strong), 0);
    }

    #[test]
    fn set_group_reports_only_real_changes() {
        let mut backend = InMemoryBindings::new();
        backend.register(A);
        assert!(backend.set_group(A, BindingGroup::LowRank, 10));
        assert!(!backend.set_group(A, BindingGroup::LowRank, 10));
        assert!(backend.set_group(A, BindingGroup::LowRank, 11));
        assert_eq!(backend.importance_in_group(A), 11);
        assert!(backend.set_group(A, BindingGroup::None, 0));
        assert_eq!(backend.group(A), BindingGroup::None);
    }

    #[test]
    fn set_group_on_unregistered_is_not_a_change() {
        let mut backend = InMemoryBindings::new();
        assert!(!backend.set_group(A, BindingGroup::LowRank, 10));
        assert!(backend.ops().is_empty());
    }

    #[test]
    fn ops_are_logged_in_order() {
        let mut backend = InMemoryBindings::new();
        backend.register(A);
        backend.add_binding(A, BindingTier::Strong);
        backend.rebind(A);
        let ops = backend.take_ops();
        assert_eq!(
            ops,
            vec![
                BindingOp::Add {
                    id: A,
                    tier: BindingTier::Strong
                },
                BindingOp::Rebind { id: A },
            ]
        );
        assert!(backend.ops().is_empty());
        assert_eq!(backend.rebind_count(A), 1);
    }
}
