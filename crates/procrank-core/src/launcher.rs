//! Launcher context: the single owner of the ranking, the binding manager,
//! the task queue and per-connection priority state.
//!
//! Every mutation of those components goes through this type, so it is the
//! one sequential execution context they need. Callers on other threads hand
//! commands over (see [`LauncherCommand`]) instead of touching state
//! directly.
//!
//! Construction order: queue → ranking (with its rebind strategy) →
//! binding manager → metrics task.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backend::BindingBackend;
use crate::binding_manager::{BindingManager, ImplicitChangeCallback};
use crate::config::LauncherConfig;
use crate::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::priority::{PriorityRules, PrioritySignals, binding_tier_for, effective_importance};
use crate::queue::{LauncherQueue, LauncherTask};
use crate::ranking::ChildProcessRanking;
use crate::rebind::policy_for;
use crate::types::{
    BindingGroup, BindingState, ConnectionId, HostState, Importance, RankSignals, TrimLevel,
};

// ─── Commands ────────────────────────────────────────────────────────

/// A unit of work handed to the launcher context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LauncherCommand {
    ConnectionEstablished {
        id: ConnectionId,
        #[serde(default)]
        is_spare_renderer: bool,
    },
    ConnectionLost {
        id: ConnectionId,
    },
    SetPriority {
        id: ConnectionId,
        #[serde(default)]
        signals: PrioritySignals,
    },
    AppForeground {
        foreground: bool,
    },
    WindowFocus {
        focused: bool,
    },
    TrimMemory {
        level: TrimLevel,
    },
    LowMemory,
    /// Only advance time.
    Tick,
}

// ─── Snapshot ────────────────────────────────────────────────────────

/// One ranked connection as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub id: ConnectionId,
    pub signals: RankSignals,
    pub effective_importance: Importance,
    pub binding_state: BindingState,
    pub group: BindingGroup,
    pub importance_in_group: i32,
    pub low_rank: bool,
}

/// Read-only view of the whole launcher state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSnapshot {
    pub at_ms: u64,
    pub rebind_policy: String,
    pub host: HostState,
    /// Most important first.
    pub ranking: Vec<RankedEntry>,
    pub tracked: Vec<ConnectionId>,
    pub waived: Option<ConnectionId>,
    pub pending_tasks: usize,
    pub last_metrics: Option<MetricsSnapshot>,
}

// ─── Context ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ConnectionState {
    started_at_ms: u64,
    effective: Importance,
}

#[derive(Debug)]
pub struct LauncherContext<B: BindingBackend> {
    config: LauncherConfig,
    rules: PriorityRules,
    backend: B,
    queue: LauncherQueue,
    ranking: ChildProcessRanking,
    binding_manager: Option<BindingManager>,
    metrics: ConnectionMetrics,
    connections: HashMap<ConnectionId, ConnectionState>,
    host: HostState,
}

impl<B: BindingBackend> LauncherContext<B> {
    /// Build every component from `config`. The config is assumed validated.
    pub fn new(config: LauncherConfig, mut backend: B, now_ms: u64) -> Self {
        let mut queue = LauncherQueue::new(now_ms);

        let mut ranking = ChildProcessRanking::new(
            config.allocation.max_size(),
            policy_for(config.strict_high_rank_lru),
        )
        .with_spare_renderer_lowest_ranking(config.spare_renderer_lowest_ranking)
        .with_rebind_delay_ms(config.timings.rebind_delay_ms);
        if config.service_group_importance {
            ranking.enable_service_group_importance(&mut backend, &mut queue);
        }

        let binding_manager = config.binding_manager.enabled.then(|| {
            BindingManager::new(config.binding_manager.max_size)
                .with_release_delay_ms(config.timings.background_release_delay_ms)
        });

        let metrics = ConnectionMetrics::new(config.timings.metrics_interval_ms);
        if metrics.interval_ms() > 0 {
            queue.post_delayed(LauncherTask::SampleMetrics, metrics.interval_ms());
        }

        tracing::info!(
            policy = ranking.rebind_policy_name(),
            max_connections = ?config.allocation.max_size(),
            binding_manager = config.binding_manager.enabled,
            managed_cap = ?config.binding_manager.max_size,
            group_importance = config.service_group_importance,
            "launcher context ready"
        );

        Self {
            rules: config.priority_rules(),
            config,
            backend,
            queue,
            ranking,
            binding_manager,
            metrics,
            connections: HashMap::new(),
            host: HostState::default(),
        }
    }

    #[must_use]
    pub fn with_implicit_change_callback(mut self, callback: ImplicitChangeCallback) -> Self {
        self.binding_manager = self
            .binding_manager
            .map(|m| m.with_implicit_change_callback(callback));
        self
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn ranking(&self) -> &ChildProcessRanking {
        &self.ranking
    }

    pub fn binding_manager(&self) -> Option<&BindingManager> {
        self.binding_manager.as_ref()
    }

    pub fn queue(&self) -> &LauncherQueue {
        &self.queue
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    pub fn host_state(&self) -> HostState {
        self.host
    }

    pub fn now_ms(&self) -> u64 {
        self.queue.now_ms()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn effective_importance(&self, id: ConnectionId) -> Option<Importance> {
        self.connections.get(&id).map(|s| s.effective)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    pub fn on_connection_established(&mut self, id: ConnectionId, is_spare_renderer: bool) {
        assert!(
            !self.connections.contains_key(&id),
            "{id} is already connected"
        );
        let now = self.queue.now_ms();
        self.backend.connection_established(id);

        let signals = RankSignals {
            is_spare_renderer,
            ..Default::default()
        };
        self.ranking
            .add_connection(&mut self.backend, &mut self.queue, id, signals);
        self.connections.insert(
            id,
            ConnectionState {
                started_at_ms: now,
                effective: Importance::Normal,
            },
        );
        if let Some(manager) = self.binding_manager.as_mut() {
            manager.add_connection(&mut self.backend, &self.ranking, id);
        }
        tracing::info!(%id, is_spare_renderer, "connection established");
    }

    pub fn on_connection_lost(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_none() {
            panic!("{id} is not a live connection");
        }
        if let Some(manager) = self.binding_manager.as_mut() {
            manager.remove_connection(&mut self.backend, &self.ranking, id);
        }
        self.ranking
            .remove_connection(&self.backend, &mut self.queue, id);
        let cancelled = self.queue.cancel_where(
            |task| matches!(task, LauncherTask::RemoveBinding { id: pending, .. } if *pending == id),
        );
        if let Some(manager) = self.binding_manager.as_mut() {
            manager.ranking_changed(&mut self.backend, &self.ranking);
        }
        self.backend.connection_lost(id);
        tracing::info!(%id, cancelled, "connection lost");
    }

    // ── Priority ─────────────────────────────────────────────────

    /// Apply a new signal tuple to a live connection.
    ///
    /// The binding for the new effective importance is added before the old
    /// one is dropped. Dropping is delayed to absorb oscillating signals,
    /// except during the startup window right after the connection came up.
    pub fn set_priority(&mut self, id: ConnectionId, signals: PrioritySignals) {
        let now = self.queue.now_ms();
        let Some(state) = self.connections.get_mut(&id) else {
            panic!("{id} is not a live connection");
        };
        let previous = state.effective;
        let effective = effective_importance(&signals, self.rules);
        state.effective = effective;
        let in_startup =
            now.saturating_sub(state.started_at_ms) < self.config.timings.startup_window_ms;

        if effective != previous {
            if let Some(tier) = binding_tier_for(effective) {
                self.backend.add_binding(id, tier);
            }
        }

        self.ranking.update_connection(
            &mut self.backend,
            &mut self.queue,
            id,
            signals.rank_signals(),
        );

        if effective != previous {
            if let Some(tier) = binding_tier_for(previous) {
                if in_startup {
                    self.backend.remove_binding(id, tier);
                } else {
                    self.queue.post_delayed(
                        LauncherTask::RemoveBinding { id, tier },
                        self.config.timings.remove_binding_delay_ms,
                    );
                }
            }
            tracing::debug!(%id, ?previous, ?effective, in_startup, "effective importance changed");
        }

        if let Some(manager) = self.binding_manager.as_mut() {
            manager.ranking_changed(&mut self.backend, &self.ranking);
        }
    }

    // ── Host events ──────────────────────────────────────────────

    pub fn on_app_foreground_changed(&mut self, foreground: bool) {
        if self.host.foreground == foreground {
            return;
        }
        self.host.foreground = foreground;
        if let Some(manager) = self.binding_manager.as_ref() {
            if foreground {
                manager.on_brought_to_foreground(&mut self.queue);
            } else {
                manager.on_sent_to_background(&mut self.queue);
            }
        }
        self.ranking.set_host_state(self.host, &mut self.queue);
        tracing::info!(foreground, "app foreground changed");
    }

    pub fn on_window_focus_changed(&mut self, focused: bool) {
        if self.host.window_focused == focused {
            return;
        }
        self.host.window_focused = focused;
        self.ranking.set_host_state(self.host, &mut self.queue);
        tracing::debug!(focused, "window focus changed");
    }

    pub fn on_trim_memory(&mut self, level: TrimLevel) {
        if let Some(manager) = self.binding_manager.as_mut() {
            manager.on_trim_memory(&mut self.backend, &self.ranking, level);
        }
    }

    pub fn on_low_memory(&mut self) {
        if let Some(manager) = self.binding_manager.as_mut() {
            manager.on_low_memory(&mut self.backend);
        }
    }

    // ── Time ─────────────────────────────────────────────────────

    /// Move time forward to `now_ms`, running every task that falls due,
    /// each at its own due time.
    pub fn advance_to(&mut self, now_ms: u64) {
        while let Some(due) = self.queue.next_due_ms() {
            if due > now_ms {
                break;
            }
            self.queue.advance_to(due);
            while let Some(task) = self.queue.pop_due() {
                self.run_task(task);
            }
        }
        self.queue.advance_to(now_ms);
    }

    /// Earliest time at which [`advance_to`](Self::advance_to) has work to do.
    pub fn next_wakeup_ms(&self) -> Option<u64> {
        self.queue.next_due_ms()
    }

    fn run_task(&mut self, task: LauncherTask) {
        match task {
            LauncherTask::RebindHighRank => {
                self.ranking.rebind_high_rank_connections(&mut self.backend);
            }
            LauncherTask::ReleaseAllBindings => {
                if let Some(manager) = self.binding_manager.as_mut() {
                    manager.remove_all_connections(&mut self.backend);
                }
            }
            LauncherTask::RemoveBinding { id, tier } => {
                if self.connections.contains_key(&id) {
                    self.backend.remove_binding(id, tier);
                }
            }
            LauncherTask::SampleMetrics => {
                let now = self.queue.now_ms();
                self.metrics.sample(
                    &self.backend,
                    &self.ranking,
                    self.binding_manager.as_ref(),
                    now,
                );
                self.queue
                    .post_delayed(LauncherTask::SampleMetrics, self.metrics.interval_ms());
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Execute one command at the current time.
    pub fn apply(&mut self, command: LauncherCommand) {
        match command {
            LauncherCommand::ConnectionEstablished {
                id,
                is_spare_renderer,
            } => self.on_connection_established(id, is_spare_renderer),
            LauncherCommand::ConnectionLost { id } => self.on_connection_lost(id),
            LauncherCommand::SetPriority { id, signals } => self.set_priority(id, signals),
            LauncherCommand::AppForeground { foreground } => {
                self.on_app_foreground_changed(foreground);
            }
            LauncherCommand::WindowFocus { focused } => self.on_window_focus_changed(focused),
            LauncherCommand::TrimMemory { level } => self.on_trim_memory(level),
            LauncherCommand::LowMemory => self.on_low_memory(),
            LauncherCommand::Tick => {}
        }
    }

    pub fn snapshot(&self) -> LauncherSnapshot {
        let ranking = self
            .ranking
            .iter()
            .map(|(id, signals)| RankedEntry {
                id,
                signals: *signals,
                effective_importance: self.effective_importance(id).unwrap_or_default(),
                binding_state: self.backend.binding_state(id),
                group: self.backend.group(id),
                importance_in_group: self.backend.importance_in_group(id),
                low_rank: self.ranking.is_low_rank(id),
            })
            .collect();
        LauncherSnapshot {
            at_ms: self.queue.now_ms(),
            rebind_policy: self.ranking.rebind_policy_name().to_owned(),
            host: self.host,
            ranking,
            tracked: self
                .binding_manager
                .as_ref()
                .map(BindingManager::tracked)
                .unwrap_or_default(),
            waived: self.binding_manager.as_ref().and_then(BindingManager::waived),
            pending_tasks: self.queue.len(),
            last_metrics: self.metrics.last().cloned(),
        }
    }
}
