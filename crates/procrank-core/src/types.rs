//! Core vocabulary shared by the ranking, the binding manager and the launcher.
//!
//! All types are plain tagged data. Nothing here owns a connection: a
//! [`ConnectionId`] is a stable, non-owning handle to a connection whose
//! lifetime belongs to the process-launcher layer.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Connection Handle ───────────────────────────────────────────────

/// Stable identity of a child-process connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

// ─── Importance ──────────────────────────────────────────────────────

/// Importance signal attached to a connection by the embedder.
///
/// Ordered from least to most important so `importance <= Perceptible`
/// reads the way the ranking rules are written.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    #[default]
    Normal,
    Perceptible,
    Moderate,
    Important,
}

// ─── Binding Tiers / State ───────────────────────────────────────────

/// A binding strength that can be added to or removed from a connection.
///
/// Tiers are reference counted by the backend: the tier is held while at
/// least one holder has added it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingTier {
    NotPerceptible,
    Visible,
    Strong,
}

impl BindingTier {
    pub const ALL: [BindingTier; 3] = [
        BindingTier::NotPerceptible,
        BindingTier::Visible,
        BindingTier::Strong,
    ];

    /// Binding state a connection reports when this is its strongest tier.
    pub fn as_state(self) -> BindingState {
        match self {
            BindingTier::NotPerceptible => BindingState::NotPerceptible,
            BindingTier::Visible => BindingState::Visible,
            BindingTier::Strong => BindingState::Strong,
        }
    }
}

/// Current OS-visible binding state of a connection, weakest first.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    /// Not connected at all.
    #[default]
    Unbound,
    /// Connected with only the waived base binding.
    Waived,
    NotPerceptible,
    Visible,
    Strong,
}

/// Binding group a connection is placed into by the ranking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingGroup {
    #[default]
    None,
    LowRank,
}

// ─── Ranking Signals ─────────────────────────────────────────────────

/// Per-connection attributes the ranking orders by.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RankSignals {
    pub visible: bool,
    /// 0 is the main frame.
    pub frame_depth: u32,
    pub intersects_viewport: bool,
    pub is_spare_renderer: bool,
    pub importance: Importance,
}

impl RankSignals {
    /// Visible and either the main frame or a subframe inside the viewport.
    pub fn in_viewport_visible(&self) -> bool {
        self.visible && (self.frame_depth == 0 || self.intersects_viewport)
    }
}

// ─── Host Application State ──────────────────────────────────────────

/// Foreground / focus state of the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostState {
    pub foreground: bool,
    pub window_focused: bool,
}

impl HostState {
    /// Whether the OS may be capping process priorities for this app.
    pub fn priority_capped(&self) -> bool {
        !self.foreground || !self.window_focused
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            foreground: true,
            window_focused: true,
        }
    }
}

// ─── Memory Pressure ─────────────────────────────────────────────────

/// Memory trim levels delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimLevel {
    RunningModerate,
    RunningLow,
    RunningCritical,
    UiHidden,
    Background,
    Moderate,
    Complete,
}
