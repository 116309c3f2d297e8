//! Child-process ranking and binding management.
//!
//! Keeps live child-process connections in a total order of importance and
//! maps that order onto OS-visible process bindings, so the processes that
//! matter least are the first ones the OS reclaims under memory pressure.
//!
//! Everything here is synchronous and clock-free: callers pass time in as
//! milliseconds and drive delayed work through [`LauncherContext::advance_to`].

pub mod backend;
pub mod binding_manager;
pub mod config;
pub mod error;
pub mod launcher;
pub mod metrics;
pub mod priority;
pub mod queue;
pub mod ranking;
pub mod rebind;
pub mod types;

pub use backend::{BindingBackend, BindingOp, InMemoryBindings};
pub use binding_manager::BindingManager;
pub use config::LauncherConfig;
pub use error::ConfigError;
pub use launcher::{LauncherCommand, LauncherContext, LauncherSnapshot, RankedEntry};
pub use priority::PrioritySignals;
pub use ranking::ChildProcessRanking;
pub use types::{
    BindingGroup, BindingState, BindingTier, ConnectionId, HostState, Importance, RankSignals,
    TrimLevel,
};
