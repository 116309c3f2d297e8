//! Launcher configuration: feature switches, capacities and timings.
//!
//! All switches are resolved once at startup; nothing here is re-read
//! while the launcher runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::binding_manager::BACKGROUND_RELEASE_DELAY_MS;
use crate::error::ConfigError;
use crate::priority::PriorityRules;
use crate::ranking::{MAX_FIXED_CONNECTIONS, REBIND_DELAY_MS};

/// Delay before a dropped binding tier is actually removed.
pub const REMOVE_BINDING_DELAY_MS: u64 = 500;
/// Connections younger than this drop binding tiers immediately.
pub const STARTUP_WINDOW_MS: u64 = 1_000;
/// Interval between connection metric samples (5 minutes).
pub const METRICS_INTERVAL_MS: u64 = 300_000;

/// How the ranking allocates room for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectionAllocation {
    /// Bounded; registering past `max_connections` is a programming error.
    /// At most [`MAX_FIXED_CONNECTIONS`].
    Fixed { max_connections: usize },
    Variable,
}

impl ConnectionAllocation {
    pub fn max_size(&self) -> Option<usize> {
        match self {
            ConnectionAllocation::Fixed { max_connections } => Some(*max_connections),
            ConnectionAllocation::Variable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingManagerConfig {
    pub enabled: bool,
    /// `None` leaves the managed set uncapped.
    pub max_size: Option<usize>,
}

impl Default for BindingManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub rebind_delay_ms: u64,
    pub remove_binding_delay_ms: u64,
    pub startup_window_ms: u64,
    pub background_release_delay_ms: u64,
    pub metrics_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            rebind_delay_ms: REBIND_DELAY_MS,
            remove_binding_delay_ms: REMOVE_BINDING_DELAY_MS,
            startup_window_ms: STARTUP_WINDOW_MS,
            background_release_delay_ms: BACKGROUND_RELEASE_DELAY_MS,
            metrics_interval_ms: METRICS_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Select the conflict-based rebind strategy over rebinding everything.
    pub strict_high_rank_lru: bool,
    pub spare_renderer_lowest_ranking: bool,
    pub service_group_importance: bool,
    pub support_not_perceptible_binding: bool,
    pub media_stream_moderate: bool,
    pub allocation: ConnectionAllocation,
    pub binding_manager: BindingManagerConfig,
    pub timings: Timings,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            strict_high_rank_lru: false,
            spare_renderer_lowest_ranking: false,
            service_group_importance: true,
            support_not_perceptible_binding: true,
            media_stream_moderate: false,
            allocation: ConnectionAllocation::Variable,
            binding_manager: BindingManagerConfig::default(),
            timings: Timings::default(),
        }
    }
}

impl LauncherConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allocation.max_size() == Some(0) {
            return Err(ConfigError::InvalidCapacity {
                field: "allocation.max_connections",
            });
        }
        if let Some(value) = self.allocation.max_size().filter(|&n| n > MAX_FIXED_CONNECTIONS) {
            return Err(ConfigError::CapacityTooLarge {
                field: "allocation.max_connections",
                value,
                max: MAX_FIXED_CONNECTIONS,
            });
        }
        if self.binding_manager.enabled && self.binding_manager.max_size == Some(0) {
            return Err(ConfigError::InvalidCapacity {
                field: "binding_manager.max_size",
            });
        }
        Ok(())
    }

    pub fn priority_rules(&self) -> PriorityRules {
        PriorityRules {
            support_not_perceptible_binding: self.support_not_perceptible_binding,
            media_stream_moderate: self.media_stream_moderate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = LauncherConfig::from_toml_str("").unwrap();
        assert_eq!(config, LauncherConfig::default());
        assert_eq!(config.timings.rebind_delay_ms, 1_000);
        assert_eq!(config.timings.remove_binding_delay_ms, 500);
        assert_eq!(config.timings.background_release_delay_ms, 10_000);
    }

    #[test]
    fn parses_switches_and_tables() {
        let config = LauncherConfig::from_toml_str(
            r#"
strict_high_rank_lru = true
spare_renderer_lowest_ranking = true

[allocation]
mode = "fixed"
max_connections = 40

[binding_manager]
max_size = 8

[timings]
rebind_delay_ms = 250
"#,
        )
        .unwrap();
        assert!(config.strict_high_rank_lru);
        assert!(config.spare_renderer_lowest_ranking);
        assert!(config.service_group_importance);
        assert_eq!(config.allocation.max_size(), Some(40));
        assert_eq!(config.binding_manager.max_size, Some(8));
        assert!(config.binding_manager.enabled);
        assert_eq!(config.timings.rebind_delay_ms, 250);
        assert_eq!(config.timings.startup_window_ms, 1_000);
    }

    #[test]
    fn zero_capacities_rejected() {
        let err = LauncherConfig::from_toml_str(
            "[allocation]\nmode = \"fixed\"\nmax_connections = 0\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidCapacity {
                field: "allocation.max_connections"
            }
        ));

        let err = LauncherConfig::from_toml_str("[binding_manager]\nmax_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCapacity { .. }));
    }

    #[test]
    fn oversized_fixed_capacity_rejected() {
        let err = LauncherConfig::from_toml_str(
            "[allocation]\nmode = \"fixed\"\nmax_connections = 9223372036854775807\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CapacityTooLarge {
                field: "allocation.max_connections",
                max: MAX_FIXED_CONNECTIONS,
                ..
            }
        ));
        assert!(err.to_string().contains("65535"));

        let limit = format!(
            "[allocation]\nmode = \"fixed\"\nmax_connections = {MAX_FIXED_CONNECTIONS}\n"
        );
        let config = LauncherConfig::from_toml_str(&limit).unwrap();
        assert_eq!(config.allocation.max_size(), Some(MAX_FIXED_CONNECTIONS));
    }

    #[test]
    fn zero_cap_allowed_when_manager_disabled() {
        let config =
            LauncherConfig::from_toml_str("[binding_manager]\nenabled = false\nmax_size = 0\n")
                .unwrap();
        assert!(!config.binding_manager.enabled);
    }

    #[test]
    fn unknown_mode_is_parse_error() {
        let err = LauncherConfig::from_toml_str("[allocation]\nmode = \"elastic\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = LauncherConfig::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(LauncherConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = LauncherConfig::load(Path::new("/nonexistent/procrank.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/procrank.toml"));
    }
}
