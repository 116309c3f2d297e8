//! Error types for configuration loading.
//!
//! Everything else in this crate treats misuse as a programming error and
//! panics.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid capacity for {field}: must be positive")]
    InvalidCapacity { field: &'static str },

    #[error("capacity {value} for {field} exceeds the limit of {max}")]
    CapacityTooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },
}
