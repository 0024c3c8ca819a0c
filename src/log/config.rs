use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LogError, Result};
use super::index::ENT_WIDTH;

// Thresholds for a single segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Store file size that triggers rotation
    pub max_store_bytes: u64,
    /// Index file size that triggers rotation; also bounds records per segment
    pub max_index_bytes: u64,
    /// Offset given to the first record of an empty log
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: 1024 * 1024, // 1MB
            max_index_bytes: 1024 * 1024, // 1MB
            initial_offset: 0,
        }
    }
}

// Configuration object for handling segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub segment: SegmentConfig,
}

impl Config {
    pub fn new(max_store_bytes: u64, max_index_bytes: u64, initial_offset: u64) -> Self {
        Self {
            segment: SegmentConfig {
                max_store_bytes,
                max_index_bytes,
                initial_offset,
            },
        }
    }

    /// Rejects thresholds a segment could never satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.segment.max_store_bytes == 0 {
            return Err(LogError::Config(
                "max_store_bytes must be greater than 0".to_string(),
            ));
        }
        if self.segment.max_index_bytes < ENT_WIDTH {
            return Err(LogError::Config(format!(
                "max_index_bytes must hold at least one {}-byte index entry, got {}",
                ENT_WIDTH, self.segment.max_index_bytes
            )));
        }
        Ok(())
    }

    /// Layers the defaults, an optional file (format from its extension)
    /// and `SEGLOG_*` environment variables, e.g.
    /// `SEGLOG_SEGMENT__MAX_STORE_BYTES`.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let invalid = |e: ::config::ConfigError| LogError::Config(e.to_string());

        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Config::default()).map_err(invalid)?);
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder
            .add_source(
                ::config::Environment::with_prefix("SEGLOG")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .map_err(invalid)
    }
}
