//! Engine settings and their TOML file format.

use crate::error::BlockflowError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::Path,
    time::Duration,
};

/// Delay inside which repeated, non-immediate recomputation requests for one block coalesce.
pub const DEFAULT_THROTTLE_DELAY_MS: u64 = 5_000;

/// Engine tuning. Loaded from a TOML file or built from [Default].
///
/// ```toml
/// throttle_delay_ms = 5000
/// max_blocks = 512
/// id_length = 8
/// max_id_attempts = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub throttle_delay_ms: u64,
    /// Upper bound on the collection size. Every structural edit rebuilds the dependency graph
    /// from scratch, so this also bounds the cost of an edit.
    pub max_blocks: usize,
    pub id_length: usize,
    pub max_id_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            throttle_delay_ms: DEFAULT_THROTTLE_DELAY_MS,
            max_blocks: 512,
            id_length: 8,
            max_id_attempts: 64,
        }
    }
}

impl EngineConfig {
    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BlockflowError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read engine config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(EngineConfig::default());
        }
        let content = read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), BlockflowError> {
        tracing::debug!("Attempting to write engine config to: {:?}", path.as_ref());
        write(path, toml::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("throttle_delay_ms = 250").unwrap();
        assert_eq!(config.throttle_delay(), Duration::from_millis(250));
        assert_eq!(config.max_blocks, EngineConfig::default().max_blocks);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        assert_eq!(
            EngineConfig::from_file(&path).unwrap(),
            EngineConfig::default()
        );
        let config = EngineConfig {
            id_length: 12,
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }
}
