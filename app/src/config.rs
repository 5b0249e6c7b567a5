// ==============================================================================
// config.rs - Storage Configuration
// ==============================================================================
// Description: Stats job and duplicate resolver settings with defaults,
//              optional JSON file and environment overrides
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Settings for the per-sample stats job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Number of row partitions (map tasks)
    pub partitions: usize,

    /// Attempts per map task before the job fails
    pub max_task_attempts: u32,

    /// Emit finalized stats as JSON lines in `output_dir`
    pub write_side_output: bool,

    pub output_dir: PathBuf,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            max_task_attempts: 3,
            write_side_output: false,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Settings for duplicate resolution during loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// `maxQual` or `discard`
    pub policy: String,

    /// Directory receiving the duplicate audit file
    pub audit_dir: PathBuf,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            policy: "maxQual".to_string(),
            audit_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub stats: StatsConfig,
    pub dedup: DedupConfig,
}

impl StorageConfig {
    /// Load from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?
            }
            None => StorageConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        debug!("Storage config: {:?}", config);
        Ok(config)
    }

    /// Override fields from `VARIANT_*` variables looked up via `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("VARIANT_STATS_PARTITIONS") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => self.stats.partitions = n,
                _ => warn!("Ignoring invalid VARIANT_STATS_PARTITIONS '{}'", value),
            }
        }
        if let Some(value) = lookup("VARIANT_STATS_MAX_ATTEMPTS") {
            match value.parse::<u32>() {
                Ok(n) if n > 0 => self.stats.max_task_attempts = n,
                _ => warn!("Ignoring invalid VARIANT_STATS_MAX_ATTEMPTS '{}'", value),
            }
        }
        if let Some(value) = lookup("VARIANT_STATS_OUTPUT_DIR") {
            self.stats.output_dir = PathBuf::from(value);
            self.stats.write_side_output = true;
        }
        if let Some(value) = lookup("VARIANT_DEDUP_POLICY") {
            self.dedup.policy = value;
        }
        if let Some(value) = lookup("VARIANT_DEDUP_AUDIT_DIR") {
            self.dedup.audit_dir = PathBuf::from(value);
        }
    }
}
