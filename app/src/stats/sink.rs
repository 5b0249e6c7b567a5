// ==============================================================================
// stats/sink.rs - Stats Side Output
// ==============================================================================
// Description: Optional per-sample side output of finalized statistics
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use super::{SampleVariantStats, StatsError};
use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// Receiver of finalized per-sample statistics
pub trait StatsSink: Send + Sync {
    fn write(&self, stats: &SampleVariantStats) -> Result<(), StatsError>;

    /// Flush and report where the output went
    fn finish(&self) -> Result<Option<PathBuf>, StatsError>;
}

/// JSON-lines file named `sample_variant_stats.<YYYYMMDDhhmmss>.json`
pub struct JsonLinesStatsSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesStatsSink {
    pub fn create<P: AsRef<Path>>(output_dir: P) -> Result<Self, StatsError> {
        fs::create_dir_all(output_dir.as_ref())?;
        let file_name = format!(
            "sample_variant_stats.{}.json",
            Local::now().format("%Y%m%d%H%M%S")
        );
        let path = output_dir.as_ref().join(file_name);
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatsSink for JsonLinesStatsSink {
    fn write(&self, stats: &SampleVariantStats) -> Result<(), StatsError> {
        let line = serde_json::to_string(stats).map_err(StatsError::SinkFormat)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StatsError::SinkLockPoisoned)?;
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn finish(&self) -> Result<Option<PathBuf>, StatsError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StatsError::SinkLockPoisoned)?;
        writer.flush()?;
        info!("Sample stats written to {:?}", self.path);
        Ok(Some(self.path.clone()))
    }
}
