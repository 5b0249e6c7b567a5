// ==============================================================================
// stats/mod.rs - Per-Sample Variant Statistics
// ==============================================================================
// Description: Map/combine/reduce aggregation of per-sample statistics
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

pub mod accumulator;
pub mod job;
pub mod pedigree;
pub mod sink;

pub use accumulator::{PartialSampleStats, SampleCall, SampleStatsAccumulator, SampleVariantStats};
pub use job::{SampleSelection, SampleStatsJob, StatsJobPlan, StatsJobReport, StatsProgress};
pub use pedigree::{Pedigree, PedigreeError, Trio};
pub use sink::{JsonLinesStatsSink, StatsSink};

use crate::metadata::MetadataError;
use crate::models::SampleId;
use crate::row_codec::CodecError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised by the statistics pipeline
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Cannot merge stats of sample {found} into sample {expected}")]
    SampleMismatch { expected: SampleId, found: SampleId },

    #[error("Stats for sample '{0}' already finalized")]
    AlreadyFinalized(String),

    #[error("Nothing to do: no samples selected")]
    NothingToDo,

    #[error("Study '{0}' not found")]
    UnknownStudy(String),

    #[error("Sample '{0}' not found in study")]
    UnknownSample(String),

    #[error(transparent)]
    CorruptRow(#[from] CodecError),

    #[error("Corrupt annotation at {locus}: {source}")]
    CorruptAnnotation {
        locus: String,
        source: serde_json::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Pedigree error: {0}")]
    Pedigree(#[from] PedigreeError),

    #[error("Task for partition {partition} failed after {attempts} attempts: {source}")]
    TaskFailed {
        partition: usize,
        attempts: u32,
        source: Box<StatsError>,
    },

    #[error("Stats job cancelled")]
    Cancelled,

    #[error("Failed to persist stats for sample {sample_id}: {source}")]
    Persist {
        sample_id: SampleId,
        source: MetadataError,
    },

    #[error("Side output error: {0}")]
    Sink(#[from] std::io::Error),

    #[error("Side output serialization error: {0}")]
    SinkFormat(#[source] serde_json::Error),

    #[error("Side output lock poisoned")]
    SinkLockPoisoned,
}
