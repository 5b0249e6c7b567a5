// ==============================================================================
// job.rs - Stats Job Execution
// ==============================================================================
// Description: Opens the variant database and runs one sample stats job on
//              the calling (blocking) thread, forwarding task progress
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use variant_storage::config::StatsConfig;
use variant_storage::metadata::{MetadataError, MetadataManager, SqliteMetadataManager};
use variant_storage::stats::{SampleSelection, SampleStatsJob, StatsError, StatsJobReport, StatsProgress};
use variant_storage::storage::{SqliteVariantStore, StorageError, VariantStore};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to open variant store {path:?}: {source}")]
    Store { path: PathBuf, source: StorageError },

    #[error("Failed to open sample catalog {path:?}: {source}")]
    Catalog { path: PathBuf, source: MetadataError },

    #[error(transparent)]
    Stats(#[from] StatsError),
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Stats(StatsError::Cancelled))
    }
}

/// Everything a blocking stats run needs
pub struct StatsJobRequest {
    pub db_path: PathBuf,
    pub study: String,
    pub samples: String,
    pub config: StatsConfig,
    pub cancel: Arc<AtomicBool>,
}

/// Run a stats job to completion. Progress is sent on `progress`; the
/// channel closes when this returns.
pub fn run_stats_job(
    request: StatsJobRequest,
    progress: UnboundedSender<StatsProgress>,
) -> Result<StatsJobReport, JobError> {
    let store: Arc<dyn VariantStore> = Arc::new(
        SqliteVariantStore::open(&request.db_path).map_err(|source| JobError::Store {
            path: request.db_path.clone(),
            source,
        })?,
    );
    let metadata: Arc<dyn MetadataManager> = Arc::new(
        SqliteMetadataManager::open(&request.db_path).map_err(|source| JobError::Catalog {
            path: request.db_path.clone(),
            source,
        })?,
    );

    let job = SampleStatsJob::new(store, metadata, request.config)
        .with_cancel(request.cancel)
        .with_progress(move |p| {
            // Receiver gone means the job is being abandoned
            if progress.send(p).is_err() {
                debug!("Progress receiver dropped");
            }
        });

    let plan = job.plan(&request.study, &SampleSelection::parse(&request.samples))?;
    info!(
        "Stats plan for '{}': {} target samples, {} samples read",
        plan.study_name,
        plan.targets.len(),
        plan.job_samples.len()
    );

    Ok(job.run(&plan)?)
}
