// ==============================================================================
// main.rs - Variant Stats Worker Process
// ==============================================================================
// Description: Background worker that runs sample stats jobs from a Redis
//              queue and publishes their progress
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};
use uuid::Uuid;
use variant_storage::config::{StatsConfig, StorageConfig};
use variant_storage::stats::StatsProgress;

mod job;
mod queue;

use job::{run_stats_job, StatsJobRequest};
use queue::{JobQueue, JobStatus, ProgressMessage, StatsJobPayload};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    info!("Starting Variant Stats Worker v1.0.0");

    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("VARIANT_CONFIG").ok().map(PathBuf::from);
    let config = StorageConfig::load(config_path.as_deref())?;

    let db_path = PathBuf::from(
        std::env::var("VARIANT_DB_PATH").unwrap_or_else(|_| "variants.db".to_string()),
    );
    if !db_path.exists() {
        warn!("Variant database {:?} does not exist yet", db_path);
    }

    // Initialize Redis connection
    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let redis_client = RedisClient::open(redis_url)
        .context("Failed to create Redis client")?;

    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to create Redis connection manager")?;

    info!("Connected to Redis");

    let worker = Worker::new(redis_conn, db_path, config.stats);

    // Stop taking jobs on ctrl-c; the loop notices between pops
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
        signal.store(true, Ordering::SeqCst);
    });

    info!("Worker ready, waiting for jobs...");
    worker.run(shutdown).await
}

/// Cancel flags of jobs currently running, by job id
type RunningJobs = Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>;

/// Main worker struct
#[derive(Clone)]
struct Worker {
    redis_conn: ConnectionManager,
    db_path: PathBuf,
    stats_config: StatsConfig,
    running: RunningJobs,
}

impl Worker {
    fn new(redis_conn: ConnectionManager, db_path: PathBuf, stats_config: StatsConfig) -> Self {
        Self {
            redis_conn,
            db_path,
            stats_config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Main processing loop - polls Redis queue for jobs until `shutdown`
    async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut job_queue = JobQueue::new(self.redis_conn.clone());
        let mut jobs = JoinSet::new();

        while !shutdown.load(Ordering::SeqCst) {
            match job_queue.dequeue().await {
                Ok(Some(payload)) => {
                    info!("Received job: {}", payload.job_id);

                    // Process job in background (don't block queue)
                    let worker = self.clone();
                    jobs.spawn(async move {
                        if let Err(e) = worker.process_job(payload).await {
                            error!("Job processing failed: {:#}", e);
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to dequeue job: {:#}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }

            // Reap finished jobs
            while let Some(joined) = jobs.try_join_next() {
                if let Err(e) = joined {
                    error!("Job task aborted: {}", e);
                }
            }
        }

        drain_jobs(&self.running, &mut jobs).await;
        info!("Worker stopped");
        Ok(())
    }

    /// Run one job on the blocking pool, relaying its progress to Redis
    async fn process_job(&self, payload: StatsJobPayload) -> Result<()> {
        let job_id = payload.job_id;
        let mut job_queue = JobQueue::new(self.redis_conn.clone());

        // 1. Announce and register the cancel flag
        job_queue
            .publish_progress(&ProgressMessage::new(
                job_id,
                JobStatus::Running,
                StatsProgress { tasks_done: 0, tasks_total: 0 },
                format!("Starting sample stats for study '{}'", payload.study),
            ))
            .await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.register(job_id, Arc::clone(&cancel));

        // 2. Run the job off the async runtime
        let request = StatsJobRequest {
            db_path: payload
                .db_path
                .map(PathBuf::from)
                .unwrap_or_else(|| self.db_path.clone()),
            study: payload.study,
            samples: payload.samples,
            config: self.stats_config.clone(),
            cancel,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || run_stats_job(request, tx));

        // 3. Relay progress until the job drops its sender
        let mut last = StatsProgress { tasks_done: 0, tasks_total: 0 };
        while let Some(progress) = rx.recv().await {
            if progress.tasks_done <= last.tasks_done {
                continue;
            }
            last = progress;
            let message = format!("{}/{} partitions", progress.tasks_done, progress.tasks_total);
            if let Err(e) = job_queue
                .publish_progress(&ProgressMessage::new(job_id, JobStatus::Running, progress, message))
                .await
            {
                warn!("Failed to publish progress for job {}: {:#}", job_id, e);
            }
        }

        let result = handle.await.context("Stats job task panicked");
        self.unregister(job_id);

        // 4. Final status
        let final_message = match result? {
            Ok(report) => {
                info!(
                    "Job {} complete: {} samples, {} rows",
                    job_id,
                    report.samples.len(),
                    report.rows_processed
                );
                ProgressMessage::new(job_id, JobStatus::Completed, last, serde_json::to_string(&report)?)
            }
            Err(e) if e.is_cancelled() => {
                warn!("Job {} cancelled", job_id);
                ProgressMessage::new(job_id, JobStatus::Cancelled, last, e.to_string())
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                ProgressMessage::new(job_id, JobStatus::Failed, last, e.to_string())
            }
        };
        job_queue.publish_progress(&final_message).await
    }

    fn register(&self, job_id: Uuid, cancel: Arc<AtomicBool>) {
        match self.running.lock() {
            Ok(mut running) => {
                running.insert(job_id, cancel);
            }
            Err(_) => warn!("Running job registry poisoned; job {} cannot be cancelled", job_id),
        }
    }

    fn unregister(&self, job_id: Uuid) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&job_id);
        }
    }

}

/// Signal every running job to stop before persisting
fn cancel_all(running: &RunningJobs) {
    if let Ok(running) = running.lock() {
        for (job_id, cancel) in running.iter() {
            info!("Cancelling job {}", job_id);
            cancel.store(true, Ordering::SeqCst);
        }
    }
}

/// Cancel running jobs and wait for each to publish its final status
async fn drain_jobs(running: &RunningJobs, jobs: &mut JoinSet<()>) {
    if jobs.is_empty() {
        return;
    }
    info!("Waiting for {} running jobs", jobs.len());
    cancel_all(running);
    while let Some(joined) = jobs.join_next().await {
        if let Err(e) = joined {
            error!("Job task aborted: {}", e);
        }
    }
}
