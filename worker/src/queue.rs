// ==============================================================================
// queue.rs - Redis Job Queue Management (Worker Side)
// ==============================================================================
// Description: Consumes sample stats jobs from Redis and publishes progress
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use variant_storage::stats::StatsProgress;

pub const QUEUE_KEY: &str = "variant:stats_queue";
const PROGRESS_PREFIX: &str = "variant:stats_progress";

fn default_samples() -> String {
    "auto".to_string()
}

/// Job payload pushed by producers onto `QUEUE_KEY`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsJobPayload {
    pub job_id: Uuid,
    pub study: String,

    /// `all`, `auto`, or comma-separated sample names
    #[serde(default = "default_samples")]
    pub samples: String,

    /// Overrides the worker's default database
    #[serde(default)]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Message published on a job's progress channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub tasks_done: usize,
    pub tasks_total: usize,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressMessage {
    pub fn new(job_id: Uuid, status: JobStatus, progress: StatsProgress, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            tasks_done: progress.tasks_done,
            tasks_total: progress.tasks_total,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

pub fn progress_channel(job_id: Uuid) -> String {
    format!("{}:{}", PROGRESS_PREFIX, job_id)
}

/// Job queue client
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Blocking pop with a one second timeout
    pub async fn dequeue(&mut self) -> Result<Option<StatsJobPayload>> {
        let result: Option<(String, String)> = self
            .conn
            .brpop(QUEUE_KEY, 1.0)
            .await
            .context("Failed to dequeue job from Redis")?;

        match result {
            Some((_key, payload_json)) => {
                let payload: StatsJobPayload = serde_json::from_str(&payload_json)
                    .context("Failed to deserialize job payload")?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    pub async fn publish_progress(&mut self, progress: &ProgressMessage) -> Result<()> {
        let channel = progress_channel(progress.job_id);
        let message = serde_json::to_string(progress).context("Failed to serialize progress")?;

        self.conn
            .publish::<_, _, ()>(&channel, message)
            .await
            .context("Failed to publish progress")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults() {
        let payload: StatsJobPayload = serde_json::from_str(
            r#"{"job_id":"6f1c2a9e-2d7e-4a36-9b0f-3f0e5c1d2b11","study":"trio"}"#,
        )
        .unwrap();
        assert_eq!(payload.study, "trio");
        assert_eq!(payload.samples, "auto");
        assert!(payload.db_path.is_none());
    }

    #[test]
    fn test_progress_channel_and_message() {
        let job_id = Uuid::new_v4();
        assert_eq!(progress_channel(job_id), format!("variant:stats_progress:{}", job_id));

        let msg = ProgressMessage::new(
            job_id,
            JobStatus::Running,
            StatsProgress { tasks_done: 2, tasks_total: 8 },
            "2/8 partitions",
        );
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["tasks_done"], 2);
        assert_eq!(json["tasks_total"], 8);
    }
}
