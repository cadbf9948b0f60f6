// Job scheduler - central scheduler for the engine's background jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use crate::automation::EngineError;

use super::idle_scanner::IdleScannerJob;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Engine error: {0}")]
    EngineError(#[from] EngineError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Completed,
    Failed,
    PartialFailure,
    Skipped,
}

pub struct AutomationScheduler {
    scheduler: TokioScheduler,
    scanner: Arc<IdleScannerJob>,
    scan_interval_minutes: u32,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl AutomationScheduler {
    pub async fn new(scanner: Arc<IdleScannerJob>, scan_interval_minutes: u32) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            scanner,
            scan_interval_minutes,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_idle_scanner().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_idle_scanner(&self) -> JobResult<()> {
        let interval = self.scan_interval_minutes;
        // Six-field cron; minute fields only go to 59, so hour-or-longer
        // intervals move to the hours field.
        let cron_expr = if interval < 60 {
            format!("0 */{} * * * *", interval)
        } else {
            format!("0 0 */{} * * *", (interval / 60).max(1))
        };

        let scanner = self.scanner.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let scanner = scanner.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let log_id = Uuid::new_v4();
                let started_at = Utc::now();

                info!("Running idle trigger scan");

                match scanner.run(started_at).await {
                    Ok(outcome) => {
                        let completed_at = Utc::now();
                        let duration = (completed_at - started_at).num_milliseconds();

                        let status = if outcome.skipped {
                            JobStatus::Skipped
                        } else if outcome.errors.is_empty() {
                            JobStatus::Completed
                        } else {
                            JobStatus::PartialFailure
                        };

                        let log = JobExecutionLog {
                            id: log_id,
                            job_name: "Idle Trigger Scanner".to_string(),
                            started_at,
                            completed_at: Some(completed_at),
                            status,
                            items_processed: outcome.events_synthesized as i32,
                            errors: outcome.errors,
                            duration_ms: Some(duration),
                        };

                        let mut logs = logs.write().await;
                        logs.push(log);
                        // Keep only the last 100 runs
                        if logs.len() > 100 {
                            logs.remove(0);
                        }
                    }
                    Err(e) => {
                        error!("Idle trigger scan failed: {}", e);

                        let mut logs = logs.write().await;
                        logs.push(JobExecutionLog {
                            id: log_id,
                            job_name: "Idle Trigger Scanner".to_string(),
                            started_at,
                            completed_at: Some(Utc::now()),
                            status: JobStatus::Failed,
                            items_processed: 0,
                            errors: vec![e.to_string()],
                            duration_ms: None,
                        });
                        if logs.len() > 100 {
                            logs.remove(0);
                        }
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!(
            "Scheduled idle trigger scanner to run every {} minutes",
            interval
        );

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    pub async fn run_job_now(&self, job_name: &str) -> JobResult<()> {
        match job_name {
            "idle_scanner" => {
                self.scanner.run(Utc::now()).await?;
            }
            _ => return Err(JobError::ConfigError(format!("Unknown job: {}", job_name))),
        }

        Ok(())
    }
}
