// Execution ledger - append-mostly record of (rule, event) outcomes.
//
// The UNIQUE (rule_id, event_id) constraint is the engine's sole
// concurrency-control primitive: whoever wins the pending insert owns the
// dispatch, everyone else gets the existing row back as a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The at-most-once ledger entry for a (rule, event) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    pub rule_id: Uuid,
    pub event_id: Uuid,
    pub status: ExecutionStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn pending(rule_id: Uuid, event_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            rule_id,
            event_id,
            status: ExecutionStatus::Pending,
            attempts: 0,
            last_error: None,
            started_at: now,
            finished_at: None,
        }
    }

    pub fn to_wire(&self) -> leadflow_shared::ExecutionSummary {
        leadflow_shared::ExecutionSummary {
            rule_id: self.rule_id,
            event_id: self.event_id,
            status: self.status.as_str().to_string(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Outcome of attempting to claim a (rule, event) pair.
#[derive(Debug)]
pub enum LedgerEntry {
    /// The pair was unclaimed; the caller now owns the dispatch.
    Inserted(ExecutionRecord),
    /// Somebody already claimed it; returned unchanged, caller must no-op.
    Existing(ExecutionRecord),
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LedgerStats {
    pub count: i64,
    pub by_status: HashMap<String, i64>,
}

#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Insert a pending record under the uniqueness constraint, or return
    /// the existing record untouched.
    async fn begin(
        &self,
        rule_id: Uuid,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, EngineError>;

    async fn exists(&self, rule_id: Uuid, event_id: Uuid) -> Result<bool, EngineError>;

    /// Advance status/attempts of an existing record. Records are never
    /// deleted by normal operation.
    async fn update(&self, record: &ExecutionRecord) -> Result<(), EngineError>;

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<LedgerStats, EngineError>;

    /// Recent records for the audit/admin read surface.
    async fn recent(
        &self,
        limit: i64,
        rule_id: Option<Uuid>,
    ) -> Result<Vec<ExecutionRecord>, EngineError>;
}

const RECORD_COLUMNS: &str =
    "rule_id, event_id, status, attempts, last_error, started_at, finished_at";

pub struct PgExecutionLedger {
    pool: PgPool,
}

impl PgExecutionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLedger for PgExecutionLedger {
    async fn begin(
        &self,
        rule_id: Uuid,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, EngineError> {
        let inserted: Option<ExecutionRecord> = sqlx::query_as(&format!(
            r#"
            INSERT INTO automation_executions (rule_id, event_id, status, attempts, started_at)
            VALUES ($1, $2, 'pending', 0, $3)
            ON CONFLICT (rule_id, event_id) DO NOTHING
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(rule_id)
        .bind(event_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = inserted {
            return Ok(LedgerEntry::Inserted(record));
        }

        // Lost the race (or a replay): the row is guaranteed to exist now.
        let existing: ExecutionRecord = sqlx::query_as(&format!(
            "SELECT {} FROM automation_executions WHERE rule_id = $1 AND event_id = $2",
            RECORD_COLUMNS
        ))
        .bind(rule_id)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerEntry::Existing(existing))
    }

    async fn exists(&self, rule_id: Uuid, event_id: Uuid) -> Result<bool, EngineError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM automation_executions WHERE rule_id = $1 AND event_id = $2)",
        )
        .bind(rule_id)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(found)
    }

    async fn update(&self, record: &ExecutionRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE automation_executions
            SET status = $3, attempts = $4, last_error = $5, finished_at = $6
            WHERE rule_id = $1 AND event_id = $2
            "#,
        )
        .bind(record.rule_id)
        .bind(record.event_id)
        .bind(record.status)
        .bind(record.attempts)
        .bind(&record.last_error)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<LedgerStats, EngineError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status::TEXT, COUNT(*)
            FROM automation_executions
            WHERE started_at >= $1
            GROUP BY status
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = LedgerStats::default();
        for (status, count) in rows {
            stats.count += count;
            stats.by_status.insert(status, count);
        }
        Ok(stats)
    }

    async fn recent(
        &self,
        limit: i64,
        rule_id: Option<Uuid>,
    ) -> Result<Vec<ExecutionRecord>, EngineError> {
        let records: Vec<ExecutionRecord> = match rule_id {
            Some(rule_id) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM automation_executions WHERE rule_id = $1 \
                     ORDER BY started_at DESC LIMIT $2",
                    RECORD_COLUMNS
                ))
                .bind(rule_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM automation_executions ORDER BY started_at DESC LIMIT $1",
                    RECORD_COLUMNS
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }
}
