// Canonical events - the unit of matching and deduplication

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::EngineError;

/// Vocabulary shared by events and rule triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusChange,
    TagAdded,
    TimeBased,
    EntityCreated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::TagAdded => "tag_added",
            Self::TimeBased => "time_based",
            Self::EntityCreated => "entity_created",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status_change" => Some(Self::StatusChange),
            "tag_added" => Some(Self::TagAdded),
            "time_based" => Some(Self::TimeBased),
            "entity_created" => Some(Self::EntityCreated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain occurrence as pushed by external collaborators (status-change,
/// tag-mutation and creation notifications). `occurred_at` is a client hint
/// only; the canonical timestamp is always assigned server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOccurrence {
    #[serde(rename = "type")]
    pub kind: String,
    pub entity_id: Option<Uuid>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum MalformedEventError {
    #[error("unknown occurrence type '{0}'")]
    UnknownType(String),
    #[error("occurrence is missing entity_id")]
    MissingEntityId,
}

/// A canonical, immutable record of something that happened to a CRM entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub entity_id: Uuid,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, entity_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity_id,
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Normalize a raw occurrence into a canonical event. The only
    /// validation performed here is shape validation; whether any rule cares
    /// about the event is the matcher's job.
    pub fn from_occurrence(raw: RawOccurrence) -> Result<Self, MalformedEventError> {
        let kind = EventKind::parse(&raw.kind)
            .ok_or_else(|| MalformedEventError::UnknownType(raw.kind.clone()))?;
        let entity_id = raw.entity_id.ok_or(MalformedEventError::MissingEntityId)?;

        Ok(Self::new(kind, entity_id, raw.payload))
    }

    /// Create a lead status changed event
    pub fn status_change(entity_id: Uuid, from: &str, to: &str) -> Self {
        Self::new(
            EventKind::StatusChange,
            entity_id,
            serde_json::json!({ "from": from, "to": to }),
        )
    }

    /// Create a tag added event
    pub fn tag_added(entity_id: Uuid, tag_name: &str) -> Self {
        Self::new(
            EventKind::TagAdded,
            entity_id,
            serde_json::json!({ "tag_name": tag_name }),
        )
    }

    /// Create a lead created event
    pub fn entity_created(entity_id: Uuid) -> Self {
        Self::new(EventKind::EntityCreated, entity_id, serde_json::json!({}))
    }

    /// Synthesize an idle event for a (entity, threshold) pair.
    ///
    /// The id is derived from the daily bucket (entity, days, date), so
    /// every scan within one day regenerates the same event id and the
    /// ledger's (rule_id, event_id) uniqueness suppresses re-dispatch.
    pub fn idle(entity_id: Uuid, days: i64, now: DateTime<Utc>) -> Self {
        let bucket = format!("{}:{}:{}", entity_id, days, now.date_naive());
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, bucket.as_bytes()),
            kind: EventKind::TimeBased,
            entity_id,
            payload: serde_json::json!({ "idle_days": days }),
            occurred_at: now,
        }
    }

    /// Payload field as a string, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Payload field as an integer, if present.
    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(|v| v.as_i64())
    }
}

/// Persistence seam for events and entity activity tracking.
///
/// Events are append-only; `record` is idempotent on the event id so the
/// scanner can re-submit the same daily bucket without error. Activity is
/// bumped only for real occurrences - synthesized idle events do not count
/// as activity, otherwise an entity would stop being idle by virtue of
/// being noticed.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record(&self, event: &Event) -> Result<(), EngineError>;

    async fn touch_activity(&self, entity_id: Uuid, at: DateTime<Utc>) -> Result<(), EngineError>;

    /// Entities whose last activity is at or before `cutoff`.
    async fn idle_entities(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, EngineError>;
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn record(&self, event: &Event) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO automation_events (id, event_type, entity_id, payload, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.kind.as_str())
        .bind(event.entity_id)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_activity(&self, entity_id: Uuid, at: DateTime<Utc>) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE leads SET last_activity_at = GREATEST(last_activity_at, $2) WHERE id = $1",
        )
        .bind(entity_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn idle_entities(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, EngineError> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM leads WHERE last_activity_at <= $1 ORDER BY id")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
