// CRM-side actions: assignment, tagging, tasks and in-app notifications.
// Each writes through the lead tables the same way the web API does.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::super::events::Event;
use super::super::rules::ActionSpec;
use super::{render_template, ActionError, ActionHandler};

fn db_err(context: &str, err: sqlx::Error) -> ActionError {
    ActionError::transient(format!("{}: {}", context, err))
}

pub struct AssignUserHandler {
    pool: PgPool,
}

impl AssignUserHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionHandler for AssignUserHandler {
    async fn execute(&self, config: &ActionSpec, event: &Event) -> Result<(), ActionError> {
        let ActionSpec::AssignUser { user_id } = config else {
            return Err(ActionError::permanent("assign_user handler got a foreign config"));
        };

        let result = sqlx::query(
            "UPDATE leads SET assigned_to = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(event.entity_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("lead assignment failed", e))?;

        if result.rows_affected() == 0 {
            return Err(ActionError::permanent(format!(
                "lead {} does not exist",
                event.entity_id
            )));
        }
        Ok(())
    }
}

pub struct AddTagHandler {
    pool: PgPool,
}

impl AddTagHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionHandler for AddTagHandler {
    async fn execute(&self, config: &ActionSpec, event: &Event) -> Result<(), ActionError> {
        let ActionSpec::AddTag { tag_name } = config else {
            return Err(ActionError::permanent("add_tag handler got a foreign config"));
        };

        // Ensure the tag exists, then link it; both steps tolerate replays.
        let tag_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO tags (id, name, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tag_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("tag upsert failed", e))?;

        sqlx::query(
            "INSERT INTO lead_tags (lead_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(event.entity_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("tag link failed", e))?;

        Ok(())
    }
}

pub struct CreateTaskHandler {
    pool: PgPool,
}

impl CreateTaskHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionHandler for CreateTaskHandler {
    async fn execute(&self, config: &ActionSpec, event: &Event) -> Result<(), ActionError> {
        let ActionSpec::CreateTask { title } = config else {
            return Err(ActionError::permanent("create_task handler got a foreign config"));
        };

        let title = render_template(title, &event.payload);

        sqlx::query(
            r#"
            INSERT INTO tasks (id, lead_id, title, completed, created_by_system, created_at)
            VALUES ($1, $2, $3, false, true, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.entity_id)
        .bind(title)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("task insert failed", e))?;

        Ok(())
    }
}

pub struct NotificationHandler {
    pool: PgPool,
}

impl NotificationHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionHandler for NotificationHandler {
    async fn execute(&self, config: &ActionSpec, event: &Event) -> Result<(), ActionError> {
        let ActionSpec::Notification { message } = config else {
            return Err(ActionError::permanent("notification handler got a foreign config"));
        };

        let message = render_template(message, &event.payload);

        // Notify the lead's owner when there is one; otherwise the
        // notification lands in the unassigned inbox (user_id NULL).
        let assigned_to: Option<Uuid> =
            sqlx::query_scalar("SELECT assigned_to FROM leads WHERE id = $1")
                .bind(event.entity_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_err("lead lookup failed", e))?
                .flatten();

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, lead_id, message, read, created_at)
            VALUES ($1, $2, $3, $4, false, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(assigned_to)
        .bind(event.entity_id)
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("notification insert failed", e))?;

        Ok(())
    }
}
