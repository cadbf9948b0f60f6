// Rule store - durable CRUD for rule definitions, the single owner of the
// rule lifecycle. The matcher reads activation state fresh from here; no
// other component writes rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use super::events::EventKind;
use super::rules::{ActionKind, ActionSpec, Rule, RuleDraft, Trigger};
use super::EngineError;

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create(&self, draft: RuleDraft) -> Result<Rule, EngineError>;

    /// Persist an already-validated rule over its stored version (patches
    /// are validated with `Rule::apply_patch` before reaching the store).
    /// Stamps `updated_at`.
    async fn save(&self, rule: Rule) -> Result<Rule, EngineError>;

    async fn delete(&self, id: Uuid) -> Result<(), EngineError>;

    /// Flip the power toggle; returns the rule as persisted.
    async fn toggle_active(&self, id: Uuid) -> Result<Rule, EngineError>;

    async fn get(&self, id: Uuid) -> Result<Rule, EngineError>;

    async fn list(&self) -> Result<Vec<Rule>, EngineError>;

    /// Active rules, optionally narrowed to one trigger kind. This is the
    /// matcher's hot read path.
    async fn list_active(&self, kind: Option<EventKind>) -> Result<Vec<Rule>, EngineError>;

    async fn count_active(&self) -> Result<i64, EngineError>;
}

type RuleRow = (
    Uuid,                  // id
    String,                // name
    bool,                  // is_active
    String,                // trigger_type
    serde_json::Value,     // trigger_config
    String,                // action_type
    serde_json::Value,     // action_config
    DateTime<Utc>,         // created_at
    Option<DateTime<Utc>>, // updated_at
);

const RULE_COLUMNS: &str =
    "id, name, is_active, trigger_type, trigger_config, action_type, action_config, \
     created_at, updated_at";

pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Rows are validated at write time, so a row that fails to parse here
    /// means out-of-band tampering; it is logged and excluded rather than
    /// poisoning the whole listing.
    fn from_row(row: RuleRow) -> Option<Rule> {
        let (
            id,
            name,
            is_active,
            trigger_type,
            trigger_config,
            action_type,
            action_config,
            created_at,
            updated_at,
        ) = row;

        let trigger = EventKind::parse(&trigger_type)
            .and_then(|k| Trigger::from_parts(k, &trigger_config).ok());
        let action = ActionKind::parse(&action_type)
            .and_then(|k| ActionSpec::from_parts(k, &action_config).ok());

        match trigger.zip(action) {
            Some((trigger, action)) => Some(Rule {
                id,
                name,
                is_active,
                trigger,
                action,
                created_at,
                updated_at,
            }),
            None => {
                warn!("Skipping unparseable automation rule {}", id);
                None
            }
        }
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn create(&self, draft: RuleDraft) -> Result<Rule, EngineError> {
        let rule = Rule {
            id: Uuid::new_v4(),
            name: draft.name,
            is_active: draft.is_active,
            trigger: draft.trigger,
            action: draft.action,
            created_at: Utc::now(),
            updated_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO automation_rules
            (id, name, is_active, trigger_type, trigger_config, action_type, action_config, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.is_active)
        .bind(rule.trigger.kind().as_str())
        .bind(rule.trigger.config_json())
        .bind(rule.action.kind().as_str())
        .bind(rule.action.config_json())
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;

        Ok(rule)
    }

    async fn save(&self, mut rule: Rule) -> Result<Rule, EngineError> {
        rule.updated_at = Some(Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE automation_rules
            SET name = $2, is_active = $3, trigger_type = $4, trigger_config = $5,
                action_type = $6, action_config = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.is_active)
        .bind(rule.trigger.kind().as_str())
        .bind(rule.trigger.config_json())
        .bind(rule.action.kind().as_str())
        .bind(rule.action.config_json())
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RuleNotFound(rule.id));
        }
        Ok(rule)
    }

    async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::RuleNotFound(id));
        }
        Ok(())
    }

    async fn toggle_active(&self, id: Uuid) -> Result<Rule, EngineError> {
        let row: Option<RuleRow> = sqlx::query_as(&format!(
            "UPDATE automation_rules SET is_active = NOT is_active, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            RULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.and_then(Self::from_row)
            .ok_or(EngineError::RuleNotFound(id))
    }

    async fn get(&self, id: Uuid) -> Result<Rule, EngineError> {
        let row: Option<RuleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM automation_rules WHERE id = $1",
            RULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.and_then(Self::from_row)
            .ok_or(EngineError::RuleNotFound(id))
    }

    async fn list(&self) -> Result<Vec<Rule>, EngineError> {
        let rows: Vec<RuleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM automation_rules ORDER BY created_at DESC",
            RULE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(Self::from_row).collect())
    }

    async fn list_active(&self, kind: Option<EventKind>) -> Result<Vec<Rule>, EngineError> {
        let rows: Vec<RuleRow> = match kind {
            Some(kind) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM automation_rules \
                     WHERE is_active = true AND trigger_type = $1 ORDER BY created_at",
                    RULE_COLUMNS
                ))
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM automation_rules WHERE is_active = true ORDER BY created_at",
                    RULE_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().filter_map(Self::from_row).collect())
    }

    async fn count_active(&self) -> Result<i64, EngineError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM automation_rules WHERE is_active = true")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}
