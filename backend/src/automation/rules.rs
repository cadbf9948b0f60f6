// Rule definitions - flat IF/THEN pairs with one trigger and one action.
//
// The admin UI speaks in (trigger_type, trigger_config) / (action_type,
// action_config) pairs of tag + free-form JSON. Those are parsed into the
// typed unions below at the store boundary; an invalid combination is
// rejected at write time and never reaches the matcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{validation_error, ApiResult};
use crate::validation::string;

use super::events::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    AssignUser,
    AddTag,
    CreateTask,
    Notification,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::AssignUser => "assign_user",
            Self::AddTag => "add_tag",
            Self::CreateTask => "create_task",
            Self::Notification => "notification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send_email" => Some(Self::SendEmail),
            "assign_user" => Some(Self::AssignUser),
            "add_tag" => Some(Self::AddTag),
            "create_task" => Some(Self::CreateTask),
            "notification" => Some(Self::Notification),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger variants, one payload shape per `trigger_type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// `from` unset means "any prior state".
    StatusChange { from: Option<String>, to: String },
    TagAdded { tag_name: String },
    /// Fires when a lead has been inactive for `days` (>= 1).
    TimeBased { days: i64 },
    EntityCreated,
}

impl Trigger {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StatusChange { .. } => EventKind::StatusChange,
            Self::TagAdded { .. } => EventKind::TagAdded,
            Self::TimeBased { .. } => EventKind::TimeBased,
            Self::EntityCreated => EventKind::EntityCreated,
        }
    }

    /// Parse and validate a (tag, config) pair. Errors name the offending
    /// field so the rule editor can highlight it.
    pub fn from_parts(kind: EventKind, config: &serde_json::Value) -> ApiResult<Self> {
        match kind {
            EventKind::StatusChange => {
                let to = require_str(config, "to", "trigger_config.to")?;
                let from = optional_str(config, "from", "trigger_config.from")?;
                Ok(Self::StatusChange { from, to })
            }
            EventKind::TagAdded => {
                let tag_name = require_str(config, "tag_name", "trigger_config.tag_name")?;
                Ok(Self::TagAdded { tag_name })
            }
            EventKind::TimeBased => {
                let days = config
                    .get("days")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| {
                        validation_error("trigger_config.days", "days must be an integer")
                    })?;
                if days < 1 {
                    return Err(validation_error("trigger_config.days", "days must be >= 1"));
                }
                Ok(Self::TimeBased { days })
            }
            EventKind::EntityCreated => Ok(Self::EntityCreated),
        }
    }

    /// Canonical JSON payload for storage and the wire.
    pub fn config_json(&self) -> serde_json::Value {
        match self {
            Self::StatusChange { from, to } => serde_json::json!({ "from": from, "to": to }),
            Self::TagAdded { tag_name } => serde_json::json!({ "tag_name": tag_name }),
            Self::TimeBased { days } => serde_json::json!({ "days": days }),
            Self::EntityCreated => serde_json::json!({}),
        }
    }
}

/// Action variants, one payload shape per `action_type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    SendEmail { template: String },
    AssignUser { user_id: Uuid },
    AddTag { tag_name: String },
    CreateTask { title: String },
    Notification { message: String },
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SendEmail { .. } => ActionKind::SendEmail,
            Self::AssignUser { .. } => ActionKind::AssignUser,
            Self::AddTag { .. } => ActionKind::AddTag,
            Self::CreateTask { .. } => ActionKind::CreateTask,
            Self::Notification { .. } => ActionKind::Notification,
        }
    }

    pub fn from_parts(kind: ActionKind, config: &serde_json::Value) -> ApiResult<Self> {
        match kind {
            ActionKind::SendEmail => {
                let template = require_str(config, "template", "action_config.template")?;
                Ok(Self::SendEmail { template })
            }
            ActionKind::AssignUser => {
                let raw = require_str(config, "user_id", "action_config.user_id")?;
                let user_id = raw.parse::<Uuid>().map_err(|_| {
                    validation_error("action_config.user_id", "user_id must be a valid UUID")
                })?;
                Ok(Self::AssignUser { user_id })
            }
            ActionKind::AddTag => {
                let tag_name = require_str(config, "tag_name", "action_config.tag_name")?;
                Ok(Self::AddTag { tag_name })
            }
            ActionKind::CreateTask => {
                let title = require_str(config, "title", "action_config.title")?;
                Ok(Self::CreateTask { title })
            }
            ActionKind::Notification => {
                let message = require_str(config, "message", "action_config.message")?;
                Ok(Self::Notification { message })
            }
        }
    }

    pub fn config_json(&self) -> serde_json::Value {
        match self {
            Self::SendEmail { template } => serde_json::json!({ "template": template }),
            Self::AssignUser { user_id } => serde_json::json!({ "user_id": user_id }),
            Self::AddTag { tag_name } => serde_json::json!({ "tag_name": tag_name }),
            Self::CreateTask { title } => serde_json::json!({ "title": title }),
            Self::Notification { message } => serde_json::json!({ "message": message }),
        }
    }
}

/// A stored trigger+action pair with an active flag.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub trigger: Trigger,
    pub action: ActionSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Rule {
    pub fn to_wire(&self) -> leadflow_shared::AutomationRule {
        leadflow_shared::AutomationRule {
            id: self.id,
            name: self.name.clone(),
            is_active: self.is_active,
            trigger_type: self.trigger.kind().as_str().to_string(),
            trigger_config: self.trigger.config_json(),
            action_type: self.action.kind().as_str().to_string(),
            action_config: self.action.config_json(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Apply a partial patch, re-validating whatever it touches.
    pub fn apply_patch(&self, patch: &RulePatch) -> ApiResult<Rule> {
        let mut updated = self.clone();

        if let Some(name) = &patch.name {
            updated.name = string::required(&Some(name.clone()), "name")?;
        }
        if let Some(active) = patch.is_active {
            updated.is_active = active;
        }

        if patch.trigger_type.is_some() || patch.trigger_config.is_some() {
            let kind = match &patch.trigger_type {
                Some(raw) => EventKind::parse(raw)
                    .ok_or_else(|| validation_error("trigger_type", "unknown trigger type"))?,
                None => self.trigger.kind(),
            };
            let config = patch
                .trigger_config
                .clone()
                .unwrap_or_else(|| self.trigger.config_json());
            updated.trigger = Trigger::from_parts(kind, &config)?;
        }

        if patch.action_type.is_some() || patch.action_config.is_some() {
            let kind = match &patch.action_type {
                Some(raw) => ActionKind::parse(raw)
                    .ok_or_else(|| validation_error("action_type", "unknown action type"))?,
                None => self.action.kind(),
            };
            let config = patch
                .action_config
                .clone()
                .unwrap_or_else(|| self.action.config_json());
            updated.action = ActionSpec::from_parts(kind, &config)?;
        }

        Ok(updated)
    }
}

/// A validated rule definition, ready to persist.
#[derive(Debug, Clone)]
pub struct RuleDraft {
    pub name: String,
    pub is_active: bool,
    pub trigger: Trigger,
    pub action: ActionSpec,
}

impl RuleDraft {
    pub fn from_wire(
        name: &Option<String>,
        is_active: bool,
        trigger_type: &Option<String>,
        trigger_config: &serde_json::Value,
        action_type: &Option<String>,
        action_config: &serde_json::Value,
    ) -> ApiResult<Self> {
        let name = string::required(name, "name")?;
        string::max_length(&Some(name.clone()), "name", 200)?;

        let trigger_kind = trigger_type
            .as_deref()
            .and_then(EventKind::parse)
            .ok_or_else(|| validation_error("trigger_type", "unknown trigger type"))?;
        let action_kind = action_type
            .as_deref()
            .and_then(ActionKind::parse)
            .ok_or_else(|| validation_error("action_type", "unknown action type"))?;

        Ok(Self {
            name,
            is_active,
            trigger: Trigger::from_parts(trigger_kind, trigger_config)?,
            action: ActionSpec::from_parts(action_kind, action_config)?,
        })
    }
}

/// Partial patch as sent by `PUT /automation/rules/{id}`. The power toggle
/// sends just `{is_active}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub trigger_type: Option<String>,
    pub trigger_config: Option<serde_json::Value>,
    pub action_type: Option<String>,
    pub action_config: Option<serde_json::Value>,
}

fn require_str(config: &serde_json::Value, key: &str, field: &str) -> ApiResult<String> {
    match config.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(_) => Err(validation_error(field, "cannot be empty")),
        None => Err(validation_error(field, "is required")),
    }
}

fn optional_str(
    config: &serde_json::Value,
    key: &str,
    field: &str,
) -> ApiResult<Option<String>> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
            Ok(Some(s.trim().to_string()))
        }
        Some(serde_json::Value::String(_)) => Err(validation_error(field, "cannot be empty")),
        Some(_) => Err(validation_error(field, "must be a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_trigger_parse_and_round_trip() {
        let trigger = Trigger::from_parts(
            EventKind::StatusChange,
            &serde_json::json!({ "from": "new", "to": "qualified" }),
        )
        .unwrap();
        assert_eq!(
            trigger,
            Trigger::StatusChange {
                from: Some("new".to_string()),
                to: "qualified".to_string()
            }
        );
        assert_eq!(
            Trigger::from_parts(EventKind::StatusChange, &trigger.config_json()).unwrap(),
            trigger
        );

        // "any prior state" via absent or null from
        let any_from = Trigger::from_parts(
            EventKind::StatusChange,
            &serde_json::json!({ "to": "qualified", "from": null }),
        )
        .unwrap();
        assert_eq!(
            any_from,
            Trigger::StatusChange {
                from: None,
                to: "qualified".to_string()
            }
        );
    }

    #[test]
    fn test_empty_to_is_rejected() {
        let err = Trigger::from_parts(
            EventKind::StatusChange,
            &serde_json::json!({ "to": "" }),
        )
        .unwrap_err();

        match err {
            AppError::ValidationError { details } => {
                assert!(details.contains_key("trigger_config.to"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_time_based_requires_integer_days() {
        assert!(Trigger::from_parts(EventKind::TimeBased, &serde_json::json!({ "days": 3 })).is_ok());
        assert!(
            Trigger::from_parts(EventKind::TimeBased, &serde_json::json!({ "days": 0 })).is_err()
        );
        assert!(
            Trigger::from_parts(EventKind::TimeBased, &serde_json::json!({ "days": "3" })).is_err()
        );
        assert!(Trigger::from_parts(EventKind::TimeBased, &serde_json::json!({})).is_err());
    }

    #[test]
    fn test_action_parse() {
        let action = ActionSpec::from_parts(
            ActionKind::SendEmail,
            &serde_json::json!({ "template": "welcome" }),
        )
        .unwrap();
        assert_eq!(action.kind(), ActionKind::SendEmail);

        assert!(ActionSpec::from_parts(
            ActionKind::AssignUser,
            &serde_json::json!({ "user_id": "not-a-uuid" })
        )
        .is_err());
        assert!(
            ActionSpec::from_parts(ActionKind::Notification, &serde_json::json!({})).is_err()
        );
    }

    #[test]
    fn test_draft_requires_known_tags() {
        let err = RuleDraft::from_wire(
            &Some("Escalate".to_string()),
            true,
            &Some("invoice_overdue".to_string()),
            &serde_json::json!({}),
            &Some("send_email".to_string()),
            &serde_json::json!({ "template": "welcome" }),
        )
        .unwrap_err();

        match err {
            AppError::ValidationError { details } => {
                assert!(details.contains_key("trigger_type"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_patch_revalidates_config() {
        let rule = Rule {
            id: Uuid::new_v4(),
            name: "Welcome qualified leads".to_string(),
            is_active: true,
            trigger: Trigger::StatusChange {
                from: None,
                to: "qualified".to_string(),
            },
            action: ActionSpec::SendEmail {
                template: "welcome".to_string(),
            },
            created_at: Utc::now(),
            updated_at: None,
        };

        // Toggle-only patch leaves everything else intact
        let patched = rule
            .apply_patch(&RulePatch {
                is_active: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert!(!patched.is_active);
        assert_eq!(patched.trigger, rule.trigger);

        // Patching the config alone re-validates against the existing tag
        let bad = rule.apply_patch(&RulePatch {
            trigger_config: Some(serde_json::json!({ "to": "" })),
            ..Default::default()
        });
        assert!(bad.is_err());

        // Changing the trigger type requires a config matching the new tag
        let retyped = rule
            .apply_patch(&RulePatch {
                trigger_type: Some("time_based".to_string()),
                trigger_config: Some(serde_json::json!({ "days": 5 })),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(retyped.trigger, Trigger::TimeBased { days: 5 });
    }
}
