// Action handlers - pluggable per action type, one shared contract.
//
// The dispatcher contains no delivery logic; every effect goes through an
// ActionHandler looked up by tag in the registry. Handlers classify their
// failures: transient ones are retried with backoff, permanent ones are not.

pub mod crm;
pub mod email;

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::services::EmailService;

use super::events::Event;
use super::rules::{ActionKind, ActionSpec};

#[derive(Debug, Error)]
pub enum ActionError {
    /// Downstream hiccup (timeout, connection, busy database); worth retrying.
    #[error("transient action failure: {0}")]
    Transient(String),
    /// Unsatisfiable config discovered at execution time; retrying cannot help.
    #[error("permanent action failure: {0}")]
    Permanent(String),
}

impl ActionError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, config: &ActionSpec, event: &Event) -> Result<(), ActionError>;
}

/// Lookup table mapping action tags to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// The full production wiring: all five built-in handlers.
    pub fn production(pool: PgPool, email_service: EmailService) -> Self {
        let mut registry = Self::new();
        registry.register(
            ActionKind::SendEmail,
            Arc::new(email::SendEmailHandler::new(pool.clone(), email_service)),
        );
        registry.register(
            ActionKind::AssignUser,
            Arc::new(crm::AssignUserHandler::new(pool.clone())),
        );
        registry.register(
            ActionKind::AddTag,
            Arc::new(crm::AddTagHandler::new(pool.clone())),
        );
        registry.register(
            ActionKind::CreateTask,
            Arc::new(crm::CreateTaskHandler::new(pool.clone())),
        );
        registry.register(
            ActionKind::Notification,
            Arc::new(crm::NotificationHandler::new(pool)),
        );
        registry
    }
}

/// Replace `{{field}}` placeholders with values from a JSON object.
/// Unknown placeholders are left in place.
pub fn render_template(template: &str, vars: &serde_json::Value) -> String {
    let re = regex::Regex::new(r"\{\{([^}]+)\}\}").expect("static pattern");
    let mut result = template.to_string();

    for cap in re.captures_iter(template) {
        let path = cap[1].trim();
        if let Some(value) = get_nested_value(vars, path) {
            let replacement = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            result = result.replace(&cap[0], &replacement);
        }
    }

    result
}

fn get_nested_value(json: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = json;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}
