// Automation rule engine
//
// Event-driven automation for the LeadFlow CRM: trigger + action rules
// configured by the admin UI, matched against canonical events and
// dispatched at-most-once per (rule, event) pair.

pub mod actions;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod matcher;
pub mod rules;
pub mod store;

pub use actions::{ActionError, ActionHandler, HandlerRegistry};
pub use dispatcher::{ActionDispatcher, RetryPolicy};
pub use engine::{AutomationEngine, IngestError};
pub use events::{Event, EventKind, EventStore, MalformedEventError, PgEventStore, RawOccurrence};
pub use ledger::{
    ExecutionLedger, ExecutionRecord, ExecutionStatus, LedgerEntry, LedgerStats, PgExecutionLedger,
};
pub use matcher::RuleMatcher;
pub use rules::{ActionKind, ActionSpec, Rule, RuleDraft, RulePatch, Trigger};
pub use store::{PgRuleStore, RuleStore};

use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;

/// Failures inside the engine and its storage seams.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("rule {0} not found")]
    RuleNotFound(Uuid),
    #[error("event queue closed")]
    QueueClosed,
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::RuleNotFound(_) => AppError::NotFound("Rule".to_string()),
            EngineError::Database(e) => AppError::from(e),
            EngineError::QueueClosed => {
                AppError::InternalError("event pipeline is shut down".to_string())
            }
        }
    }
}
