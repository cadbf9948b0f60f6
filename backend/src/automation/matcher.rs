// Rule matcher - selects the active rules whose trigger matches an event.
//
// Matching is pure and side-effect-free: it never mutates rule or event
// state, and it decides on event content alone. All matching rules are
// returned as unordered, independent fan-out; there is no priority order.

use std::sync::Arc;

use super::events::Event;
use super::rules::{Rule, Trigger};
use super::store::RuleStore;
use super::EngineError;

/// Pure trigger semantics, per trigger type.
pub fn trigger_matches(trigger: &Trigger, event: &Event) -> bool {
    if trigger.kind() != event.kind {
        return false;
    }

    match trigger {
        Trigger::StatusChange { from, to } => {
            let to_matches = event.payload_str("to") == Some(to.as_str());
            let from_matches = match from {
                // Unset means "any prior state"
                None => true,
                Some(from) => event.payload_str("from") == Some(from.as_str()),
            };
            to_matches && from_matches
        }
        Trigger::TagAdded { tag_name } => {
            event.payload_str("tag_name") == Some(tag_name.as_str())
        }
        // The scanner already applied the threshold; equality keeps a rule
        // from re-firing at every later scan once the threshold is crossed.
        // Re-firing is the ledger's concern, not the matcher's.
        Trigger::TimeBased { days } => event.payload_i64("idle_days") == Some(*days),
        Trigger::EntityCreated => true,
    }
}

#[derive(Clone)]
pub struct RuleMatcher {
    rules: Arc<dyn RuleStore>,
}

impl RuleMatcher {
    pub fn new(rules: Arc<dyn RuleStore>) -> Self {
        Self { rules }
    }

    /// Active rules matching the event. Activation state is read fresh from
    /// the store on every call, so a toggled rule is picked up (or dropped)
    /// immediately by subsequent events.
    pub async fn match_event(&self, event: &Event) -> Result<Vec<Rule>, EngineError> {
        let candidates = self.rules.list_active(Some(event.kind)).await?;

        Ok(candidates
            .into_iter()
            .filter(|rule| trigger_matches(&rule.trigger, event))
            .collect())
    }
}
