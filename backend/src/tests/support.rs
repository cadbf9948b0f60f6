// In-memory implementations of the engine's storage seams, plus
// instrumented action handlers. The concurrency and idempotency properties
// are exercised against these; the Postgres implementations mirror the same
// contracts on real constraints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::automation::{
    ActionError, ActionHandler, ActionSpec, EngineError, Event, EventKind, EventStore,
    ExecutionLedger, ExecutionRecord, LedgerEntry, LedgerStats, Rule, RuleDraft, RuleStore,
    Trigger,
};

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<HashMap<Uuid, Rule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
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
        self.rules.lock().await.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn save(&self, mut rule: Rule) -> Result<Rule, EngineError> {
        let mut rules = self.rules.lock().await;
        if !rules.contains_key(&rule.id) {
            return Err(EngineError::RuleNotFound(rule.id));
        }
        rule.updated_at = Some(Utc::now());
        rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        self.rules
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::RuleNotFound(id))
    }

    async fn toggle_active(&self, id: Uuid) -> Result<Rule, EngineError> {
        let mut rules = self.rules.lock().await;
        let rule = rules.get_mut(&id).ok_or(EngineError::RuleNotFound(id))?;
        rule.is_active = !rule.is_active;
        rule.updated_at = Some(Utc::now());
        Ok(rule.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Rule, EngineError> {
        self.rules
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::RuleNotFound(id))
    }

    async fn list(&self) -> Result<Vec<Rule>, EngineError> {
        let mut rules: Vec<Rule> = self.rules.lock().await.values().cloned().collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(rules)
    }

    async fn list_active(&self, kind: Option<EventKind>) -> Result<Vec<Rule>, EngineError> {
        let mut rules: Vec<Rule> = self
            .rules
            .lock()
            .await
            .values()
            .filter(|r| r.is_active)
            .filter(|r| kind.map_or(true, |k| r.trigger.kind() == k))
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn count_active(&self) -> Result<i64, EngineError> {
        Ok(self
            .rules
            .lock()
            .await
            .values()
            .filter(|r| r.is_active)
            .count() as i64)
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
    activity: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a lead's last-activity timestamp for scanner tests.
    pub async fn set_activity(&self, entity_id: Uuid, at: DateTime<Utc>) {
        self.activity.lock().await.insert(entity_id, at);
    }

    pub async fn recorded(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record(&self, event: &Event) -> Result<(), EngineError> {
        let mut events = self.events.lock().await;
        if !events.iter().any(|e| e.id == event.id) {
            events.push(event.clone());
        }
        Ok(())
    }

    async fn touch_activity(&self, entity_id: Uuid, at: DateTime<Utc>) -> Result<(), EngineError> {
        let mut activity = self.activity.lock().await;
        let entry = activity.entry(entity_id).or_insert(at);
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }

    async fn idle_entities(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, EngineError> {
        let activity = self.activity.lock().await;
        let mut idle: Vec<Uuid> = activity
            .iter()
            .filter(|(_, at)| **at <= cutoff)
            .map(|(id, _)| *id)
            .collect();
        idle.sort();
        Ok(idle)
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<HashMap<(Uuid, Uuid), ExecutionRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ExecutionRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ExecutionLedger for MemoryLedger {
    async fn begin(
        &self,
        rule_id: Uuid,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, EngineError> {
        let mut records = self.records.lock().await;
        match records.get(&(rule_id, event_id)) {
            Some(existing) => Ok(LedgerEntry::Existing(existing.clone())),
            None => {
                let record = ExecutionRecord::pending(rule_id, event_id, now);
                records.insert((rule_id, event_id), record.clone());
                Ok(LedgerEntry::Inserted(record))
            }
        }
    }

    async fn exists(&self, rule_id: Uuid, event_id: Uuid) -> Result<bool, EngineError> {
        Ok(self
            .records
            .lock()
            .await
            .contains_key(&(rule_id, event_id)))
    }

    async fn update(&self, record: &ExecutionRecord) -> Result<(), EngineError> {
        self.records
            .lock()
            .await
            .insert((record.rule_id, record.event_id), record.clone());
        Ok(())
    }

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<LedgerStats, EngineError> {
        let records = self.records.lock().await;
        let mut stats = LedgerStats::default();
        for record in records.values().filter(|r| r.started_at >= since) {
            stats.count += 1;
            *stats
                .by_status
                .entry(record.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn recent(
        &self,
        limit: i64,
        rule_id: Option<Uuid>,
    ) -> Result<Vec<ExecutionRecord>, EngineError> {
        let records = self.records.lock().await;
        let mut matching: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| rule_id.map_or(true, |id| r.rule_id == id))
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

/// Records every invocation and succeeds.
#[derive(Default)]
pub struct RecordingHandler {
    invocations: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn invocation_count(&self) -> usize {
        self.invocations.lock().await.len()
    }

    pub async fn invocations(&self) -> Vec<Event> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn execute(&self, _config: &ActionSpec, event: &Event) -> Result<(), ActionError> {
        self.invocations.lock().await.push(event.clone());
        Ok(())
    }
}

/// Fails transiently a fixed number of times, then succeeds.
pub struct FlakyHandler {
    failures_remaining: Mutex<usize>,
    invocations: Mutex<usize>,
}

impl FlakyHandler {
    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_remaining: Mutex::new(times),
            invocations: Mutex::new(0),
        })
    }

    pub async fn invocation_count(&self) -> usize {
        *self.invocations.lock().await
    }
}

#[async_trait]
impl ActionHandler for FlakyHandler {
    async fn execute(&self, _config: &ActionSpec, _event: &Event) -> Result<(), ActionError> {
        *self.invocations.lock().await += 1;
        let mut remaining = self.failures_remaining.lock().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ActionError::transient("downstream timeout"));
        }
        Ok(())
    }
}

/// Always fails with the given classification.
pub struct FailingHandler {
    error: fn() -> ActionError,
    invocations: Mutex<usize>,
}

impl FailingHandler {
    pub fn permanent() -> Arc<Self> {
        Arc::new(Self {
            error: || ActionError::permanent("config rejected by collaborator"),
            invocations: Mutex::new(0),
        })
    }

    pub fn transient() -> Arc<Self> {
        Arc::new(Self {
            error: || ActionError::transient("connection refused"),
            invocations: Mutex::new(0),
        })
    }

    pub async fn invocation_count(&self) -> usize {
        *self.invocations.lock().await
    }
}

#[async_trait]
impl ActionHandler for FailingHandler {
    async fn execute(&self, _config: &ActionSpec, _event: &Event) -> Result<(), ActionError> {
        *self.invocations.lock().await += 1;
        Err((self.error)())
    }
}

/// Blocks until released (or forever), to model an in-flight action.
pub struct GatedHandler {
    gate: Notify,
    invocations: Mutex<usize>,
}

impl GatedHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            invocations: Mutex::new(0),
        })
    }

    pub fn release(&self) {
        self.gate.notify_waiters();
    }

    pub async fn invocation_count(&self) -> usize {
        *self.invocations.lock().await
    }
}

#[async_trait]
impl ActionHandler for GatedHandler {
    async fn execute(&self, _config: &ActionSpec, _event: &Event) -> Result<(), ActionError> {
        *self.invocations.lock().await += 1;
        self.gate.notified().await;
        Ok(())
    }
}

/// A draft for a status_change -> notification rule; the default shape used
/// across the pipeline tests.
pub fn notification_rule_draft(to: &str, from: Option<&str>) -> RuleDraft {
    RuleDraft {
        name: format!("Notify on {}", to),
        is_active: true,
        trigger: Trigger::StatusChange {
            from: from.map(|s| s.to_string()),
            to: to.to_string(),
        },
        action: ActionSpec::Notification {
            message: "Lead moved to {{to}}".to_string(),
        },
    }
}

pub fn idle_rule_draft(days: i64) -> RuleDraft {
    RuleDraft {
        name: format!("Check in after {} idle days", days),
        is_active: true,
        trigger: Trigger::TimeBased { days },
        action: ActionSpec::Notification {
            message: "Lead idle for {{idle_days}} days".to_string(),
        },
    }
}
