// Idle trigger scanner - manufactures events for time-based triggers.
//
// Time-based triggers have no natural occurrence to listen to, so this job
// polls: for each distinct `days` threshold among active time_based rules it
// finds leads idle past the threshold and synthesizes one event per
// (entity, threshold) pair. Event ids are keyed by the daily bucket
// (entity, threshold, date), so re-running the scan before an entity's state
// changes regenerates the same ids and the execution ledger suppresses any
// second dispatch downstream.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::automation::{
    AutomationEngine, Event, EventKind, EventStore, RuleStore, Trigger,
};

use super::scheduler::{JobError, JobResult};

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// True when the tick found a previous scan still running and bailed.
    pub skipped: bool,
    pub thresholds_checked: usize,
    pub events_synthesized: usize,
    pub errors: Vec<String>,
}

pub struct IdleScannerJob {
    rules: Arc<dyn RuleStore>,
    events: Arc<dyn EventStore>,
    engine: Arc<AutomationEngine>,
    run_lock: Mutex<()>,
}

impl IdleScannerJob {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        events: Arc<dyn EventStore>,
        engine: Arc<AutomationEngine>,
    ) -> Self {
        Self {
            rules,
            events,
            engine,
            run_lock: Mutex::new(()),
        }
    }

    /// One scan pass. Overlapping ticks are skipped, not queued: if a scan
    /// is still running when the next tick fires, the tick returns
    /// immediately with `skipped = true`.
    pub async fn run(&self, now: DateTime<Utc>) -> JobResult<ScanOutcome> {
        let _guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Idle scan still running; skipping this tick");
                return Ok(ScanOutcome {
                    skipped: true,
                    ..Default::default()
                });
            }
        };

        let mut outcome = ScanOutcome::default();

        let rules = self.rules.list_active(Some(EventKind::TimeBased)).await?;
        let thresholds: BTreeSet<i64> = rules
            .iter()
            .filter_map(|rule| match rule.trigger {
                Trigger::TimeBased { days } => Some(days),
                _ => None,
            })
            .collect();

        for days in thresholds {
            outcome.thresholds_checked += 1;
            let cutoff = now - Duration::days(days);

            let idle = match self.events.idle_entities(cutoff).await {
                Ok(idle) => idle,
                Err(err) => {
                    outcome
                        .errors
                        .push(format!("idle query failed for {} days: {}", days, err));
                    continue;
                }
            };

            for entity_id in idle {
                let event = Event::idle(entity_id, days, now);
                match self.engine.submit(event).await {
                    Ok(()) => outcome.events_synthesized += 1,
                    Err(err) => outcome.errors.push(format!(
                        "failed to submit idle event for lead {}: {}",
                        entity_id, err
                    )),
                }
            }
        }

        info!(
            "Idle scan complete: {} thresholds, {} events synthesized, {} errors",
            outcome.thresholds_checked,
            outcome.events_synthesized,
            outcome.errors.len()
        );

        if outcome.events_synthesized == 0 && !outcome.errors.is_empty() {
            return Err(JobError::ExecutionError(outcome.errors.join("; ")));
        }

        Ok(outcome)
    }
}
