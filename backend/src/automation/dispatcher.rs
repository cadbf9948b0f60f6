// Action dispatcher - executes a matched rule's action exactly once per
// (rule, event) pair, with bounded timeout, classified retries and a ledger
// row for every outcome.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

use super::actions::{ActionError, HandlerRegistry};
use super::events::Event;
use super::ledger::{ExecutionLedger, ExecutionRecord, ExecutionStatus, LedgerEntry};
use super::rules::Rule;
use super::EngineError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Handler invocations per pair, first try included.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between transient failures.
    pub base_delay: Duration,
    /// Bound on a single handler invocation; elapse counts as transient.
    pub action_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            action_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.retry_base_secs),
            action_timeout: Duration::from_secs(config.action_timeout_secs),
        }
    }

    /// Delay after the given (1-based) failed attempt: base, 2x, 4x, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub struct ActionDispatcher {
    ledger: Arc<dyn ExecutionLedger>,
    handlers: HandlerRegistry,
    policy: RetryPolicy,
}

impl ActionDispatcher {
    pub fn new(
        ledger: Arc<dyn ExecutionLedger>,
        handlers: HandlerRegistry,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            handlers,
            policy,
        }
    }

    /// Dispatch one rule against one event.
    ///
    /// The pending insert under the ledger's uniqueness constraint is the
    /// at-most-once gate: if the pair already exists the existing record is
    /// returned unchanged and nothing runs, even on event replay.
    pub async fn dispatch(&self, rule: &Rule, event: &Event) -> Result<ExecutionRecord, EngineError> {
        let mut record = match self.ledger.begin(rule.id, event.id, Utc::now()).await? {
            LedgerEntry::Existing(existing) => {
                debug!(
                    "Suppressed duplicate dispatch of rule {} for event {}",
                    rule.id, event.id
                );
                return Ok(existing);
            }
            LedgerEntry::Inserted(record) => record,
        };

        let Some(handler) = self.handlers.get(rule.action.kind()) else {
            warn!(
                "No handler registered for action type '{}'; skipping rule {}",
                rule.action.kind(),
                rule.id
            );
            record.status = ExecutionStatus::Skipped;
            record.finished_at = Some(Utc::now());
            self.ledger.update(&record).await?;
            return Ok(record);
        };

        loop {
            record.attempts += 1;

            let outcome = match timeout(
                self.policy.action_timeout,
                handler.execute(&rule.action, event),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ActionError::transient(format!(
                    "action timed out after {}s",
                    self.policy.action_timeout.as_secs()
                ))),
            };

            match outcome {
                Ok(()) => {
                    record.status = ExecutionStatus::Succeeded;
                    record.last_error = None;
                    record.finished_at = Some(Utc::now());
                    info!(
                        "Rule '{}' executed for event {} (attempt {})",
                        rule.name, event.id, record.attempts
                    );
                    break;
                }
                Err(err @ ActionError::Permanent(_)) => {
                    record.status = ExecutionStatus::Failed;
                    record.last_error = Some(err.to_string());
                    record.finished_at = Some(Utc::now());
                    warn!(
                        "Rule '{}' failed permanently for event {}: {}",
                        rule.name, event.id, err
                    );
                    break;
                }
                Err(err) => {
                    record.last_error = Some(err.to_string());

                    if record.attempts as u32 >= self.policy.max_attempts {
                        record.status = ExecutionStatus::Failed;
                        record.finished_at = Some(Utc::now());
                        warn!(
                            "Rule '{}' exhausted {} attempts for event {}: {}",
                            rule.name, record.attempts, event.id, err
                        );
                        break;
                    }

                    // Persist the attempt count before suspending, so a
                    // restart does not forget how far we got.
                    self.ledger.update(&record).await?;
                    let delay = self.policy.backoff(record.attempts as u32);
                    debug!(
                        "Rule '{}' attempt {} failed transiently ({}); retrying in {:?}",
                        rule.name, record.attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.ledger.update(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            action_timeout: Duration::from_secs(30),
        };

        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(3), Duration::from_secs(120));
    }
}
