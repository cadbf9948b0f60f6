// REST surface for the automation engine, consumed by the admin UI.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use leadflow_shared::{AutomationRule, AutomationStats, ExecutionSummary};

use crate::automation::{
    Event, ExecutionLedger, RawOccurrence, RuleDraft, RulePatch, RuleStore,
};
use crate::error::{ApiResult, AppError};
use crate::jobs::{JobError, JobExecutionLog};
use crate::AppState;

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rules", get(list_rules).post(create_rule))
        .route(
            "/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/rules/:id/toggle", post(toggle_rule))
        .route("/stats", get(automation_stats))
        .route("/executions", get(list_executions))
        .route("/events", post(push_event))
        .route("/jobs", get(list_job_runs))
        .route("/jobs/:name/run", post(run_job))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRuleRequest {
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    pub action_type: Option<String>,
    #[serde(default)]
    pub action_config: serde_json::Value,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub limit: Option<i64>,
    pub rule_id: Option<Uuid>,
}

async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<AutomationRule>>> {
    let rules = state.rules.list().await?;
    Ok(Json(rules.iter().map(|r| r.to_wire()).collect()))
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRuleRequest>,
) -> ApiResult<(StatusCode, Json<AutomationRule>)> {
    let draft = RuleDraft::from_wire(
        &payload.name,
        payload.is_active,
        &payload.trigger_type,
        &payload.trigger_config,
        &payload.action_type,
        &payload.action_config,
    )?;

    let rule = state.rules.create(draft).await?;
    Ok((StatusCode::CREATED, Json(rule.to_wire())))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationRule>> {
    let rule = state.rules.get(id).await?;
    Ok(Json(rule.to_wire()))
}

async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<RulePatch>,
) -> ApiResult<Json<AutomationRule>> {
    let existing = state.rules.get(id).await?;
    let updated = existing.apply_patch(&patch)?;
    let saved = state.rules.save(updated).await?;
    Ok(Json(saved.to_wire()))
}

/// The rule list's power toggle: flips ACTIVA/PAUSADA without a body.
async fn toggle_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationRule>> {
    let rule = state.rules.toggle_active(id).await?;
    Ok(Json(rule.to_wire()))
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.rules.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn automation_stats(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<AutomationStats>> {
    let active_rules = state.rules.count_active().await?;

    let midnight = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    let stats = state.ledger.stats_since(midnight).await?;

    Ok(Json(AutomationStats {
        active_rules,
        executions_today: stats.count,
    }))
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExecutionQuery>,
) -> ApiResult<Json<Vec<ExecutionSummary>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let records = state.ledger.recent(limit, params.rule_id).await?;
    Ok(Json(records.iter().map(|r| r.to_wire()).collect()))
}

async fn list_job_runs(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<JobExecutionLog>>> {
    Ok(Json(state.scheduler.get_execution_logs().await))
}

/// Kick a background job outside its schedule (admin escape hatch).
async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.run_job_now(&name).await.map_err(|e| match e {
        JobError::ConfigError(_) => AppError::NotFound(format!("Job '{}'", name)),
        other => AppError::InternalError(other.to_string()),
    })?;
    Ok(StatusCode::ACCEPTED)
}

/// Inbound push endpoint for the CRM-side occurrence sources (status
/// changes, tag mutations, lead creation). Returns the canonical event;
/// processing happens asynchronously.
async fn push_event(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<RawOccurrence>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let event = state.engine.ingest(raw).await.map_err(crate::error::AppError::from)?;
    Ok((StatusCode::ACCEPTED, Json(event)))
}
