use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod automation;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod services;
mod validation;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use automation::{
    ActionDispatcher, AutomationEngine, EventStore, ExecutionLedger, HandlerRegistry,
    PgEventStore, PgExecutionLedger, PgRuleStore, RetryPolicy, RuleStore,
};
use jobs::{AutomationScheduler, IdleScannerJob};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub rules: Arc<dyn RuleStore>,
    pub ledger: Arc<dyn ExecutionLedger>,
    pub engine: Arc<AutomationEngine>,
    pub scheduler: Arc<AutomationScheduler>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    if !config.smtp.is_configured() {
        tracing::warn!("SMTP is not fully configured; send_email actions will fail until it is");
    }
    let email_service = services::EmailService::new(&config.smtp)
        .map_err(|e| anyhow::anyhow!("failed to build email service: {}", e))?;

    let rules: Arc<dyn RuleStore> = Arc::new(PgRuleStore::new(db_pool.clone()));
    let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(db_pool.clone()));
    let ledger: Arc<dyn ExecutionLedger> = Arc::new(PgExecutionLedger::new(db_pool.clone()));

    let handlers = HandlerRegistry::production(db_pool.clone(), email_service);
    let dispatcher = Arc::new(ActionDispatcher::new(
        ledger.clone(),
        handlers,
        RetryPolicy::from_config(&config.engine),
    ));

    let engine = AutomationEngine::start(
        rules.clone(),
        events.clone(),
        dispatcher,
        config.engine.worker_shards,
        config.engine.queue_depth,
    );

    let scanner = Arc::new(IdleScannerJob::new(
        rules.clone(),
        events.clone(),
        engine.clone(),
    ));
    let scheduler = Arc::new(
        AutomationScheduler::new(scanner, config.engine.scan_interval_minutes)
            .await
            .map_err(|e| anyhow::anyhow!("failed to build scheduler: {}", e))?,
    );
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start scheduler: {}", e))?;

    let app_state = Arc::new(AppState {
        db_pool,
        rules,
        ledger,
        engine,
        scheduler,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "LeadFlow Automation API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/automation", handlers::automation_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
