//! Mailops-rs server entry point.

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use mailops_api::{AppState, router as api_router};
use mailops_common::Config;
use mailops_core::{
    CampaignService, ContentRewriter, GmailApiProvider, NoopRewriter, ProgressBroadcaster,
    ProviderAdapter, RecipientResolver, RoundRobinRotation, SmtpRelayProvider, StaticTokenSource,
    TrackingRewriter,
};
use mailops_db::repositories::{
    JobRepository, RecipientRepository, SendAttemptRepository, SenderAccountRepository,
};
use mailops_engine::{
    ControlRegistry, DbAttemptLog, DbJobStore, DbSenderPool, Dispatcher, Maintenance, RetryConfig,
    SchedulerConfig, SendEngine, run_scheduler,
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// In-flight dispatchers are interrupted wherever they are; their jobs are
/// reconciled by startup recovery on the next boot.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailops=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting mailops-rs server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = mailops_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    mailops_db::migrate(&db).await?;
    info!("Migrations completed");

    // Initialize repositories
    let db = Arc::new(db);
    let job_repo = JobRepository::new(Arc::clone(&db));
    let account_repo = SenderAccountRepository::new(Arc::clone(&db));
    let recipient_repo = RecipientRepository::new(Arc::clone(&db));
    let attempt_repo = SendAttemptRepository::new(Arc::clone(&db));

    // Initialize services
    let resolver = RecipientResolver::new(recipient_repo, account_repo.clone());
    let campaign_service = CampaignService::new(job_repo.clone(), resolver.clone());
    let progress = ProgressBroadcaster::new();

    // Tracking rewrite is enabled by configuring a redirect base URL
    let rewriter: Arc<dyn ContentRewriter> = match config.tracking.base_url.as_deref() {
        Some(base_url) => {
            info!(base_url, "Click/open tracking rewrite enabled");
            Arc::new(TrackingRewriter::new(base_url))
        }
        None => Arc::new(NoopRewriter),
    };

    // Transmission providers
    let gmail_token = config.gmail.access_token.clone().unwrap_or_default();
    if gmail_token.is_empty() {
        tracing::warn!("No Gmail access token configured; API campaigns will fail to send");
    }
    let gmail: Arc<dyn ProviderAdapter> = Arc::new(GmailApiProvider::new(Arc::new(
        StaticTokenSource::new(gmail_token),
    )));
    let smtp: Arc<dyn ProviderAdapter> = Arc::new(SmtpRelayProvider::new());

    // Build the engine
    let dispatcher = Dispatcher::new(
        Arc::new(DbJobStore::new(job_repo.clone())),
        Arc::new(DbSenderPool::new(account_repo.clone())),
        Arc::new(DbAttemptLog::new(attempt_repo.clone())),
        rewriter,
        Arc::new(RoundRobinRotation),
        progress.clone(),
        RetryConfig::from_engine_config(&config.engine),
    );
    let engine = SendEngine::new(
        dispatcher,
        ControlRegistry::new(),
        job_repo,
        resolver,
        progress.clone(),
        gmail,
        smtp,
    );

    // Reconcile jobs left behind by an unclean shutdown
    info!("Running startup recovery...");
    engine.recover().await?;

    // Start maintenance scheduler (daily quota reset, channel cleanup)
    run_scheduler(
        SchedulerConfig {
            quota_sweep_interval: Duration::from_secs(config.engine.quota_sweep_interval_secs),
            ..Default::default()
        },
        Arc::new(Maintenance::new(account_repo, progress.clone())),
    )
    .await;

    // Create app state
    let state = AppState {
        campaign_service,
        engine,
        progress,
        attempt_repo,
    };

    // Build router
    let app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn(mailops_api::middleware::log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
