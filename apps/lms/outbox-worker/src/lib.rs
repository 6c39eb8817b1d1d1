//! Email Outbox Worker Service
//!
//! Background worker that delivers queued LMS email from the PostgreSQL
//! outbox.
//!
//! ## Architecture
//!
//! ```text
//! email_outbox (PostgreSQL)
//!   ↓ (claim: PENDING | FAILED → SENDING)
//! OutboxWorker ── Reconciler (stale SENDING claims)
//!   ↓ (renders {{placeholders}})
//! OutboxProcessor
//!   ↓ (sends emails)
//! DeliveryProvider (SendGrid/SMTP)
//!   ↓
//! email_audit
//! ```
//!
//! ## Features
//!
//! - Backoff of 60s, 5m and 30m, cancelling after the fourth failed attempt
//! - Opt-out checks against `email_preferences`
//! - Recovery of entries stranded by a crashed worker
//! - Graceful shutdown handling
//! - Health check endpoint for Kubernetes probes

pub mod health;

use core_config::{Environment, FromEnv, app_info};
use database::postgres::{PostgresConfig, connect_from_config_with_retry, run_migrations};
use domain_outbox::providers::{SendGridProvider, SmtpProvider};
use domain_outbox::{
    DeliveryProvider, OutboxProcessor, OutboxStore, OutboxWorker, PgAuditSink, PgOutboxStore,
    PgPreferenceStore, PgTemplateStore, ProcessorSettings, Reconciler, RetryPolicy, SystemClock,
    TemplateStore, WorkerConfig, default_templates, init_metrics,
};
use eyre::{Result, WrapErr};
use health::{HealthState, health_router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Prometheus metrics: `/metrics`
/// - Queue monitoring: `/outbox/stats`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app = health_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// SendGrid in production, SMTP (Mailpit) in development.
fn select_provider(environment: &Environment) -> Result<Arc<dyn DeliveryProvider>> {
    match environment {
        Environment::Production => {
            info!("Using SendGrid provider for production");
            let provider = SendGridProvider::from_env().wrap_err(
                "SendGrid configuration error. Ensure SENDGRID_API_KEY is set.",
            )?;
            Ok(Arc::new(provider))
        }
        Environment::Development => {
            info!("Using SMTP provider for development (Mailpit/MailHog)");
            let provider = SmtpProvider::from_env().wrap_err(
                "SMTP configuration error. Ensure SMTP_HOST and SMTP_PORT are accessible.",
            )?;
            Ok(Arc::new(provider))
        }
    }
}

/// Publish the built-in templates. Existing versions are left untouched.
async fn seed_templates(templates: &dyn TemplateStore) -> Result<()> {
    let mut published = 0;
    for template in default_templates() {
        if templates
            .put(template)
            .await
            .wrap_err("Failed to seed email templates")?
        {
            published += 1;
        }
    }
    info!(published, "Default templates ready");
    Ok(())
}

/// Run the outbox worker
///
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Connects to PostgreSQL with retry logic, optionally running migrations
/// 3. Selects the email provider (SendGrid for prod, SMTP for dev)
/// 4. Runs the worker and the reconciler until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if configuration is invalid, the database cannot be
/// reached, or the provider cannot be built. Delivery failures never end
/// the process.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting outbox worker service");
    info!("Environment: {:?}", environment);

    // Checks OUTBOX_WORKER_HEALTH_PORT first, then HEALTH_PORT, then default
    let health_port: u16 = std::env::var("OUTBOX_WORKER_HEALTH_PORT")
        .or_else(|_| std::env::var("HEALTH_PORT"))
        .unwrap_or_else(|_| "8083".to_string())
        .parse()
        .unwrap_or(8083);

    let config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;
    config.validate().wrap_err("Invalid worker configuration")?;
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        batch_size = config.batch_size,
        send_timeout_ms = config.send_timeout.as_millis() as u64,
        missing_template = %config.missing_template,
        "Worker configuration loaded"
    );

    let pg_config = PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
    info!("Connecting to PostgreSQL...");
    let db = connect_from_config_with_retry(pg_config, None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;

    if core_config::env_parse("OUTBOX_RUN_MIGRATIONS", false)? {
        run_migrations::<migration::Migrator>(&db, app_info.name)
            .await
            .wrap_err("Failed to run migrations")?;
    }

    let store: Arc<dyn OutboxStore> = Arc::new(PgOutboxStore::new(db.clone()));
    let templates = Arc::new(PgTemplateStore::new(db.clone()));
    seed_templates(templates.as_ref()).await?;

    let provider = select_provider(&environment)?;
    if let Err(e) = provider.health_check().await {
        warn!(provider = provider.name(), error = %e, "Delivery provider health check failed");
    }

    let clock = Arc::new(SystemClock);
    let processor = Arc::new(OutboxProcessor::new(
        store.clone(),
        templates,
        Arc::new(PgPreferenceStore::new(db.clone())),
        Arc::new(PgAuditSink::new(db.clone())),
        provider,
        clock.clone(),
        RetryPolicy::default(),
        ProcessorSettings::from(&config),
    ));
    let worker = OutboxWorker::new(store.clone(), processor.clone(), clock.clone(), &config);
    let reconciler = Reconciler::new(store.clone(), processor, clock, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(db, store, app_info.name, app_info.version);
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    let reconciler_shutdown = shutdown_rx.clone();
    let reconciler_task = tokio::spawn(async move { reconciler.run(reconciler_shutdown).await });

    worker.run(shutdown_rx).await;

    if let Err(e) = reconciler_task.await {
        error!(error = %e, "Reconciler task failed");
    }

    info!("Outbox worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
