//! teabot server entry point.
//!
//! Connects the store, creates the schema, starts the reminder scheduler,
//! populates the guild registry and serves the admin HTTP surface.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use teabot::api;
use teabot::app_state::AppState;
use teabot::config::BotConfig;
use teabot::domain::{EventBus, readiness};
use teabot::persistence::PersistenceClient;
use teabot::service::{GuildService, ReminderScheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = BotConfig::from_env()
        .map_err(|err| anyhow::anyhow!(err))
        .context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting teabot");

    // Build persistence layer
    let db = PersistenceClient::connect(&config)
        .await
        .context("failed to connect to the database")?;
    db.setup().await.context("failed to create the schema")?;

    // Build service layer
    let event_bus = EventBus::new(config.event_bus_capacity);
    let guilds = Arc::new(GuildService::new(db.clone(), event_bus.clone()));
    let reminders = Arc::new(ReminderScheduler::new(
        db.clone(),
        db.generator(),
        event_bus.clone(),
        SchedulerConfig::from_config(&config),
    ));
    reminders.start().await;
    spawn_event_logger(&event_bus);

    let (ready, signal) = readiness();
    let populating = Arc::clone(&guilds);
    tokio::spawn(async move {
        if let Err(err) = populating.populate(signal, &[]).await {
            tracing::error!(error = %err, "guild population failed");
        }
    });
    ready.fire();

    // Build application state
    let app_state = AppState {
        guilds,
        reminders: Arc::clone(&reminders),
        event_bus,
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reminders.shutdown().await;
    db.pool().close().await;
    tracing::info!("teabot stopped");
    Ok(())
}

/// Logs every published event until the bus closes.
fn spawn_event_logger(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(
                    event_type = event.event_type_str(),
                    guild_id = ?event.guild_id(),
                    "bot event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
