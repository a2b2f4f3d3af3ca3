//! Event Management Service server.
//!
//! Listens on a Unix-domain registration socket and serves reservation
//! sessions until interrupted.
//!
//! # Environment Variables
//!
//! - `EMS_REGISTRATION_PATH`: registration socket (default: `/tmp/ems.sock`)
//! - `EMS_MAX_SESSIONS`: concurrent session limit (default: 8)
//! - `EMS_MAX_SEATS_PER_RESERVE`: seats accepted per reserve (default: 256)
//! - `EMS_ACCESS_DELAY_US`: artificial delay per lookup and seat access
//! - `EMS_METRICS_ADDR`: Prometheus exporter address (disabled when unset)
//! - `EMS_SHUTDOWN_TIMEOUT`: seconds to wait for sessions on exit (default: 5)
//! - `RUST_LOG`: log filter (default: `info,ems=debug`)
//!
//! Sending `SIGUSR1` logs the seat map of every event.

mod config;

use anyhow::Context;
use config::Config;
use ems_core::ReservationEngine;
use ems_runtime::metrics::MetricsServer;
use ems_runtime::{Server, UnixTransport, bind_registration};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ems=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().with_args(std::env::args().skip(1))?;
    tracing::info!(
        registration = %config.registration_path.display(),
        max_sessions = config.max_sessions,
        access_delay_us = config.access_delay_us,
        "Starting event management server"
    );

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(metrics) = metrics.as_mut() {
        metrics.start().context("starting metrics exporter")?;
    }

    let listener = bind_registration(&config.registration_path)
        .with_context(|| format!("binding {}", config.registration_path.display()))?;
    let server = Server::start(&config.server_config(), Arc::new(UnixTransport));

    let dumper = tokio::spawn(dump_on_signal(Arc::clone(server.engine())));

    tokio::select! {
        () = server.run_registration(&listener) => {
            tracing::info!("Registration closed");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            tracing::info!("Interrupted, shutting down");
        }
    }

    dumper.abort();
    drop(listener);
    if let Err(e) = std::fs::remove_file(&config.registration_path) {
        tracing::warn!(error = %e, "Could not remove registration socket");
    }

    match server.shutdown(config.shutdown_timeout()).await {
        Ok(()) => tracing::info!("Server stopped"),
        Err(e) => tracing::warn!(error = %e, "Server stopped with sessions still active"),
    }
    Ok(())
}

/// Logs every event's seat map each time `SIGUSR1` arrives.
async fn dump_on_signal(engine: Arc<ReservationEngine>) {
    let mut signals = match signal(SignalKind::user_defined1()) {
        Ok(signals) => signals,
        Err(e) => {
            tracing::warn!(error = %e, "SIGUSR1 handler unavailable, seat dumps disabled");
            return;
        }
    };

    while signals.recv().await.is_some() {
        match engine.snapshot().await {
            Ok(events) => {
                tracing::info!(events = events.len(), "Seat map dump");
                for event in events {
                    let mut map = String::new();
                    for row in event.grid.iter_rows() {
                        let line: Vec<String> = row.iter().map(u32::to_string).collect();
                        let _ = writeln!(map, "{}", line.join(" "));
                    }
                    tracing::info!(event = %event.id, "\n{map}");
                }
            }
            Err(e) => tracing::error!(error = %e, "Seat map dump failed"),
        }
    }
}
