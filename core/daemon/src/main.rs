//! Agent monitor daemon entrypoint.
//!
//! A small loopback HTTP service that receives hook events from the agent, folds them
//! into activity records and prompt lifecycles, and serves the result to display
//! clients. All state lives in one engine instance shared by the HTTP handlers and the
//! staleness reaper.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use monitor_core::config::{config_path, load_config};
use monitor_core::{monitor_home, MonitorConfig, MonitorService};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod http;

const DEBUG_LOG_ENV: &str = "AGENT_MONITOR_DEBUG_LOG";

fn main() {
    init_logging();

    let home = match monitor_home() {
        Ok(home) => home,
        Err(err) => {
            error!(error = %err, "Failed to resolve monitor home directory");
            std::process::exit(1);
        }
    };

    let config_file = config_path(&home);
    let mut config = match load_config(&config_file) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load monitor config; using defaults");
            MonitorConfig::default()
        }
    };
    config.apply_env_overrides();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "Failed to build async runtime");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(serve(home, config)) {
        error!(error = %err, "Agent monitor daemon stopped");
        std::process::exit(1);
    }
}

async fn serve(home: PathBuf, config: MonitorConfig) -> Result<(), String> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    let service = MonitorService::start(config, &home)
        .map_err(|err| format!("Failed to start monitor engine: {}", err))?;

    spawn_stale_reaper(Arc::clone(&service));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| format!("Failed to bind {}: {}", addr, err))?;
    let port = listener
        .local_addr()
        .map(|local| local.port())
        .unwrap_or(addr.port());

    info!(
        port,
        home = %home.display(),
        capacity = service.config().registry.capacity,
        "Agent monitor daemon started"
    );

    let app = http::router(http::AppState::new(service, port));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| format!("Server error: {}", err))?;

    info!("Agent monitor daemon shut down");
    Ok(())
}

/// Reaps stale records once at startup and then on every interval tick.
fn spawn_stale_reaper(service: Arc<MonitorService>) {
    let period = service.config().reaper.interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.reap_stale(Utc::now()).await {
                Ok(reaped) if !reaped.is_empty() => {
                    info!(reaped = reaped.len(), "Stale activity reaped")
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Periodic staleness reap failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
