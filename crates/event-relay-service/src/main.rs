//! # Event Relay Service
//!
//! Binary entry point for the Event Relay HTTP service.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging
//! - Wires the record store, token cipher, GA4 sink and dispatch workers
//! - Serves the HTTP API until SIGINT/SIGTERM, then drains the dispatch queue

use anyhow::Context;
use event_relay_api::{
    shutdown_signal, start_server, AppState, LoggingConfig, Repositories, ServiceConfig,
    ServiceError, ServiceMetrics,
};
use event_relay_core::{Ga4HttpSink, InMemoryRecordStore};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_EXIT_CODE: i32 = 3;

#[tokio::main]
async fn main() {
    let service_config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from this file, so report on stderr
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    init_logging(&service_config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Event Relay service");

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(CONFIG_EXIT_CODE);
    }

    let (state, workers) = match build_state(service_config.clone()) {
        Ok(parts) => parts,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize service; aborting");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        webhook_path = %service_config.webhook.endpoint_path,
        workers = service_config.dispatch.workers,
        "Starting HTTP server"
    );

    let result = start_server(state, shutdown_signal()).await;

    // The server dropped every queue handle; wait for in-flight dispatches
    let drain_timeout = Duration::from_secs(service_config.server.shutdown_timeout_seconds);
    match tokio::time::timeout(drain_timeout, workers.join()).await {
        Ok(()) => info!("Dispatch workers drained"),
        Err(_) => warn!(
            timeout_seconds = drain_timeout.as_secs(),
            "Dispatch workers did not drain before the shutdown timeout"
        ),
    }

    if let Err(e) = result {
        error!(error = %e, "HTTP server failed");

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => CONFIG_EXIT_CODE,
        };

        std::process::exit(exit_code);
    }
}

// ============================================================================
// Private helpers
// ============================================================================

/// Load configuration.
///
/// Sources, later overriding earlier:
///  1. `/etc/event-relay/service.yaml`
///  2. `./config/service.yaml`
///  3. the file named by `RELAY_CONFIG_FILE`
///  4. environment variables prefixed `RELAY__`, e.g. `RELAY__SERVER__PORT=9090`
///
/// Every field has a default, so missing files are fine. A malformed file or
/// an uncoercible variable is an error.
fn load_config() -> anyhow::Result<ServiceConfig> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/event-relay/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Ok(explicit_path) = std::env::var("RELAY_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            builder = builder.add_source(config::File::with_name(&explicit_path).required(true));
        }
    }

    builder
        .add_source(config::Environment::with_prefix("RELAY").separator("__"))
        .build()
        .context("failed to read configuration sources")?
        .try_deserialize()
        .context("failed to deserialize service configuration")
}

fn init_logging(logging: &LoggingConfig) {
    let level = logging.level.as_str();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "event_relay_service={level},event_relay_api={level},event_relay_core={level},tower_http={level}"
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_state(
    config: ServiceConfig,
) -> anyhow::Result<(AppState, event_relay_core::DispatchWorkers)> {
    let cipher = config
        .security
        .cipher()
        .context("failed to build token cipher")?;

    let sink = Ga4HttpSink::new(config.dispatch.sink()).context("failed to build GA4 sink")?;

    let metrics = ServiceMetrics::new().context("failed to register metrics")?;

    warn!("Using the in-memory record store; events and tenants are lost on restart");
    let store = Arc::new(InMemoryRecordStore::new());

    Ok(AppState::assemble(
        config,
        Repositories::shared(store),
        Arc::new(sink),
        Arc::new(cipher),
        metrics,
    ))
}
