#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # trackgw
//!
//! Gateway for GPS trackers speaking the bracket-delimited text protocol.
//!
//! Devices connect over TCP (default port 6808) and send frames such as
//! `[3G*8800000015*0009*LK,0,0,21]`. The gateway acknowledges the frames that
//! need it, keeps a live `device_id` → connection session table, and records
//! when each device was last seen. Operators use the HTTP admin API (default
//! port 8080) to list sessions and push commands to connected devices.
//!
//! ## API surface
//!
//! | Method | Path                        | Auth | Description                       |
//! |--------|-----------------------------|------|-----------------------------------|
//! | GET    | `/api/health`               | No   | Liveness probe                    |
//! | GET    | `/api/sessions`             | Yes  | Live device sessions              |
//! | GET    | `/api/devices`              | Yes  | Device records                    |
//! | GET    | `/api/devices/{id}`         | Yes  | One device record                 |
//! | POST   | `/api/devices/{id}/server`  | Yes  | Send `IP,<ip>,<port>`             |
//! | POST   | `/api/devices/{id}/status`  | Yes  | Send `TS`                         |
//! | POST   | `/api/devices/{id}/locate`  | Yes  | Send `CR`                         |
//! | GET    | `/api/traffic`              | Yes  | Recent frames                     |

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trackgw::records::{spawn_record_writer, DeviceRecordSink};
use trackgw::{routes, AppState, Config, Dispatcher, Gateway};

/// Gateway for bracket-protocol GPS trackers.
#[derive(Parser)]
#[command(name = "trackgw", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device gateway and admin API (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };

    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    match run_server(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> Result<(), String> {
    info!("trackgw v{} starting", env!("CARGO_PKG_VERSION"));

    if config.auth.api_key == "change-me" {
        warn!("Using default API key — set TRACKGW_API_KEY or update config");
    }

    let state = AppState::new(config);
    let settings = state.config.gateway.clone();

    let sink: Arc<dyn DeviceRecordSink> = Arc::new(state.records.clone());
    let (records_tx, record_writer) = spawn_record_writer(sink);
    let dispatcher = Dispatcher::new(
        state.registry.clone(),
        records_tx.clone(),
        state.traffic.clone(),
    );
    let gateway = Gateway::new(dispatcher, records_tx, settings.clone());

    let device_listener = TcpListener::bind(&settings.listen)
        .await
        .map_err(|e| format!("Failed to bind gateway on {}: {e}", settings.listen))?;
    let admin_listener = TcpListener::bind(&state.config.server.listen)
        .await
        .map_err(|e| format!("Failed to bind admin API on {}: {e}", state.config.server.listen))?;

    info!("Device gateway listening on {}", settings.listen);
    info!("Admin API listening on {}", state.config.server.listen);

    let shutdown = CancellationToken::new();
    let gateway_task = tokio::spawn(gateway.run(device_listener, shutdown.clone()));

    let app = routes::router(state.clone());
    let admin_shutdown = shutdown.clone();
    let serve_result = axum::serve(admin_listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            admin_shutdown.cancel();
        })
        .await;

    info!("Shutting down...");
    shutdown.cancel();
    if let Err(e) = gateway_task.await {
        warn!("Gateway task ended abnormally: {e}");
    }
    // Every record sender is gone once the gateway has stopped.
    if let Err(e) = record_writer.await {
        warn!("Record writer ended abnormally: {e}");
    }

    serve_result.map_err(|e| format!("Admin API error: {e}"))?;
    info!("Goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
