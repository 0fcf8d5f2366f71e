//! Runs the invoice processing and notification queues until interrupted.
//!
//! Usage: `invoiceflow-worker [CONFIG]`. Without an argument the config path
//! is read from `INVOICEFLOW_CONFIG`, then `./invoiceflow.json`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use invoiceflow::{load_config, InvoiceService};

const DEFAULT_CONFIG: &str = "invoiceflow.json";

fn init_logging() {
    // `log` records from the library and its dependencies flow into tracing.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to install log bridge: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "invoiceflow=info".into());
    let json = std::env::var("INVOICEFLOW_LOG_FORMAT").is_ok_and(|v| v == "json");

    let result = if json {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json()),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer()),
        )
    };
    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("INVOICEFLOW_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    info!("Starting invoiceflow worker v{}", env!("CARGO_PKG_VERSION"));

    let path = config_path();
    let config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config {:?}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let service = match InvoiceService::from_config(&config).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start invoice service: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = Arc::new(Notify::new());
    let signal = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || signal.notify_one()) {
        error!("Failed to install Ctrl-C handler: {}", e);
        service.shutdown().await;
        return ExitCode::FAILURE;
    }

    info!("Worker running. Press Ctrl-C to stop.");
    stop.notified().await;

    service.shutdown().await;
    info!("Worker stopped");
    ExitCode::SUCCESS
}
