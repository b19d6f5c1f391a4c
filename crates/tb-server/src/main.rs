//! tb-server: tutorbook booking engine main binary
//!
//! Main entry point for the booking engine service.
//!
//! Usage:
//!   tb-server            - Start the HTTP API server
//!   tb-server --help     - Show help
//!   tb-server --version  - Show version

use std::sync::Arc;
use std::time::Duration;

use tb_core::{BookingEngine, BookingStore, Config};
use tracing_subscriber::EnvFilter;

/// Run mode
enum RunMode {
    /// HTTP API server
    Server,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_args() {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("tb-server {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server => {}
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    // Load configuration from environment
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting tb-server...");
    tracing::info!("Database: {}", config.database.path);

    run_server(config).await
}

/// Parse command line arguments
fn parse_args() -> RunMode {
    let args: Vec<String> = std::env::args().collect();

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            _ => {}
        }
    }

    RunMode::Server
}

/// Print help message
fn print_help() {
    println!("tb-server - tutorbook booking engine");
    println!();
    println!("Usage:");
    println!("  tb-server            Start the HTTP API server");
    println!("  tb-server --help     Show this help message");
    println!("  tb-server --version  Show version");
    println!();
    println!("Environment Variables:");
    println!("  TB_DATABASE_PATH           SQLite database path (default: data/tutorbook.db)");
    println!("  TB_API_PORT                HTTP API port (default: 8080)");
    println!("  TB_MIN_NOTICE_MINUTES      Minimum booking notice (default: 120)");
    println!("  TB_MAX_ADVANCE_DAYS        Maximum advance-booking window (default: 60)");
    println!("  TB_BUFFER_MINUTES          Default buffer around bookings (default: 0)");
    println!("  TB_MAX_RESCHEDULES         Per-booking reschedule cap (default: 2)");
    println!("  TB_MAX_BOOKINGS_PER_WEEK   Per-provider weekly volume limit (default: 25)");
    println!("  TB_DEFAULT_TIMEZONE        Fallback provider timezone (default: UTC)");
    println!("  TB_IDEMPOTENCY_TTL_HOURS   Idempotency record retention (default: 24)");
    println!("  TB_CALENDAR_URL            Calendar-sync service base URL (optional)");
    println!("  TB_CALENDAR_TOKEN          Calendar-sync API token (optional)");
}

/// Run the HTTP API server plus the maintenance sweep
async fn run_server(config: Config) -> anyhow::Result<()> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(
        BookingStore::open(&config.database.path)
            .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?,
    );

    let mut engine = BookingEngine::new(Arc::clone(&store), config.clone());
    engine = match build_calendar_client()? {
        Some(client) => {
            tracing::info!("Calendar sync enabled");
            engine
                .with_external_calendar(Arc::clone(&client) as _)
                .with_calendar_mirror(client as _)
        }
        None => {
            tracing::info!("Calendar sync disabled (no TB_CALENDAR_URL configured)");
            engine
        }
    };
    let engine = Arc::new(engine);

    // Hourly sweep of expired idempotency records
    let sweeper = Arc::clone(&engine);
    let sweep_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.purge_expired_records() {
                tracing::warn!("idempotency sweep failed: {}", e);
            }
        }
    });

    let api_port = config.api.port;
    let api_engine = Arc::clone(&engine);
    let api_handle = tokio::spawn(async move {
        if let Err(e) = tb_api::start_server(api_port, config, api_engine).await {
            tracing::error!("HTTP API error: {}", e);
        }
    });
    tracing::info!("HTTP API server started on port {}", api_port);

    tracing::info!("tb-server initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    api_handle.abort();
    sweep_handle.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Build the calendar-sync client when its endpoint is configured
fn build_calendar_client() -> anyhow::Result<Option<Arc<tb_calendar::CalendarSyncClient>>> {
    let Ok(base_url) = std::env::var("TB_CALENDAR_URL") else {
        return Ok(None);
    };
    let token = std::env::var("TB_CALENDAR_TOKEN").unwrap_or_default();

    let client = tb_calendar::CalendarSyncClient::new(tb_calendar::CalendarSyncConfig::new(
        base_url, token,
    ))
    .map_err(|e| anyhow::anyhow!("Calendar client error: {}", e))?;
    Ok(Some(Arc::new(client)))
}
