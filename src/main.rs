//! ADUN Worker - Backend service for the constituency-management platform
//!
//! This worker connects to NATS and handles voter-roll imports, matching,
//! geocoding jobs and reference-data operations.

mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,adun_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let args = cli::Cli::parse();

    match args.command {
        Some(cli::Command::Migrate) => run_migrate().await,
        Some(cli::Command::ImportVoters { file, version_id, new_version, user_id }) => {
            run_import(file, version_id, new_version, user_id).await
        }
        Some(cli::Command::Serve) | None => run_serve().await,
    }
}

async fn run_serve() -> Result<()> {
    info!("Starting ADUN Worker...");

    // Load configuration
    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    // Connect to database
    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    // Run migrations
    db::run_migrations(&pool).await?;

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = connect_nats(&config.nats_url).await?;
    info!("Connected to NATS at {}", config.nats_url);

    // Start message handlers
    let handler_result = handlers::start_handlers(nats_client, pool, &config).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn run_migrate() -> Result<()> {
    let config = config::Config::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    Ok(())
}

async fn run_import(
    file: String,
    version_id: Option<uuid::Uuid>,
    new_version: Option<String>,
    user_id: uuid::Uuid,
) -> Result<()> {
    use services::chunker::{ChunkedVoterImporter, NatsChunkSink};

    let config = config::Config::from_env()?;

    let version_id = match (version_id, new_version) {
        (Some(id), _) => id,
        (None, Some(label)) => {
            let pool = db::create_pool(&config.database_url).await?;
            let id = db::queries::voter::create_version(&pool, &label).await?;
            info!("Created voter-list version '{}' ({})", label, id);
            id
        }
        (None, None) => {
            anyhow::bail!("either --version-id or --new-version is required")
        }
    };

    let csv_text = std::fs::read_to_string(&file)?;
    let nats_client = connect_nats(&config.nats_url).await?;
    info!("Connected to NATS at {}", config.nats_url);

    let importer = ChunkedVoterImporter::new(NatsChunkSink::new(nats_client, user_id));
    let summary = importer
        .import_csv(version_id, &csv_text, |processed, total| {
            let percent = (processed as f64 / total as f64 * 100.0).round();
            info!("Import progress: {}/{} rows ({}%)", processed, total, percent);
        })
        .await
        .map_err(|e| anyhow::anyhow!("CSV validation failed: {}", e))?;

    info!(
        "Import finished: {} imported, {} updated, {} matched over {} chunks",
        summary.imported, summary.updated, summary.matched, summary.chunks_sent
    );
    for err in &summary.errors {
        error!("Import error: {}", err);
    }

    Ok(())
}

async fn connect_nats(nats_url: &str) -> Result<async_nats::Client> {
    let client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(nats_url)
                .await?
        }
        _ => async_nats::connect(nats_url).await?,
    };
    Ok(client)
}
