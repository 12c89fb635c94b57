//! NATS message handlers

pub mod export;
pub mod geocode;
pub mod import;
pub mod jobs;
pub mod ping;
pub mod reference;
pub mod voter_match;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::geocode_runner::GeocodeRunner;
use crate::services::geocoding::{create_geocoder, Geocoder};

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, _config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    // Create shared geocoder
    let geocoder: Arc<dyn Geocoder> = Arc::from(create_geocoder());
    info!("Geocoder initialized: {}", geocoder.name());

    // Subscribe to all subjects
    let ping_sub = client.subscribe("adun.ping").await?;
    let voter_chunk_sub = client.subscribe("adun.import.voters.chunk").await?;
    let voter_match_sub = client.subscribe("adun.voters.match").await?;
    let voter_export_sub = client.subscribe("adun.voters.export").await?;

    // Geocode subjects
    let geocode_start_sub = client.subscribe("adun.geocode.start").await?;
    let geocode_pause_sub = client.subscribe("adun.geocode.pause").await?;
    let geocode_resume_sub = client.subscribe("adun.geocode.resume").await?;
    let geocode_latest_sub = client.subscribe("adun.geocode.latest").await?;

    // Reference-data subjects
    let reference_import_sub = client.subscribe("adun.reference.import").await?;
    let reference_populate_sub = client.subscribe("adun.reference.populate").await?;
    let reference_export_sub = client.subscribe("adun.reference.export").await?;

    // Job management subjects
    let job_history_sub = client.subscribe("adun.jobs.history").await?;

    info!("Subscribed to NATS subjects");

    // Geocode runner owns the JetStream work queue
    let runner = Arc::new(GeocodeRunner::new(client.clone(), pool.clone(), Arc::clone(&geocoder)).await?);

    // Clone for each handler
    let client_ping = client.clone();
    let client_voter_chunk = client.clone();
    let client_voter_match = client.clone();
    let client_voter_export = client.clone();
    let client_geocode_start = client.clone();
    let client_geocode_pause = client.clone();
    let client_geocode_resume = client.clone();
    let client_geocode_latest = client.clone();
    let client_reference_import = client.clone();
    let client_reference_populate = client.clone();
    let client_reference_export = client.clone();
    let client_job_history = client.clone();

    let pool_voter_chunk = pool.clone();
    let pool_voter_match = pool.clone();
    let pool_voter_export = pool.clone();
    let pool_geocode_start = pool.clone();
    let pool_geocode_pause = pool.clone();
    let pool_geocode_resume = pool.clone();
    let pool_geocode_latest = pool.clone();
    let pool_reference_import = pool.clone();
    let pool_reference_populate = pool.clone();
    let pool_reference_export = pool.clone();

    let runner_start = Arc::clone(&runner);
    let runner_resume = Arc::clone(&runner);
    let runner_main = Arc::clone(&runner);

    // Spawn handlers
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub).await
    });

    let voter_chunk_handle = tokio::spawn(async move {
        import::handle_voter_chunk(client_voter_chunk, voter_chunk_sub, pool_voter_chunk).await
    });

    let voter_match_handle = tokio::spawn(async move {
        voter_match::handle_match(client_voter_match, voter_match_sub, pool_voter_match).await
    });

    let voter_export_handle = tokio::spawn(async move {
        export::handle_voter_export(client_voter_export, voter_export_sub, pool_voter_export).await
    });

    // Geocode handlers
    let geocode_start_handle = tokio::spawn(async move {
        geocode::handle_start(client_geocode_start, geocode_start_sub, pool_geocode_start, runner_start).await
    });

    let geocode_pause_handle = tokio::spawn(async move {
        geocode::handle_pause(client_geocode_pause, geocode_pause_sub, pool_geocode_pause).await
    });

    let geocode_resume_handle = tokio::spawn(async move {
        geocode::handle_resume(client_geocode_resume, geocode_resume_sub, pool_geocode_resume, runner_resume).await
    });

    let geocode_latest_handle = tokio::spawn(async move {
        geocode::handle_latest(client_geocode_latest, geocode_latest_sub, pool_geocode_latest).await
    });

    // Reference-data handlers
    let reference_import_handle = tokio::spawn(async move {
        reference::handle_import(client_reference_import, reference_import_sub, pool_reference_import).await
    });

    let reference_populate_handle = tokio::spawn(async move {
        reference::handle_populate(client_reference_populate, reference_populate_sub, pool_reference_populate).await
    });

    let reference_export_handle = tokio::spawn(async move {
        reference::handle_export(client_reference_export, reference_export_sub, pool_reference_export).await
    });

    // Job management handlers
    let job_history_handle = tokio::spawn(async move {
        jobs::handle_job_history(client_job_history, job_history_sub).await
    });

    // Start the geocode job processor
    tokio::spawn(async move {
        if let Err(e) = runner_main.start_processing().await {
            error!("Geocode runner error: {}", e);
        }
    });

    info!("All handlers started, waiting for messages...");

    // Wait for any handler to finish (which means an error occurred)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = voter_chunk_handle => {
            error!("Voter chunk handler finished: {:?}", result);
        }
        result = voter_match_handle => {
            error!("Voter match handler finished: {:?}", result);
        }
        result = voter_export_handle => {
            error!("Voter export handler finished: {:?}", result);
        }
        result = geocode_start_handle => {
            error!("Geocode start handler finished: {:?}", result);
        }
        result = geocode_pause_handle => {
            error!("Geocode pause handler finished: {:?}", result);
        }
        result = geocode_resume_handle => {
            error!("Geocode resume handler finished: {:?}", result);
        }
        result = geocode_latest_handle => {
            error!("Geocode latest handler finished: {:?}", result);
        }
        result = reference_import_handle => {
            error!("Reference import handler finished: {:?}", result);
        }
        result = reference_populate_handle => {
            error!("Reference populate handler finished: {:?}", result);
        }
        result = reference_export_handle => {
            error!("Reference export handler finished: {:?}", result);
        }
        result = job_history_handle => {
            error!("Job history handler finished: {:?}", result);
        }
    }

    Ok(())
}
