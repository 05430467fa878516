//! Ingest chain blocks into a shorthash registry and serve lookups over HTTP.
//!
//! The server runs two concurrent tasks over one [Registry]:
//!
//! * ingestion ([ingest::IngestionState]) reads blocks from a [feed::Feed] and assigns every
//!   address it finds, in block order, through a single [Assigner];
//! * the read API ([api::router]) answers lookups while ingestion runs.
//!
//! Fatal errors (corrupted state) stop ingestion and are returned from [run]. Transient feed or
//! storage failures are retried with exponential backoff.

use shorthash_assigner::Assigner;
use shorthash_registry::{storage::disk, Config as RegistryConfig, Registry};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

pub mod api;
pub mod config;
pub mod feed;
pub mod ingest;
pub mod telemetry;

pub use config::Config;

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::Error),
    #[error("registry error: {0}")]
    Registry(#[from] shorthash_registry::Error),
    #[error("feed error: {0}")]
    Feed(#[from] feed::Error),
    #[error("ingestion error: {0}")]
    Ingest(#[from] ingest::Error),
    #[error("api error: {0}")]
    Api(#[from] std::io::Error),
    #[error("api task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Open the registry described by `cfg`, serve the read API, and (unless `serve_only`) ingest
/// blocks from the configured endpoint.
///
/// Returns once the API stops or ingestion fails. If ingestion reaches `stop_at`, the API keeps
/// serving.
pub async fn run(cfg: Config, serve_only: bool) -> Result<(), Error> {
    let storage = disk::Storage::new(disk::Config::new(cfg.storage_directory.clone()));
    let registry_cfg = RegistryConfig::new(cfg.partition.clone());
    let metrics = registry_cfg.metrics.clone();
    let registry = Registry::init(storage, registry_cfg).await?;

    let listener = TcpListener::bind(cfg.listen).await?;
    let router = api::router(registry.clone(), metrics.clone());
    let mut api = tokio::spawn(api::serve(listener, router));
    if serve_only {
        info!("ingestion disabled");
        return Ok(api.await??);
    }

    let genesis = match &cfg.genesis {
        Some(path) => feed::genesis::load(path)?,
        None => Vec::new(),
    };
    let client = feed::rpc::Client::new(cfg.rpc_url.clone())?;
    let ingest_cfg = ingest::Config {
        genesis,
        poll_interval: cfg.poll_interval(),
        retry_initial: cfg.retry_initial(),
        retry_max: cfg.retry_max(),
        stop_at: cfg.stop_at,
    };
    let state =
        ingest::IngestionState::init(Assigner::new(registry.clone(), metrics), client, ingest_cfg)
            .await;
    tokio::select! {
        result = state.run() => {
            result?;
            info!(cursor = registry.current_block_cursor().await, "ingestion finished");
        },
        result = &mut api => return Ok(result??),
    }
    Ok(api.await??)
}
