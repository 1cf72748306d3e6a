pub mod aggregator;
pub mod api;
pub mod blob_store;
pub mod config;
pub mod fetcher;
pub mod metrics_defs;
pub mod refresh;
pub mod types;

use api::{ApiError, AppState};
use blob_store::{
    AzureBlobStore, BlobError, BlobStore, FilesystemBlobStore, GcsBlobStore, MemoryBlobStore,
};
use config::{BlobStoreType, Config, ValidationError};
use fetcher::{FetchError, Fetcher};
use refresh::{Command, RefreshError, RefreshJob, RefreshReport, Refresher};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::mpsc;

pub use aggregator::generate_latest_builds_json;

const SAS_TOKEN_ENV: &str = "SAS_TOKEN";

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
    #[error("fetcher error: {0}")]
    Fetch(#[from] FetchError),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

/// Builds the blob store selected by configuration. Credentials are read
/// here, once, and never refreshed.
pub async fn get_store(store_type: BlobStoreType) -> Result<Arc<dyn BlobStore>, BlobError> {
    let store: Arc<dyn BlobStore> = match store_type {
        BlobStoreType::Filesystem { base_dir } => Arc::new(FilesystemBlobStore::new(base_dir)),
        BlobStoreType::Azure { account_url } => {
            let account_url = match account_url {
                Some(url) => url,
                None => std::env::var(SAS_TOKEN_ENV).map_err(|_| {
                    BlobError::InvalidUrl(format!(
                        "no account_url configured and {SAS_TOKEN_ENV} is not set"
                    ))
                })?,
            };
            Arc::new(AzureBlobStore::new(&account_url)?)
        }
        BlobStoreType::Gcs => Arc::new(GcsBlobStore::new().await?),
        BlobStoreType::Memory => {
            tracing::warn!("using the in-memory blob store, nothing will be persisted");
            Arc::new(MemoryBlobStore::new())
        }
    };
    Ok(store)
}

fn refresh_job(config: &Config, store: Arc<dyn BlobStore>) -> Result<RefreshJob, FetchError> {
    let fetcher = Fetcher::new(config.source.url.clone(), config.source.timeout())?;
    Ok(RefreshJob::new(fetcher, store, config.storage.clone()))
}

/// Runs a single refresh and returns its report.
pub async fn refresh_once(config: Config) -> Result<RefreshReport, ServiceError> {
    config.validate()?;
    let store = get_store(config.blob_store.r#type.clone()).await?;
    let report = refresh_job(&config, store)?.run_once().await?;
    Ok(report)
}

/// Starts the refresh worker and serves the API until the listener stops.
pub async fn run(config: Config) -> Result<(), ServiceError> {
    config.validate()?;
    let store = get_store(config.blob_store.r#type.clone()).await?;

    // Channel to send commands to the refresh worker.
    let (tx, rx) = mpsc::channel::<Command>(64);

    let ready = if config.refresh.enabled {
        let refresher = Refresher::new(
            refresh_job(&config, store.clone())?,
            config.refresh.interval(),
            config.refresh.run_on_startup,
        );
        let ready = refresher.ready_flag();
        tokio::spawn(refresher.start(rx));
        ready
    } else {
        tracing::info!("refresh worker disabled, serving the stored document only");
        Arc::new(AtomicBool::new(true))
    };

    let state = AppState {
        store,
        storage: config.storage.clone(),
        ready,
    };

    let result = api::serve(config.listener, state).await;
    let _ = tx.send(Command::Shutdown).await;
    result?;
    Ok(())
}
