use crate::aggregator::{AggregateError, generate_latest_builds_json};
use crate::blob_store::{BlobError, BlobStore};
use crate::config::Storage;
use crate::fetcher::Fetcher;
use crate::metrics_defs::{
    BLOB_STORE_FAILED, FALLBACK_USED, FETCH_FAILED, LATEST_BUILDS_ENTRIES, REFRESH_DURATION,
    REFRESH_RUNS,
};
use crate::{counter, gauge, histogram};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

// A tick observed later than this after its scheduled instant is past due.
const PAST_DUE_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsvSource {
    /// Downloaded from the spreadsheet during this run.
    Fresh,
    /// The raw snapshot stored by an earlier run.
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshReport {
    pub source: CsvSource,
    pub raw_stored: bool,
    pub derived_stored: bool,
    pub derived_len: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error("no csv available: fetch failed and no stored copy could be read ({0})")]
    NoSource(#[source] BlobError),
    #[error("could not generate latest builds: {0}")]
    Aggregate(#[from] AggregateError),
}

/// One pass of fetch, fallback, aggregate and store.
pub struct RefreshJob {
    fetcher: Fetcher,
    store: Arc<dyn BlobStore>,
    storage: Storage,
}

impl RefreshJob {
    pub fn new(fetcher: Fetcher, store: Arc<dyn BlobStore>, storage: Storage) -> Self {
        RefreshJob {
            fetcher,
            store,
            storage,
        }
    }

    /// Fetches the spreadsheet, falling back to the stored raw copy, and
    /// overwrites the derived document when aggregation succeeds.
    ///
    /// A fresh CSV is stored before aggregation so the raw snapshot survives
    /// even when the sheet cannot be parsed. Storage failures are logged and
    /// reported, never returned as errors.
    pub async fn run_once(&self) -> Result<RefreshReport, RefreshError> {
        let container = &self.storage.container;

        let (csv, source) = match self.fetcher.fetch().await {
            Ok(csv) => (csv, CsvSource::Fresh),
            Err(err) => {
                tracing::error!(url = %self.fetcher.url(), error = %err, "error obtaining csv, falling back to stored copy");
                counter!(FETCH_FAILED).increment(1);

                let csv = self
                    .store
                    .retrieve(container, &self.storage.raw_blob)
                    .await
                    .map_err(RefreshError::NoSource)?;
                counter!(FALLBACK_USED).increment(1);
                (csv, CsvSource::Fallback)
            }
        };

        let raw_stored = match source {
            CsvSource::Fresh => self.store_blob(&self.storage.raw_blob, csv.clone()).await,
            CsvSource::Fallback => false,
        };

        let json = generate_latest_builds_json(&csv)?;
        let derived_len = json.len();
        let derived_stored = self
            .store_blob(&self.storage.derived_blob, Bytes::from(json))
            .await;

        Ok(RefreshReport {
            source,
            raw_stored,
            derived_stored,
            derived_len,
        })
    }

    async fn store_blob(&self, name: &str, data: Bytes) -> bool {
        match self.store.store(&self.storage.container, name, data).await {
            Ok(()) => {
                tracing::info!(container = %self.storage.container, blob = name, "uploaded blob");
                true
            }
            Err(err) => {
                tracing::error!(container = %self.storage.container, blob = name, error = %err, "error uploading blob");
                counter!(BLOB_STORE_FAILED, "blob" => name.to_string()).increment(1);
                false
            }
        }
    }
}

#[derive(Debug)]
pub enum Command {
    // Run a refresh outside of the normal schedule. The worker replies with
    // the outcome once the run finishes.
    Refresh(oneshot::Sender<Result<RefreshReport, RefreshError>>),
    // Stop the worker after the current run
    Shutdown,
}

/// Runs the refresh job on a fixed interval until shut down.
pub struct Refresher {
    job: RefreshJob,
    interval: Duration,
    run_on_startup: bool,
    // Set once the first run has completed, whatever its outcome.
    ready: Arc<AtomicBool>,
}

impl Refresher {
    pub fn new(job: RefreshJob, interval: Duration, run_on_startup: bool) -> Self {
        Refresher {
            job,
            interval,
            run_on_startup,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub async fn start(self, mut rx: mpsc::Receiver<Command>) {
        let first_tick = if self.run_on_startup {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut interval = tokio::time::interval_at(first_tick, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                scheduled = interval.tick() => {
                    if is_past_due(scheduled, Instant::now()) {
                        tracing::info!(late_by = ?scheduled.elapsed(), "the refresh timer is past due");
                    }
                    let _ = self.run().await;
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Refresh(reply)) => {
                        let _ = reply.send(self.run().await);
                    }
                    Some(Command::Shutdown) | None => {
                        tracing::info!("refresh worker shutting down");
                        break;
                    }
                },
            }
        }
    }

    async fn run(&self) -> Result<RefreshReport, RefreshError> {
        let start = Instant::now();
        let result = self.job.run_once().await;
        histogram!(REFRESH_DURATION).record(start.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                tracing::info!(
                    source = ?report.source,
                    raw_stored = report.raw_stored,
                    derived_stored = report.derived_stored,
                    elapsed = ?start.elapsed(),
                    "refresh finished"
                );
                counter!(REFRESH_RUNS, "outcome" => "ok").increment(1);
                gauge!(LATEST_BUILDS_ENTRIES).set(report.derived_len as f64);
            }
            Err(err) => {
                tracing::error!(error = %err, "refresh failed");
                counter!(REFRESH_RUNS, "outcome" => "error").increment(1);
            }
        }

        self.ready.store(true, Ordering::Relaxed);
        result
    }
}

fn is_past_due(scheduled: Instant, now: Instant) -> bool {
    now.saturating_duration_since(scheduled) > PAST_DUE_GRACE
}
