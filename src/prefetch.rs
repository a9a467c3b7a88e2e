use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::downloader::Downloader;
use crate::error::{TransferError, TransferResult};
use crate::state::{DownloadResult, TransferTarget};

/// Outcome of one prefetched target.
#[derive(Debug)]
pub struct PrefetchReport {
    pub url: String,
    pub result: TransferResult<DownloadResult>,
}

/// Background archive prefetching on its own bounded pool. One failing target
/// never stops the others.
pub struct Prefetcher {
    downloader: Arc<Downloader>,
    semaphore: Arc<Semaphore>,
}

impl Prefetcher {
    pub fn new(downloader: Arc<Downloader>) -> Self {
        let concurrency = downloader.config().prefetch_concurrency;
        Self {
            downloader,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Fetch every target that is not already on disk. Reports come back in
    /// input order.
    pub async fn run(&self, targets: Vec<TransferTarget>) -> Vec<PrefetchReport> {
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let downloader = self.downloader.clone();
            let semaphore = self.semaphore.clone();
            let url = target.url.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| TransferError::Worker(e.to_string()))?;
                downloader.download(&target, false).await
            });
            handles.push((url, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (url, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(TransferError::Worker(e.to_string())),
            };
            match &result {
                Ok(done) if done.is_skipped() => info!(%url, "already cached"),
                Ok(_) => info!(%url, "prefetched"),
                Err(e) => warn!(%url, error = %e, "prefetch failed"),
            }
            reports.push(PrefetchReport { url, result });
        }
        reports
    }
}
