use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::fs::{self, OpenOptions};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::fetcher::{FetchSpan, SegmentFetcher, Throttle};
use crate::planner;
use crate::resolver::RedirectResolver;
use crate::state::{Destination, DownloadResult, Segment, TransferTarget};
use crate::utils::safe_component;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}";

/// Resolves, plans and fetches one file at a time, single-stream or in
/// parallel segments depending on its size.
pub struct Downloader {
    config: TransferConfig,
    multi_progress: MultiProgress,
    throttle: Option<Throttle>,
}

impl Downloader {
    pub fn new(config: TransferConfig) -> TransferResult<Self> {
        config.validate()?;

        let multi_progress = MultiProgress::new();
        if config.show_progress {
            multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        } else {
            multi_progress.set_draw_target(ProgressDrawTarget::hidden());
        }

        let throttle = config
            .rate_limit
            .and_then(NonZeroU32::new)
            .map(Throttle::per_second);

        Ok(Self {
            config,
            multi_progress,
            throttle,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Download `target`. An existing destination is trusted as-is unless
    /// `overwrite` is set, and reported with `local_path: None`.
    pub async fn download(
        &self,
        target: &TransferTarget,
        overwrite: bool,
    ) -> TransferResult<DownloadResult> {
        if let Destination::File(path) = &target.destination {
            if !overwrite && path.exists() {
                info!(path = %path.display(), "destination exists, skipping");
                return Ok(DownloadResult::skipped(&target.url));
            }
        }

        let client = target.options.build_client(&self.config.user_agent)?;
        let resolved = RedirectResolver::new(client.clone(), self.config.max_redirects)
            .resolve(target)
            .await?;
        let resolved_target = target.redirected(&resolved.url);

        let filepath = match &resolved_target.destination {
            Destination::File(path) => path.clone(),
            Destination::Directory { dir, .. } => {
                dir.join(safe_component(&resolved.suggested_file_name)?)
            }
        };
        if !overwrite && filepath.exists() {
            info!(path = %filepath.display(), "destination exists, skipping");
            return Ok(DownloadResult::skipped(resolved.url));
        }

        if let Some(parent) = filepath.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransferError::io(parent, e))?;
            }
        }

        let part_filepath = part_path(&filepath);
        let total_size = resolved.content_length;

        // Sized up front so segment writers never extend the file.
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&part_filepath)
            .await
            .map_err(|e| TransferError::io(&part_filepath, e))?;
        file.set_len(total_size.unwrap_or(0))
            .await
            .map_err(|e| TransferError::io(&part_filepath, e))?;
        drop(file);

        let file_name = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pb = self.progress_bar(total_size.unwrap_or(0), &file_name);

        let fetcher = SegmentFetcher::new(
            client,
            resolved_target.options.params.clone(),
            self.config.buffer_size,
            self.throttle.clone(),
        );

        let outcome = match total_size {
            Some(size) if size > self.config.segment_threshold => {
                self.fetch_segments(&fetcher, &resolved_target.url, size, &part_filepath, &pb)
                    .await
            }
            Some(0) => Ok(()),
            expected => {
                debug!(url = %resolved_target.url, "single-stream download");
                fetch_with_retry(
                    &fetcher,
                    &resolved_target.url,
                    FetchSpan::Whole { expected },
                    &part_filepath,
                    &pb,
                    self.config.max_segment_retries,
                )
                .await
                .map(|_| ())
            }
        };

        if let Err(e) = outcome {
            pb.abandon_with_message(format!("Failed      {}", file_name));
            let _ = fs::remove_file(&part_filepath).await;
            return Err(e);
        }

        if overwrite && filepath.exists() {
            fs::remove_file(&filepath)
                .await
                .map_err(|e| TransferError::io(&filepath, e))?;
        }
        fs::rename(&part_filepath, &filepath)
            .await
            .map_err(|e| TransferError::io(&filepath, e))?;

        pb.finish_with_message(format!("Completed   {}", file_name));
        info!(url = %resolved.url, path = %filepath.display(), "download complete");

        Ok(DownloadResult {
            final_url: resolved.url,
            local_path: Some(filepath),
        })
    }

    async fn fetch_segments(
        &self,
        fetcher: &SegmentFetcher,
        url: &str,
        total_size: u64,
        path: &Path,
        pb: &ProgressBar,
    ) -> TransferResult<()> {
        let segments = planner::plan(total_size, self.config.segment_size);
        debug!(
            url,
            total_size,
            segments = segments.len(),
            concurrency = self.config.concurrency,
            "segmented download"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(segments.len());

        for segment in segments {
            let semaphore = semaphore.clone();
            let fetcher = fetcher.clone();
            let url = url.to_string();
            let path = path.to_path_buf();
            let pb = pb.clone();
            let retries = self.config.max_segment_retries;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| TransferError::Worker(e.to_string()))?;
                fetch_with_retry(&fetcher, &url, FetchSpan::Range(segment), &path, &pb, retries)
                    .await
            }));
        }

        // Every segment is awaited before deciding; the first failure in
        // offset order is reported.
        let mut first_error = None;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result.map(|_| ()),
                Err(e) => Err(TransferError::Worker(e.to_string())),
            };
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn progress_bar(&self, total: u64, file_name: &str) -> ProgressBar {
        let pb = self.multi_progress.add(ProgressBar::new(total));
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_message(format!("Downloading {}", file_name));
        pb
    }
}

/// Fetch a span, retrying up to `max_retries` extra times with exponential
/// backoff. The same byte range is requested on every attempt.
async fn fetch_with_retry(
    fetcher: &SegmentFetcher,
    url: &str,
    span: FetchSpan,
    path: &Path,
    progress: &ProgressBar,
    max_retries: u32,
) -> TransferResult<u64> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(url, span, path, progress).await {
            Ok(written) => return Ok(written),
            Err(e) if attempt < max_retries => {
                warn!(url, attempt, error = %e, "fetch failed, retrying");
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt.min(10)))).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(TransferError::SegmentFetchFailed {
                    segment: span_segment(span),
                    attempts: attempt + 1,
                    source: Box::new(e),
                })
            }
        }
    }
}

fn span_segment(span: FetchSpan) -> Segment {
    match span {
        FetchSpan::Range(segment) => segment,
        FetchSpan::Whole { expected } => Segment {
            index: 0,
            start: 0,
            end: expected.unwrap_or(0),
            is_final: true,
        },
    }
}

/// `<name>.<ext>.part` next to the final file.
fn part_path(filepath: &Path) -> PathBuf {
    let mut part_filepath = filepath.to_path_buf();
    if let Some(extension) = filepath.extension() {
        let mut ext = extension.to_os_string();
        ext.push(".part");
        part_filepath.set_extension(ext);
    } else {
        part_filepath.set_extension("part");
    }
    part_filepath
}
