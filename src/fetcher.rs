use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use indicatif::ProgressBar;
use reqwest::{header, Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};

use crate::error::{TransferError, TransferResult};
use crate::state::Segment;

/// Byte-rate limiter shared by every worker of a downloader.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    burst: NonZeroU32,
}

impl Throttle {
    pub fn per_second(bytes: NonZeroU32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(bytes))),
            burst: bytes,
        }
    }

    async fn wait_for(&self, len: usize) {
        let mut remaining = len as u64;
        while remaining > 0 {
            let step = remaining.min(self.burst.get() as u64) as u32;
            if let Some(n) = NonZeroU32::new(step) {
                // n never exceeds the burst size, so capacity is always sufficient
                let _ = self.limiter.until_n_ready(n).await;
            }
            remaining -= step as u64;
        }
    }
}

/// What part of the resource one GET covers.
#[derive(Debug, Clone, Copy)]
pub enum FetchSpan {
    /// Plain GET of the whole body, written from offset 0.
    Whole { expected: Option<u64> },
    /// Ranged GET written at the segment's start offset.
    Range(Segment),
}

impl FetchSpan {
    fn offset(&self) -> u64 {
        match self {
            FetchSpan::Whole { .. } => 0,
            FetchSpan::Range(segment) => segment.start,
        }
    }

    fn expected(&self) -> Option<u64> {
        match self {
            FetchSpan::Whole { expected } => *expected,
            FetchSpan::Range(segment) => Some(segment.len()),
        }
    }
}

/// Streams one GET into a preallocated file at a fixed offset.
///
/// A failure leaves the span partially written; retrying is up to the caller.
#[derive(Clone)]
pub struct SegmentFetcher {
    client: Client,
    params: Vec<(String, String)>,
    buffer_size: usize,
    throttle: Option<Throttle>,
}

impl SegmentFetcher {
    pub fn new(
        client: Client,
        params: Vec<(String, String)>,
        buffer_size: usize,
        throttle: Option<Throttle>,
    ) -> Self {
        Self {
            client,
            params,
            buffer_size,
            throttle,
        }
    }

    /// Fetch `span` into `path`. Bytes counted on `progress` by a failed
    /// attempt are taken back off, so retries never push the bar past its
    /// length.
    pub async fn fetch(
        &self,
        url: &str,
        span: FetchSpan,
        path: &Path,
        progress: &ProgressBar,
    ) -> TransferResult<u64> {
        let mut counted = 0;
        let result = self.transfer(url, span, path, progress, &mut counted).await;
        if result.is_err() && counted > 0 {
            progress.dec(counted);
        }
        result
    }

    async fn transfer(
        &self,
        url: &str,
        span: FetchSpan,
        path: &Path,
        progress: &ProgressBar,
        counted: &mut u64,
    ) -> TransferResult<u64> {
        let mut request = self.client.get(url).query(&self.params);
        if let FetchSpan::Range(segment) = &span {
            request = request.header(header::RANGE, segment.range_header());
        }

        let response = request.send().await?;
        let status = response.status();
        let accepted = match span {
            FetchSpan::Range(_) => status == StatusCode::PARTIAL_CONTENT,
            FetchSpan::Whole { .. } => status == StatusCode::OK,
        };
        if !accepted {
            return Err(TransferError::Upstream {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| TransferError::io(path, e))?;
        file.seek(SeekFrom::Start(span.offset()))
            .await
            .map_err(|e| TransferError::io(path, e))?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);

        let expected = span.expected();
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(item) = stream.next().await {
            let chunk = item?;
            if chunk.is_empty() {
                continue;
            }
            if let Some(expected) = expected {
                if written + chunk.len() as u64 > expected {
                    return Err(TransferError::LengthMismatch {
                        expected,
                        actual: written + chunk.len() as u64,
                    });
                }
            }
            if let Some(throttle) = &self.throttle {
                throttle.wait_for(chunk.len()).await;
            }
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(path, e))?;
            written += chunk.len() as u64;
            *counted = written;
            progress.inc(chunk.len() as u64);
        }

        writer.flush().await.map_err(|e| TransferError::io(path, e))?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(TransferError::LengthMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        Ok(written)
    }
}
