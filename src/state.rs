use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::RequestOptions;

/// Where a download lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Exact file path chosen by the caller.
    File(PathBuf),
    /// Directory plus the name used when the response suggests none.
    Directory { dir: PathBuf, default_name: String },
}

/// One download attempt. Redirect resolution builds a new target instead of
/// mutating this one.
#[derive(Debug, Clone)]
pub struct TransferTarget {
    pub url: String,
    pub options: RequestOptions,
    pub destination: Destination,
}

impl TransferTarget {
    pub fn new(url: impl Into<String>, destination: Destination) -> Self {
        Self {
            url: url.into(),
            options: RequestOptions::default(),
            destination,
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn redirected(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: self.options.clone(),
            destination: self.destination.clone(),
        }
    }
}

/// Contiguous byte range of a file fetched by exactly one worker.
///
/// `end` is inclusive, except on the final segment where it equals the total
/// size. [`Segment::range_header`] clamps that back to `size - 1`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub is_final: bool,
}

impl Segment {
    /// Number of bytes this segment covers on disk.
    pub fn len(&self) -> u64 {
        if self.is_final {
            self.end - self.start
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last byte offset to request, always inclusive.
    pub fn last_byte(&self) -> u64 {
        if self.is_final {
            self.end.saturating_sub(1)
        } else {
            self.end
        }
    }

    /// Value of the HTTP `Range` header for this segment.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.last_byte())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub final_url: String,
    /// `None` when the file already existed and overwrite was off.
    pub local_path: Option<PathBuf>,
}

impl DownloadResult {
    pub fn skipped(final_url: impl Into<String>) -> Self {
        Self {
            final_url: final_url.into(),
            local_path: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.local_path.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    pub batch_no: String,
    /// Ticket that declared the batch; only it may add chunks or merge.
    pub ticket: String,
    pub plugin_id: String,
    pub plugin_version: String,
    pub archive_name: String,
    pub archive_suffix: String,
    pub since_build: Option<String>,
    pub until_build: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    pub batch_no: String,
    pub chunk_order: u32,
    pub saved_path: PathBuf,
}

impl UploadChunk {
    pub fn saved_path(&self) -> &Path {
        &self.saved_path
    }
}

/// Download metadata of a merged archive, one row per plugin version.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub plugin_id: String,
    pub plugin_version: String,
    pub archive_name: String,
    pub path: PathBuf,
    /// Hex SHA-256 of the merged file.
    pub checksum: String,
    pub size: u64,
}

/// Position of a ticket in the upload workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TicketStep {
    Issued = 0,
    SpecChecked = 1,
    Chunking = 2,
}

impl TicketStep {
    pub fn next(self) -> Option<TicketStep> {
        match self {
            TicketStep::Issued => Some(TicketStep::SpecChecked),
            TicketStep::SpecChecked => Some(TicketStep::Chunking),
            TicketStep::Chunking => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransferTicket {
    pub ticket: String,
    pub access_token: String,
    pub user_name: String,
    pub step: TicketStep,
    pub created_at: DateTime<Utc>,
}
