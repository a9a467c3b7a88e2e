//! Error types for the transfer engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::state::Segment;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised while fetching, ingesting or merging files.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The upstream answered with a status we do not handle.
    #[error("upstream {url} answered with status {status}")]
    Upstream { url: String, status: u16 },

    /// Redirect chain longer than the configured hop limit.
    #[error("more than {limit} redirects while resolving {url}")]
    TooManyRedirects { url: String, limit: usize },

    /// A 301/302 without a usable `Location` header.
    #[error("redirect from {url} carries no Location header")]
    MissingLocation { url: String },

    /// Uploaded content disagrees with the declared checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("upload batch {0} not found")]
    BatchNotFound(String),

    /// Chunk orders are 1-based.
    #[error("invalid chunk order {0}")]
    InvalidChunkOrder(u32),

    /// The batch has a hole in its chunk sequence.
    #[error("batch {batch_no} is missing chunk {order}")]
    MissingChunk { batch_no: String, order: u32 },

    /// A segment still failed after all retries.
    #[error(
        "segment {} (bytes {}-{}) failed after {attempts} attempt(s)",
        .segment.index,
        .segment.start,
        .segment.end
    )]
    SegmentFetchFailed {
        segment: Segment,
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },

    /// The response body did not match the length we asked for.
    #[error("body length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("failed to merge into {}", .path.display())]
    MergeIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("i/o error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsafe or empty file name {0:?}")]
    InvalidFileName(String),

    /// The plugin version already has a merged archive.
    #[error("plugin {plugin_id} {version} was already uploaded")]
    DuplicateUpload { plugin_id: String, version: String },

    #[error("ticket rejected: {reason}")]
    TicketRejected { reason: String },

    /// A worker task panicked or its pool was closed.
    #[error("transfer worker stopped: {0}")]
    Worker(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn merge_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::MergeIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn ticket(reason: impl Into<String>) -> Self {
        TransferError::TicketRejected {
            reason: reason.into(),
        }
    }
}
