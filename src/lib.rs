//! Segmented file transfer for a plugin repository mirror.
//!
//! The fetch side resolves redirects and downloads archives single-stream or
//! in parallel byte ranges. The ingest side takes ticket-gated chunk uploads,
//! checks their digests and merges them, in order, into the final archive.

pub mod config;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod hashing;
pub mod ingest;
pub mod merger;
pub mod planner;
pub mod prefetch;
pub mod request;
pub mod resolver;
pub mod state;
pub mod store;
pub mod ticket;
pub mod upload;
pub mod utils;

pub use config::TransferConfig;
pub use downloader::Downloader;
pub use error::{TransferError, TransferResult};
pub use ingest::{ChunkIngestStore, IncomingChunk};
pub use merger::{ChunkMerger, MergedArchive};
pub use prefetch::{PrefetchReport, Prefetcher};
pub use request::RequestOptions;
pub use resolver::{RedirectResolver, ResolvedTarget};
pub use state::{
    ArchiveRecord, Destination, DownloadResult, Segment, TicketStep, TransferTarget, TransferTicket, UploadBatch,
    UploadChunk,
};
pub use store::{MemoryStore, TransferStore};
pub use ticket::TicketGate;
pub use upload::{UploadManifest, UploadService};
