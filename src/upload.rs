use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::ingest::{ChunkIngestStore, IncomingChunk};
use crate::merger::{ChunkMerger, MergedArchive};
use crate::state::{ArchiveRecord, TicketStep, TransferTicket, UploadBatch, UploadChunk};
use crate::store::TransferStore;
use crate::ticket::TicketGate;
use crate::utils::safe_component;

/// What the client declares about the archive it is about to upload.
#[derive(Debug, Clone)]
pub struct UploadManifest {
    pub plugin_id: String,
    pub plugin_version: String,
    pub archive_name: String,
    pub since_build: Option<String>,
    pub until_build: Option<String>,
}

/// Ticket-gated upload workflow: acquire a ticket, submit the manifest,
/// start chunking, upload chunks, merge.
pub struct UploadService {
    gate: TicketGate,
    ingest: ChunkIngestStore,
    merger: ChunkMerger,
    store: Arc<dyn TransferStore>,
}

impl UploadService {
    pub fn new(store: Arc<dyn TransferStore>, config: &TransferConfig) -> Self {
        Self {
            gate: TicketGate::new(store.clone(), config.ticket_ttl_secs),
            ingest: ChunkIngestStore::new(store.clone(), &config.upload_dir),
            merger: ChunkMerger::new(store.clone(), &config.store_dir),
            store,
        }
    }

    pub fn acquire_ticket(&self, access_token: &str, user_name: &str) -> TransferResult<TransferTicket> {
        self.gate.issue(access_token, user_name)
    }

    /// Record the batch the ticket will upload. Moves the ticket to
    /// `SpecChecked`.
    pub fn submit_manifest(
        &self,
        ticket: &str,
        access_token: &str,
        manifest: UploadManifest,
    ) -> TransferResult<UploadBatch> {
        self.gate.check(ticket, access_token, TicketStep::Issued)?;
        self.ensure_not_uploaded(&manifest.plugin_id, &manifest.plugin_version)?;

        let archive_name = safe_component(&manifest.archive_name)?;
        let archive_suffix = archive_name
            .rfind('.')
            .map(|i| archive_name[i..].to_string())
            .ok_or_else(|| TransferError::InvalidFileName(manifest.archive_name.clone()))?;

        let batch = UploadBatch {
            batch_no: Uuid::new_v4().simple().to_string(),
            ticket: ticket.to_string(),
            plugin_id: manifest.plugin_id,
            plugin_version: manifest.plugin_version,
            archive_name,
            archive_suffix,
            since_build: manifest.since_build,
            until_build: manifest.until_build,
        };
        // Validates the id and version as path components before anything
        // is recorded.
        self.merger.archive_path(&batch)?;

        self.store.insert_batch(batch.clone())?;
        self.gate.advance(ticket, access_token, TicketStep::Issued)?;
        info!(batch_no = %batch.batch_no, plugin = %batch.plugin_id, version = %batch.plugin_version, "upload batch declared");
        Ok(batch)
    }

    pub fn begin_chunking(&self, ticket: &str, access_token: &str) -> TransferResult<TransferTicket> {
        self.gate.advance(ticket, access_token, TicketStep::SpecChecked)
    }

    pub async fn upload_chunk(
        &self,
        ticket: &str,
        access_token: &str,
        chunk: IncomingChunk,
    ) -> TransferResult<UploadChunk> {
        self.gate.check(ticket, access_token, TicketStep::Chunking)?;
        self.owned_batch(ticket, &chunk.batch_no)?;
        self.ingest.put(ticket, chunk).await
    }

    /// Merge the batch and record the archive's checksum as its download
    /// metadata.
    pub async fn merge(
        &self,
        ticket: &str,
        access_token: &str,
        batch_no: &str,
    ) -> TransferResult<MergedArchive> {
        self.gate.check(ticket, access_token, TicketStep::Chunking)?;
        let batch = self.owned_batch(ticket, batch_no)?;
        self.ensure_not_uploaded(&batch.plugin_id, &batch.plugin_version)?;

        let merged = self.merger.merge(batch_no).await?;
        self.store.insert_archive(ArchiveRecord {
            plugin_id: batch.plugin_id,
            plugin_version: batch.plugin_version,
            archive_name: batch.archive_name,
            path: merged.path.clone(),
            checksum: merged.checksum.clone(),
            size: merged.size,
        })?;
        Ok(merged)
    }

    fn owned_batch(&self, ticket: &str, batch_no: &str) -> TransferResult<UploadBatch> {
        let batch = self
            .store
            .get_batch(batch_no)?
            .ok_or_else(|| TransferError::BatchNotFound(batch_no.to_string()))?;
        if batch.ticket != ticket {
            warn!(batch_no, ticket, "batch declared by another ticket");
            return Err(TransferError::ticket("batch belongs to another ticket"));
        }
        Ok(batch)
    }

    fn ensure_not_uploaded(&self, plugin_id: &str, version: &str) -> TransferResult<()> {
        if self.store.get_archive(plugin_id, version)?.is_some() {
            return Err(TransferError::DuplicateUpload {
                plugin_id: plugin_id.to_string(),
                version: version.to_string(),
            });
        }
        Ok(())
    }
}
