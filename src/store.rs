//! Metadata storage seam for upload batches, chunks, tickets and merged
//! archive records.
//!
//! The engine only needs simple select/insert/update calls. `MemoryStore`
//! backs tests and the CLI; a relational store plugs in by implementing
//! [`TransferStore`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::TransferResult;
use crate::state::{ArchiveRecord, TicketStep, TransferTicket, UploadBatch, UploadChunk};

pub trait TransferStore: Send + Sync {
    fn insert_batch(&self, batch: UploadBatch) -> TransferResult<()>;

    fn get_batch(&self, batch_no: &str) -> TransferResult<Option<UploadBatch>>;

    /// Insert or replace the chunk at `(batch_no, chunk_order)`. Returns the
    /// replaced row, if any.
    fn upsert_chunk(&self, chunk: UploadChunk) -> TransferResult<Option<UploadChunk>>;

    /// All chunks of a batch, ascending by `chunk_order`.
    fn chunks(&self, batch_no: &str) -> TransferResult<Vec<UploadChunk>>;

    fn delete_chunks(&self, batch_no: &str) -> TransferResult<()>;

    fn insert_ticket(&self, ticket: TransferTicket) -> TransferResult<()>;

    fn get_ticket(&self, ticket: &str) -> TransferResult<Option<TransferTicket>>;

    /// Most recent ticket for `access_token` created strictly after `since`.
    fn latest_ticket_after(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> TransferResult<Option<TransferTicket>>;

    fn update_ticket_step(&self, ticket: &str, step: TicketStep) -> TransferResult<()>;

    fn insert_archive(&self, record: ArchiveRecord) -> TransferResult<()>;

    fn get_archive(&self, plugin_id: &str, version: &str) -> TransferResult<Option<ArchiveRecord>>;
}

#[derive(Default)]
struct Tables {
    batches: HashMap<String, UploadBatch>,
    chunks: BTreeMap<(String, u32), UploadChunk>,
    tickets: HashMap<String, TransferTicket>,
    archives: HashMap<(String, String), ArchiveRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferStore for MemoryStore {
    fn insert_batch(&self, batch: UploadBatch) -> TransferResult<()> {
        self.tables
            .lock()
            .batches
            .insert(batch.batch_no.clone(), batch);
        Ok(())
    }

    fn get_batch(&self, batch_no: &str) -> TransferResult<Option<UploadBatch>> {
        Ok(self.tables.lock().batches.get(batch_no).cloned())
    }

    fn upsert_chunk(&self, chunk: UploadChunk) -> TransferResult<Option<UploadChunk>> {
        let key = (chunk.batch_no.clone(), chunk.chunk_order);
        Ok(self.tables.lock().chunks.insert(key, chunk))
    }

    fn chunks(&self, batch_no: &str) -> TransferResult<Vec<UploadChunk>> {
        let tables = self.tables.lock();
        let range = (batch_no.to_string(), u32::MIN)..=(batch_no.to_string(), u32::MAX);
        Ok(tables.chunks.range(range).map(|(_, c)| c.clone()).collect())
    }

    fn delete_chunks(&self, batch_no: &str) -> TransferResult<()> {
        self.tables
            .lock()
            .chunks
            .retain(|(batch, _), _| batch != batch_no);
        Ok(())
    }

    fn insert_ticket(&self, ticket: TransferTicket) -> TransferResult<()> {
        self.tables
            .lock()
            .tickets
            .insert(ticket.ticket.clone(), ticket);
        Ok(())
    }

    fn get_ticket(&self, ticket: &str) -> TransferResult<Option<TransferTicket>> {
        Ok(self.tables.lock().tickets.get(ticket).cloned())
    }

    fn latest_ticket_after(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> TransferResult<Option<TransferTicket>> {
        Ok(self
            .tables
            .lock()
            .tickets
            .values()
            .filter(|t| t.access_token == access_token && t.created_at > since)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    fn update_ticket_step(&self, ticket: &str, step: TicketStep) -> TransferResult<()> {
        if let Some(t) = self.tables.lock().tickets.get_mut(ticket) {
            t.step = step;
        }
        Ok(())
    }

    fn insert_archive(&self, record: ArchiveRecord) -> TransferResult<()> {
        let key = (record.plugin_id.clone(), record.plugin_version.clone());
        self.tables.lock().archives.insert(key, record);
        Ok(())
    }

    fn get_archive(&self, plugin_id: &str, version: &str) -> TransferResult<Option<ArchiveRecord>> {
        let key = (plugin_id.to_string(), version.to_string());
        Ok(self.tables.lock().archives.get(&key).cloned())
    }
}
