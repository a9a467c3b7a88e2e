use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{TransferError, TransferResult};
use crate::hashing;
use crate::state::UploadChunk;
use crate::store::TransferStore;
use crate::utils::safe_component;

/// One chunk as received from the upload endpoint.
#[derive(Debug, Clone)]
pub struct IncomingChunk {
    pub batch_no: String,
    /// 1-based position in the final archive.
    pub chunk_order: u32,
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Hex SHA-256 declared by the client.
    pub checksum: String,
}

/// Verifies and stores uploaded chunks under `<upload_dir>/<scratch>/`.
pub struct ChunkIngestStore {
    store: Arc<dyn TransferStore>,
    upload_dir: PathBuf,
}

impl ChunkIngestStore {
    pub fn new(store: Arc<dyn TransferStore>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            upload_dir: upload_dir.into(),
        }
    }

    /// Store a chunk under the scratch directory of `scratch` (the upload
    /// ticket). A chunk whose digest disagrees with its declared checksum is
    /// neither written nor recorded. Re-sending an order replaces it.
    pub async fn put(&self, scratch: &str, chunk: IncomingChunk) -> TransferResult<UploadChunk> {
        if chunk.chunk_order == 0 {
            return Err(TransferError::InvalidChunkOrder(chunk.chunk_order));
        }
        if self.store.get_batch(&chunk.batch_no)?.is_none() {
            return Err(TransferError::BatchNotFound(chunk.batch_no));
        }

        let actual = hashing::digest_bytes(&chunk.bytes);
        if let Err(e) = hashing::verify(&chunk.checksum, &actual) {
            warn!(
                batch_no = %chunk.batch_no,
                order = chunk.chunk_order,
                expected = %chunk.checksum,
                actual = %actual,
                "chunk checksum mismatch"
            );
            return Err(e);
        }

        let dir = self.upload_dir.join(safe_component(scratch)?);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransferError::io(&dir, e))?;

        // The order prefix keeps chunks apart even when a client reuses one
        // file name for every chunk.
        let name = format!("{}-{}", chunk.chunk_order, safe_component(&chunk.file_name)?);
        let saved_path = dir.join(&name);
        let staging = dir.join(format!("{name}.tmp"));
        fs::write(&staging, &chunk.bytes)
            .await
            .map_err(|e| TransferError::io(&staging, e))?;
        fs::rename(&staging, &saved_path)
            .await
            .map_err(|e| TransferError::io(&saved_path, e))?;

        let record = UploadChunk {
            batch_no: chunk.batch_no,
            chunk_order: chunk.chunk_order,
            saved_path,
        };
        if let Some(replaced) = self.store.upsert_chunk(record.clone())? {
            if replaced.saved_path != record.saved_path {
                let _ = fs::remove_file(&replaced.saved_path).await;
            }
            debug!(batch_no = %record.batch_no, order = record.chunk_order, "chunk replaced");
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UploadBatch;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (Arc<MemoryStore>, ChunkIngestStore) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_batch(UploadBatch {
                batch_no: "batch".into(),
                ticket: "ticket".into(),
                plugin_id: "org.example".into(),
                plugin_version: "1.0".into(),
                archive_name: "example.zip".into(),
                archive_suffix: ".zip".into(),
                since_build: None,
                until_build: None,
            })
            .unwrap();
        let ingest = ChunkIngestStore::new(store.clone(), tmp.path());
        (store, ingest)
    }

    fn incoming(order: u32, bytes: &[u8]) -> IncomingChunk {
        IncomingChunk {
            batch_no: "batch".into(),
            chunk_order: order,
            file_name: "example.zip".into(),
            bytes: bytes.to_vec(),
            checksum: hashing::digest_bytes(bytes),
        }
    }

    #[tokio::test]
    async fn stores_verified_chunk() {
        let tmp = TempDir::new().unwrap();
        let (store, ingest) = setup(&tmp);

        let saved = ingest.put("ticket", incoming(1, b"abc")).await.unwrap();

        assert_eq!(saved.saved_path, tmp.path().join("ticket").join("1-example.zip"));
        assert_eq!(std::fs::read(&saved.saved_path).unwrap(), b"abc");
        assert_eq!(store.chunks("batch").unwrap(), vec![saved]);
    }

    #[tokio::test]
    async fn mismatch_is_rejected_and_keeps_previous_chunk() {
        let tmp = TempDir::new().unwrap();
        let (store, ingest) = setup(&tmp);
        let first = ingest.put("ticket", incoming(1, b"good")).await.unwrap();

        let mut bad = incoming(1, b"evil");
        bad.checksum = hashing::digest_bytes(b"something else");
        let err = ingest.put("ticket", bad).await.unwrap_err();

        assert!(matches!(err, TransferError::ChecksumMismatch { .. }));
        assert_eq!(store.chunks("batch").unwrap(), vec![first.clone()]);
        assert_eq!(std::fs::read(&first.saved_path).unwrap(), b"good");
    }

    #[tokio::test]
    async fn resend_overwrites_same_order() {
        let tmp = TempDir::new().unwrap();
        let (store, ingest) = setup(&tmp);
        ingest.put("ticket", incoming(2, b"first try")).await.unwrap();
        let second = ingest.put("ticket", incoming(2, b"second try")).await.unwrap();

        let chunks = store.chunks("batch").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(std::fs::read(&second.saved_path).unwrap(), b"second try");
    }

    #[tokio::test]
    async fn traversal_in_file_name_stays_inside_scratch_dir() {
        let tmp = TempDir::new().unwrap();
        let (_, ingest) = setup(&tmp);
        let mut chunk = incoming(1, b"x");
        chunk.file_name = "../../escape.zip".into();

        let saved = ingest.put("ticket", chunk).await.unwrap();
        assert_eq!(saved.saved_path.parent().unwrap(), tmp.path().join("ticket"));
    }

    #[tokio::test]
    async fn unknown_batch_and_zero_order_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let (_, ingest) = setup(&tmp);

        let mut orphan = incoming(1, b"x");
        orphan.batch_no = "nope".into();
        assert!(matches!(
            ingest.put("ticket", orphan).await,
            Err(TransferError::BatchNotFound(_))
        ));
        assert!(matches!(
            ingest.put("ticket", incoming(0, b"x")).await,
            Err(TransferError::InvalidChunkOrder(0))
        ));
    }
}
