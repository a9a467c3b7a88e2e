use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::error::{TransferError, TransferResult};
use crate::state::{UploadBatch, UploadChunk};
use crate::store::TransferStore;
use crate::utils::safe_component;

const COPY_BUFFER: usize = 64 * 1024;

/// A merged archive and its proof of integrity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedArchive {
    pub path: PathBuf,
    /// Hex SHA-256 of the merged file.
    pub checksum: String,
    pub size: u64,
}

/// Concatenates a batch's chunks, in chunk order, into
/// `<store_dir>/<plugin>/<version>/<plugin>-<version><suffix>`.
pub struct ChunkMerger {
    store: Arc<dyn TransferStore>,
    store_dir: PathBuf,
}

impl ChunkMerger {
    pub fn new(store: Arc<dyn TransferStore>, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            store_dir: store_dir.into(),
        }
    }

    pub fn archive_path(&self, batch: &UploadBatch) -> TransferResult<PathBuf> {
        let plugin = batch.plugin_id.replace(' ', "_");
        let file_name = format!("{}-{}{}", plugin, batch.plugin_version, batch.archive_suffix);
        Ok(self
            .store_dir
            .join(safe_component(&plugin)?)
            .join(safe_component(&batch.plugin_version)?)
            .join(safe_component(&file_name)?))
    }

    /// Merge every chunk of `batch_no`. Either the whole archive is written
    /// and the scratch chunks are released, or nothing is left behind and the
    /// chunks stay for a retry.
    pub async fn merge(&self, batch_no: &str) -> TransferResult<MergedArchive> {
        let batch = self
            .store
            .get_batch(batch_no)?
            .ok_or_else(|| TransferError::BatchNotFound(batch_no.to_string()))?;

        let chunks = self.store.chunks(batch_no)?;
        check_complete(batch_no, &chunks)?;

        let target = self.archive_path(&batch)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        let mut part = target.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        info!(batch_no, chunks = chunks.len(), path = %target.display(), "merging chunks");
        let (checksum, size) = match concat(&chunks, &part).await {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&part, &target).await {
            let _ = fs::remove_file(&part).await;
            return Err(TransferError::merge_io(&target, e));
        }

        self.release_scratch(batch_no, &chunks).await?;
        info!(batch_no, size, %checksum, "merge complete");

        Ok(MergedArchive {
            path: target,
            checksum,
            size,
        })
    }

    async fn release_scratch(&self, batch_no: &str, chunks: &[UploadChunk]) -> TransferResult<()> {
        let mut dirs = BTreeSet::new();
        for chunk in chunks {
            if let Err(e) = fs::remove_file(&chunk.saved_path).await {
                warn!(path = %chunk.saved_path.display(), error = %e, "could not remove chunk");
            }
            if let Some(parent) = chunk.saved_path.parent() {
                dirs.insert(parent.to_path_buf());
            }
        }
        self.store.delete_chunks(batch_no)?;

        for dir in dirs {
            // Only an emptied directory goes; anything else still belongs to
            // someone.
            match fs::remove_dir(&dir).await {
                Ok(()) => debug!(dir = %dir.display(), "removed scratch dir"),
                Err(e) => debug!(dir = %dir.display(), error = %e, "scratch dir kept"),
            }
        }
        Ok(())
    }
}

/// Orders must run 1..=n without gaps.
fn check_complete(batch_no: &str, chunks: &[UploadChunk]) -> TransferResult<()> {
    if chunks.is_empty() {
        return Err(TransferError::MissingChunk {
            batch_no: batch_no.to_string(),
            order: 1,
        });
    }
    for (expected, chunk) in (1u32..).zip(chunks) {
        if chunk.chunk_order != expected {
            return Err(TransferError::MissingChunk {
                batch_no: batch_no.to_string(),
                order: expected,
            });
        }
    }
    Ok(())
}

/// Write the chunks into a fresh `out`, hashing as we go.
async fn concat(chunks: &[UploadChunk], out: &Path) -> TransferResult<(String, u64)> {
    let file = File::create(out)
        .await
        .map_err(|e| TransferError::merge_io(out, e))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut size = 0u64;

    for chunk in chunks {
        let mut input = File::open(&chunk.saved_path)
            .await
            .map_err(|e| TransferError::merge_io(&chunk.saved_path, e))?;
        loop {
            let n = input
                .read(&mut buffer)
                .await
                .map_err(|e| TransferError::merge_io(&chunk.saved_path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| TransferError::merge_io(out, e))?;
            size += n as u64;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| TransferError::merge_io(out, e))?;

    Ok((hex::encode(hasher.finalize()), size))
}
