use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TransferError, TransferResult};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SEGMENT_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024;

/// Settings shared by the downloader, ingest store and ticket gate.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TransferConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Files larger than this are fetched in parallel segments.
    pub segment_threshold: u64,
    pub segment_size: u64,
    pub concurrency: usize,
    pub prefetch_concurrency: usize,
    pub max_segment_retries: u32,
    pub max_redirects: usize,
    pub buffer_size: usize,
    /// Bytes per second across all workers.
    pub rate_limit: Option<u32>,
    pub proxy: Option<String>,
    /// Scratch root for uploaded chunks, one sub-directory per ticket.
    pub upload_dir: PathBuf,
    /// Root for merged archives, `<plugin>/<version>/<archive>`.
    pub store_dir: PathBuf,
    /// Lifetime of an upload ticket; a token holds one live ticket at a time.
    pub ticket_ttl_secs: i64,
    pub show_progress: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("plugin-mirror/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            segment_threshold: DEFAULT_SEGMENT_SIZE,
            segment_size: DEFAULT_SEGMENT_SIZE,
            concurrency: 5,
            prefetch_concurrency: 5,
            max_segment_retries: 3,
            max_redirects: 10,
            buffer_size: DEFAULT_BUFFER_SIZE,
            rate_limit: None,
            proxy: None,
            upload_dir: PathBuf::from("uploads"),
            store_dir: PathBuf::from("plugins"),
            ticket_ttl_secs: 120,
            show_progress: false,
        }
    }
}

impl TransferConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> TransferResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| TransferError::io(path, e))?;
        let config: TransferConfig = serde_json::from_str(&content)
            .map_err(|e| TransferError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TransferResult<()> {
        if self.segment_size == 0 {
            return Err(TransferError::Config("segment_size must be positive".into()));
        }
        if self.concurrency == 0 || self.prefetch_concurrency == 0 {
            return Err(TransferError::Config("concurrency must be positive".into()));
        }
        if self.buffer_size == 0 {
            return Err(TransferError::Config("buffer_size must be positive".into()));
        }
        if self.rate_limit == Some(0) {
            return Err(TransferError::Config("rate_limit must be positive".into()));
        }
        if self.ticket_ttl_secs <= 0 {
            return Err(TransferError::Config("ticket_ttl_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.json");
        std::fs::write(&path, r#"{"concurrency": 8, "proxy": "http://proxy:8080"}"#).unwrap();

        let config = TransferConfig::load(&path).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.proxy.as_deref(), Some("http://proxy:8080"));
        assert_eq!(config.segment_threshold, 5 * 1024 * 1024);
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.ticket_ttl_secs, 120);
    }

    #[test]
    fn zero_segment_size_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.json");
        std::fs::write(&path, r#"{"segment_size": 0}"#).unwrap();

        assert!(matches!(
            TransferConfig::load(&path),
            Err(TransferError::Config(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            TransferConfig::load(&path),
            Err(TransferError::Config(_))
        ));
    }
}
