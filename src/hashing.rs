use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{TransferError, TransferResult};

/// Lower-case hex SHA-256 of an in-memory buffer.
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lower-case hex SHA-256 of a file, read in 8 KiB blocks.
pub async fn calculate_hash(filepath: &Path) -> TransferResult<String> {
    let mut file = File::open(filepath)
        .await
        .map_err(|e| TransferError::io(filepath, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| TransferError::io(filepath, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a computed digest against a caller-declared one, ignoring case.
pub fn verify(expected: &str, actual: &str) -> TransferResult<()> {
    if expected.trim().eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(TransferError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn file_and_buffer_digests_agree() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        assert_eq!(calculate_hash(&path).await.unwrap(), HELLO_SHA256);
        assert_eq!(digest_bytes(b"hello world"), HELLO_SHA256);
    }

    #[test]
    fn verify_ignores_case() {
        assert!(verify(&HELLO_SHA256.to_uppercase(), HELLO_SHA256).is_ok());
        assert!(matches!(
            verify("00", HELLO_SHA256),
            Err(TransferError::ChecksumMismatch { .. })
        ));
    }
}
