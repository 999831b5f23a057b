//! Content fingerprints used as artifact cache keys.
//!
//! Only the first [`FINGERPRINT_PREFIX_BYTES`] of a file are hashed, which keeps
//! fingerprinting a multi-gigabyte library cheap. The price is a known weak
//! spot in deduplication: two files that share their first MiB but differ
//! afterwards get the same fingerprint and therefore share artifacts. For video
//! containers that is rare in practice and accepted; callers must not treat a
//! fingerprint as proof of full-file equality.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

pub const FINGERPRINT_PREFIX_BYTES: u64 = 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Wraps a previously recorded hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub async fn fingerprint_file(path: &Path) -> std::io::Result<ContentFingerprint> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = file.take(FINGERPRINT_PREFIX_BYTES);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(ContentFingerprint(hex::encode(hasher.finalize())))
}
