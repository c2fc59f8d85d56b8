//! On-disk cache snapshot format (spec §4.4 Persistence, §6.4 Persisted
//! state layout).
//!
//! One snapshot file per cache entry, named by a hash of its key so
//! arbitrary URIs never have to survive a round trip through the
//! filesystem's naming rules. A snapshot is a fixed 16-byte header (magic +
//! version + creation time) followed by the entry serialized as JSON —
//! "self-describing serialisation" per spec.md §6.4, using `serde_json`
//! since no other serialization crate is already in the workspace stack.
//! Any header mismatch, truncated read, or JSON error causes the snapshot
//! to be silently discarded rather than surfaced as an error: per spec,
//! caches are advisory.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

const MAGIC: [u8; 4] = *b"PMXC";
const VERSION: u32 = 1;

/// Deterministic, filesystem-safe filename for a cache key, per spec.md
/// §6.4's `<urisafe>` — collisions are acceptable (the cache rebuilds from
/// the server on a miss), so a non-cryptographic hash is enough.
pub fn urisafe_filename<K: Hash>(key: &K) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    format!("{:016x}.bin", hasher.finish())
}

pub fn snapshot_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(filename)
}

/// Writes `value` to `path` with the snapshot header, creating parent
/// directories as needed. Best-effort: I/O errors are logged, not
/// propagated, since a failed snapshot write must never fail the caller's
/// request (spec.md §4.4: "not central to correctness").
pub async fn write_snapshot<V: Serialize>(path: &Path, value: &V) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %path.display(), error = %e, "failed to create cache snapshot directory");
            return;
        }
    }

    let payload = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to serialize cache snapshot");
            return;
        }
    };

    let created_at = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

    let mut buf = Vec::with_capacity(4 + 4 + 8 + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&created_at.to_le_bytes());
    buf.extend_from_slice(&payload);

    let tmp_path = path.with_extension("bin.tmp");
    if let Err(e) = tokio::fs::write(&tmp_path, &buf).await {
        warn!(path = %path.display(), error = %e, "failed to write cache snapshot");
        return;
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        warn!(path = %path.display(), error = %e, "failed to finalize cache snapshot");
    }
}

/// Reads and validates a snapshot, returning `None` (and discarding the
/// file) on any malformed header, unknown version, or JSON error.
pub async fn read_snapshot<V: DeserializeOwned>(path: &Path) -> Option<V> {
    let buf = tokio::fs::read(path).await.ok()?;
    if buf.len() < 16 {
        debug!(path = %path.display(), "cache snapshot truncated, discarding");
        return None;
    }
    if buf[0..4] != MAGIC {
        debug!(path = %path.display(), "cache snapshot has unknown magic, discarding");
        return None;
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version != VERSION {
        debug!(path = %path.display(), version, "cache snapshot has unknown version, discarding");
        return None;
    }
    let payload = &buf[16..];
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cache snapshot failed to deserialize, discarding");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.bin");
        write_snapshot(&path, &vec!["a".to_string(), "b".to_string()]).await;
        let restored: Option<Vec<String>> = read_snapshot(&path).await;
        assert_eq!(restored, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn discards_a_file_with_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.bin");
        tokio::fs::write(&path, b"NOTAVALIDHEADERATALLXX").await.unwrap();
        let restored: Option<String> = read_snapshot(&path).await;
        assert_eq!(restored, None);
    }

    #[tokio::test]
    async fn discards_a_file_with_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.bin");
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&999u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(b"\"hi\"");
        tokio::fs::write(&path, &buf).await.unwrap();
        let restored: Option<String> = read_snapshot(&path).await;
        assert_eq!(restored, None);
    }

    #[test]
    fn urisafe_filename_is_deterministic() {
        let a = urisafe_filename(&("file:///x.rs".to_string(), "hash1".to_string()));
        let b = urisafe_filename(&("file:///x.rs".to_string(), "hash1".to_string()));
        assert_eq!(a, b);
        assert!(a.ends_with(".bin"));
    }
}
