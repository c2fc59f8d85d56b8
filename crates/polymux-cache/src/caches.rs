//! The three caches named in spec §4.4, their default bounds, and the
//! invalidation rules that keep them honest.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use polymux_types::Symbol;

use crate::bounded::{BoundedCache, CacheStats};
use crate::snapshot;

const MIB: usize = 1024 * 1024;

/// `(document URI, content hash)` — both the raw-response and symbol-tree
/// caches key on this pair so an edit invalidates every cached derivative
/// of the old content without the cache needing to parse hashes itself
/// (spec §4.4 table).
pub type ContentKey = (String, String);

/// A cached file's text alongside the metadata used to detect staleness
/// (spec §4.4: "on detected change of file mtime relative to cached
/// size/mtime, the entry is treated as stale").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentEntry {
    pub text: String,
    pub mtime_unix_secs: u64,
    pub size: u64,
}

fn json_size(v: &Value) -> usize {
    serde_json::to_string(v).map(|s| s.len()).unwrap_or(0)
}

fn symbol_size(s: &Arc<Symbol>) -> usize {
    // A real object-graph walk would double-count shared structure; a flat
    // estimate from the serialized form is cheap and good enough for a
    // soft memory bound.
    serde_json::to_string(s.as_ref()).map(|s| s.len()).unwrap_or(0)
}

fn file_content_size(e: &FileContentEntry) -> usize {
    e.text.len()
}

/// Raw, unprocessed `textDocument/documentSymbol` responses (spec §4.4:
/// 1000 entries / 200 MiB default).
pub struct RawSymbolCache {
    inner: BoundedCache<ContentKey, Value>,
}

impl RawSymbolCache {
    pub fn new() -> Self {
        Self::with_bounds(1000, 200 * MIB)
    }

    pub fn with_bounds(max_entries: usize, max_bytes: usize) -> Self {
        RawSymbolCache {
            inner: BoundedCache::new(max_entries, max_bytes, json_size),
        }
    }

    pub fn get(&self, uri: &str, content_hash: &str) -> Option<Value> {
        self.inner.get(&(uri.to_string(), content_hash.to_string()))
    }

    pub fn insert(&self, uri: &str, content_hash: &str, value: Value) {
        self.inner.insert((uri.to_string(), content_hash.to_string()), value);
    }

    /// Purges every entry for `uri`, regardless of content hash (spec §4.4:
    /// "on any edit to a file, all cache entries keyed by that URI are
    /// purged").
    pub fn purge_uri(&self, uri: &str) -> usize {
        self.inner.retain_remove(|(u, _)| u == uri)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    pub async fn save_snapshot(&self, cache_dir: &Path) {
        for (key, value) in self.inner.entries() {
            let filename = snapshot::urisafe_filename(&key);
            let path = snapshot::snapshot_path(&cache_dir.join("raw_symbols"), &filename);
            snapshot::write_snapshot(&path, &value).await;
        }
    }

    /// Loads one previously-snapshotted entry back in, if present and
    /// valid. Snapshots are opportunistic: callers look one up by key when
    /// they would otherwise have to ask the server.
    pub async fn load_snapshot(&self, cache_dir: &Path, uri: &str, content_hash: &str) -> Option<Value> {
        let key = (uri.to_string(), content_hash.to_string());
        let filename = snapshot::urisafe_filename(&key);
        let path = snapshot::snapshot_path(&cache_dir.join("raw_symbols"), &filename);
        let value: Value = snapshot::read_snapshot(&path).await?;
        self.inner.insert(key, value.clone());
        Some(value)
    }
}

impl Default for RawSymbolCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Processed symbol trees, one root per `(uri, content_hash)` (spec §4.4:
/// 500 entries / 100 MiB default).
pub struct SymbolTreeCache {
    inner: BoundedCache<ContentKey, Arc<Symbol>>,
}

impl SymbolTreeCache {
    pub fn new() -> Self {
        Self::with_bounds(500, 100 * MIB)
    }

    pub fn with_bounds(max_entries: usize, max_bytes: usize) -> Self {
        SymbolTreeCache {
            inner: BoundedCache::new(max_entries, max_bytes, symbol_size),
        }
    }

    pub fn get(&self, uri: &str, content_hash: &str) -> Option<Arc<Symbol>> {
        self.inner.get(&(uri.to_string(), content_hash.to_string()))
    }

    pub fn insert(&self, uri: &str, content_hash: &str, root: Arc<Symbol>) {
        self.inner.insert((uri.to_string(), content_hash.to_string()), root);
    }

    pub fn purge_uri(&self, uri: &str) -> usize {
        self.inner.retain_remove(|(u, _)| u == uri)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    pub async fn save_snapshot(&self, cache_dir: &Path) {
        for (key, root) in self.inner.entries() {
            let filename = snapshot::urisafe_filename(&key);
            let path = snapshot::snapshot_path(&cache_dir.join("symbol_trees"), &filename);
            snapshot::write_snapshot(&path, root.as_ref()).await;
        }
    }

    pub async fn load_snapshot(&self, cache_dir: &Path, uri: &str, content_hash: &str) -> Option<Arc<Symbol>> {
        let key = (uri.to_string(), content_hash.to_string());
        let filename = snapshot::urisafe_filename(&key);
        let path = snapshot::snapshot_path(&cache_dir.join("symbol_trees"), &filename);
        let symbol: Symbol = snapshot::read_snapshot(&path).await?;
        let root = Arc::new(symbol);
        self.inner.insert(key, root.clone());
        Some(root)
    }
}

impl Default for SymbolTreeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk file contents plus the metadata needed to detect staleness
/// (spec §4.4: 200 entries / 50 MiB default). Unlike the other two caches
/// this one is not snapshotted to disk (spec.md §6.4 only names
/// `raw_symbols/` and `symbol_trees/`) since the source of truth is already
/// on disk.
pub struct FileContentCache {
    inner: BoundedCache<String, FileContentEntry>,
}

impl FileContentCache {
    pub fn new() -> Self {
        Self::with_bounds(200, 50 * MIB)
    }

    pub fn with_bounds(max_entries: usize, max_bytes: usize) -> Self {
        FileContentCache {
            inner: BoundedCache::new(max_entries, max_bytes, file_content_size),
        }
    }

    /// Returns the cached text only if `mtime`/`size` still match what was
    /// cached; otherwise treats the entry as stale, evicts it, and returns
    /// `None` (spec §4.4 Invalidation).
    pub fn get_if_fresh(&self, path: &str, mtime_unix_secs: u64, size: u64) -> Option<String> {
        match self.inner.get(&path.to_string()) {
            Some(entry) if entry.mtime_unix_secs == mtime_unix_secs && entry.size == size => Some(entry.text),
            Some(_) => {
                debug!(path, "file content cache entry stale, evicting");
                self.inner.remove(&path.to_string());
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, path: &str, text: String, mtime_unix_secs: u64, size: u64) {
        self.inner.insert(path.to_string(), FileContentEntry { text, mtime_unix_secs, size });
    }

    pub fn purge(&self, path: &str) -> Option<FileContentEntry> {
        self.inner.remove(&path.to_string())
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Default for FileContentCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn system_time_to_unix_secs(time: SystemTime) -> u64 {
    time.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymux_types::{Position, Range, SymbolKind};

    fn sample_symbol() -> Arc<Symbol> {
        Arc::new(Symbol {
            name: "foo".to_string(),
            kind: SymbolKind::Function,
            location: Range::new(Position::new(0, 0), Position::new(5, 0)),
            selection_range: Range::new(Position::new(0, 3), Position::new(0, 6)),
            body: None,
            children: Arc::from(vec![]),
            parent_name_path: None,
            name_path: "foo".to_string(),
        })
    }

    #[test]
    fn raw_symbol_cache_round_trips() {
        let cache = RawSymbolCache::with_bounds(10, 1_000_000);
        cache.insert("file:///a.rs", "h1", serde_json::json!([{"name": "foo"}]));
        assert!(cache.get("file:///a.rs", "h1").is_some());
        assert!(cache.get("file:///a.rs", "h2").is_none());
    }

    #[test]
    fn purge_uri_removes_every_hash_variant() {
        let cache = RawSymbolCache::with_bounds(10, 1_000_000);
        cache.insert("file:///a.rs", "h1", serde_json::json!([]));
        cache.insert("file:///a.rs", "h2", serde_json::json!([]));
        cache.insert("file:///b.rs", "h1", serde_json::json!([]));
        let removed = cache.purge_uri("file:///a.rs");
        assert_eq!(removed, 2);
        assert!(cache.get("file:///b.rs", "h1").is_some());
    }

    #[test]
    fn symbol_tree_cache_stores_arc_roots() {
        let cache = SymbolTreeCache::with_bounds(10, 1_000_000);
        cache.insert("file:///a.rs", "h1", sample_symbol());
        let root = cache.get("file:///a.rs", "h1").unwrap();
        assert_eq!(root.name, "foo");
    }

    #[test]
    fn file_content_cache_detects_mtime_staleness() {
        let cache = FileContentCache::with_bounds(10, 1_000_000);
        cache.insert("/tmp/a.rs", "fn main() {}".to_string(), 100, 12);
        assert_eq!(cache.get_if_fresh("/tmp/a.rs", 100, 12), Some("fn main() {}".to_string()));
        assert_eq!(cache.get_if_fresh("/tmp/a.rs", 200, 12), None);
        // The stale read above should have evicted the entry.
        assert_eq!(cache.get_if_fresh("/tmp/a.rs", 100, 12), None);
    }

    #[tokio::test]
    async fn raw_symbol_cache_snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawSymbolCache::with_bounds(10, 1_000_000);
        cache.insert("file:///a.rs", "h1", serde_json::json!({"ok": true}));
        cache.save_snapshot(dir.path()).await;

        let fresh_cache = RawSymbolCache::with_bounds(10, 1_000_000);
        let restored = fresh_cache.load_snapshot(dir.path(), "file:///a.rs", "h1").await;
        assert_eq!(restored, Some(serde_json::json!({"ok": true})));
    }
}
