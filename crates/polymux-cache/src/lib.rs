//! The three bounded caches of spec §4.4: raw document-symbol responses,
//! processed symbol trees, and file contents, plus invalidation and
//! optional disk snapshot persistence.

pub mod bounded;
pub mod caches;
pub mod flush;
pub mod snapshot;

pub use bounded::{BoundedCache, CacheStats};
pub use caches::{system_time_to_unix_secs, ContentKey, FileContentCache, FileContentEntry, RawSymbolCache, SymbolTreeCache};
pub use flush::FlushCoordinator;

use std::path::Path;

/// Bundles the three caches a wrapper (or the manager, for a crashed
/// wrapper's URIs) invalidates together.
pub struct PolymuxCaches {
    pub raw_symbols: RawSymbolCache,
    pub symbol_trees: SymbolTreeCache,
    pub file_contents: FileContentCache,
}

impl PolymuxCaches {
    pub fn new() -> Self {
        PolymuxCaches {
            raw_symbols: RawSymbolCache::new(),
            symbol_trees: SymbolTreeCache::new(),
            file_contents: FileContentCache::new(),
        }
    }

    /// Purges every cached derivative of `uri` (spec §4.4: "on any edit to
    /// a file, all cache entries keyed by that URI are purged").
    pub fn purge_uri(&self, uri: &str) {
        self.raw_symbols.purge_uri(uri);
        self.symbol_trees.purge_uri(uri);
    }

    /// Purges every cached derivative for a whole set of URIs at once,
    /// used when a wrapper crashes or restarts (spec §4.4: "on wrapper
    /// crash or restart, all cache entries for files that were opened
    /// against that wrapper are purged").
    pub fn purge_uris<'a>(&self, uris: impl IntoIterator<Item = &'a str>) {
        for uri in uris {
            self.purge_uri(uri);
        }
    }

    pub async fn save_snapshots(&self, cache_dir: &Path) {
        self.raw_symbols.save_snapshot(cache_dir).await;
        self.symbol_trees.save_snapshot(cache_dir).await;
    }

    pub fn stats(&self) -> CachesSnapshot {
        CachesSnapshot {
            raw_symbols: self.raw_symbols.stats(),
            symbol_trees: self.symbol_trees.stats(),
            file_contents: self.file_contents.stats(),
        }
    }
}

impl Default for PolymuxCaches {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of all three caches' stats, for reporting (spec §4.4
/// ambient observability).
#[derive(Debug, Clone, Copy, Default)]
pub struct CachesSnapshot {
    pub raw_symbols: CacheStats,
    pub symbol_trees: CacheStats,
    pub file_contents: CacheStats,
}
