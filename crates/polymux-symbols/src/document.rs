//! Reads a file's current text and produces its symbol tree, going through
//! all three caches from spec §4.4 along the way.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use polymux_cache::{system_time_to_unix_secs, PolymuxCaches};
use polymux_lsp::{CancelToken, LanguageServerWrapper};
use polymux_types::{GatewayError, GatewayResult, Symbol};

use crate::tree::build_symbol_tree;

/// Reads `path`'s current text, preferring the file-content cache when its
/// mtime/size still match (spec §4.4: "on detected change of file mtime
/// relative to cached size/mtime, the entry is treated as stale").
pub async fn read_text(caches: &PolymuxCaches, path: &Path) -> GatewayResult<String> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => GatewayError::FileNotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => GatewayError::PermissionDenied(path.display().to_string()),
        _ => GatewayError::Io(e),
    })?;
    let mtime = metadata.modified().map(system_time_to_unix_secs).unwrap_or(0);
    let size = metadata.len();
    let path_str = path.to_string_lossy().to_string();

    if let Some(text) = caches.file_contents.get_if_fresh(&path_str, mtime, size) {
        return Ok(text);
    }

    let text = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => GatewayError::FileNotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => GatewayError::PermissionDenied(path.display().to_string()),
        _ => GatewayError::Io(e),
    })?;
    caches.file_contents.insert(&path_str, text.clone(), mtime, size);
    Ok(text)
}

/// A cheap, non-cryptographic digest of a file's text, used purely as a
/// cache key component to detect "this is the content I built a tree
/// from" — not for integrity or security purposes.
pub fn content_hash(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Returns the symbol tree for `path` (relative path `relative_path`
/// within the project, used for the File root's name and name path),
/// consulting and populating the raw-response and symbol-tree caches
/// along the way (spec §8 testable property 1: "the second call is
/// served from cache").
pub async fn get_or_build_tree(
    wrapper: &LanguageServerWrapper,
    caches: &PolymuxCaches,
    path: &Path,
    relative_path: &str,
    cancel: Option<&CancelToken>,
) -> GatewayResult<Arc<Symbol>> {
    let text = read_text(caches, path).await?;
    let uri = format!("file://{}", path.to_string_lossy());
    let hash = content_hash(&text);

    if let Some(tree) = caches.symbol_trees.get(&uri, &hash) {
        return Ok(tree);
    }

    let raw = match caches.raw_symbols.get(&uri, &hash) {
        Some(raw) => raw,
        None => {
            let raw = wrapper.document_symbol(path, cancel).await?;
            caches.raw_symbols.insert(&uri, &hash, raw.clone());
            raw
        }
    };

    let encoding = wrapper.position_encoding().await;
    let root = build_symbol_tree(&raw, relative_path, &text, &encoding)?;
    let root = Arc::new(root);
    caches.symbol_trees.insert(&uri, &hash, root.clone());
    Ok(root)
}
