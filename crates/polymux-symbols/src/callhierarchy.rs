//! Call-hierarchy queries (spec §6.1), falling back to plain reference
//! search when a server lacks `callHierarchy` support (spec §6.2).

use std::path::Path;

use lsp_types::CallHierarchyItem;

use polymux_manager::LspManager;
use polymux_types::{GatewayError, GatewayResult, ReferenceContextMode, Range};

use crate::lookup::{find_symbol, relative_to, uri_to_path, LookupOptions, Scope};
use crate::position::{to_internal_range, to_lsp, LineIndex};
use crate::{document, reference};

/// One node of a call-hierarchy tree, bounded to `max_depth` levels.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallHierarchyNode {
    pub name: String,
    pub file_path: String,
    pub range: Range,
    pub children: Vec<CallHierarchyNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Incoming,
    Outgoing,
}

pub async fn incoming_calls(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str, max_depth: u32) -> GatewayResult<Vec<CallHierarchyNode>> {
    query(manager, root, name_path, relative_path, max_depth, Direction::Incoming).await
}

pub async fn outgoing_calls(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str, max_depth: u32) -> GatewayResult<Vec<CallHierarchyNode>> {
    query(manager, root, name_path, relative_path, max_depth, Direction::Outgoing).await
}

async fn query(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str, max_depth: u32, direction: Direction) -> GatewayResult<Vec<CallHierarchyNode>> {
    let abs_path = root.join(relative_path);
    let matches = find_symbol(manager, root, name_path, Scope::File(abs_path.clone()), &LookupOptions::default()).await?;
    let symbol = match matches.len() {
        0 => return Err(GatewayError::UnknownSymbol(name_path.to_string())),
        1 => &matches[0],
        _ => {
            return Err(GatewayError::AmbiguousNamePath {
                name_path: name_path.to_string(),
                candidates: matches.iter().map(|s| s.name_path.clone()).collect(),
            })
        }
    };

    let wrapper = manager.acquire_for_path(&abs_path).await?;
    let text = document::read_text(manager.caches(), &abs_path).await?;
    let line_index = LineIndex::new(&text);
    let encoding = wrapper.position_encoding().await;
    let lsp_position = to_lsp(&line_index, symbol.selection_range.start, &encoding);

    let roots = match wrapper.prepare_call_hierarchy(&abs_path, lsp_position, None).await {
        Ok(items) => items,
        Err(GatewayError::Unsupported(_)) => return references_fallback(manager, root, name_path, relative_path).await,
        Err(other) => return Err(other),
    };

    if roots.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(roots.len());
    for item in roots {
        out.push(expand(manager, root, &item, direction, max_depth).await?);
    }
    Ok(out)
}

/// Converts `item`'s range into our internal UTF-8-byte coordinates. Unlike
/// a leaf reference, a call-hierarchy item may name a file in a *different*
/// language from the symbol the query started on (incoming/outgoing calls
/// can cross language boundaries), so the line index and position encoding
/// are both rebuilt from that file's own wrapper and contents rather than
/// reused from the caller.
#[async_recursion::async_recursion]
async fn expand(manager: &LspManager, root: &Path, item: &CallHierarchyItem, direction: Direction, depth_remaining: u32) -> GatewayResult<CallHierarchyNode> {
    let abs_path = uri_to_path(item.uri.as_str())
        .ok_or_else(|| GatewayError::ProtocolError(format!("call hierarchy item has an unparseable uri: {}", item.uri.as_str())))?;
    let wrapper = manager.acquire_for_path(&abs_path).await?;
    let text = document::read_text(manager.caches(), &abs_path).await?;
    let line_index = LineIndex::new(&text);
    let encoding = wrapper.position_encoding().await;
    let range = to_internal_range(&line_index, item.range, &encoding);

    let mut children = Vec::new();
    if depth_remaining > 0 {
        match direction {
            Direction::Incoming => {
                for call in wrapper.incoming_calls(item.clone(), None).await? {
                    children.push(expand(manager, root, &call.from, direction, depth_remaining - 1).await?);
                }
            }
            Direction::Outgoing => {
                for call in wrapper.outgoing_calls(item.clone(), None).await? {
                    children.push(expand(manager, root, &call.to, direction, depth_remaining - 1).await?);
                }
            }
        }
    }

    Ok(CallHierarchyNode {
        name: item.name.clone(),
        file_path: relative_to(root, &abs_path),
        range,
        children,
    })
}

/// Used when `prepareCallHierarchy` is unsupported (spec §6.1: "falls back
/// to references on unsupported servers"). This is necessarily shallower
/// than a real call hierarchy: every reference becomes a leaf node, since
/// plain references carry no caller/callee direction to recurse through.
async fn references_fallback(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str) -> GatewayResult<Vec<CallHierarchyNode>> {
    let refs = reference::find_referencing_symbols(manager, root, name_path, relative_path, ReferenceContextMode::None).await?;
    Ok(refs
        .into_iter()
        .map(|r| CallHierarchyNode {
            name: r.file_path.clone(),
            file_path: r.file_path,
            range: r.range,
            children: Vec::new(),
        })
        .collect())
}
