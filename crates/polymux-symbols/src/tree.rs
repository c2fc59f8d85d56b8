//! Symbol tree construction from a raw `documentSymbol` response (spec
//! §4.3 Symbol tree construction).

use lsp_types::{DocumentSymbol, SymbolInformation};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use polymux_types::{GatewayError, GatewayResult, Range, Symbol, SymbolKind};

use crate::position::{to_internal, LineIndex};

/// A mutable, still-being-assembled symbol, before name paths are assigned
/// and children are frozen into `Arc<[Symbol]>`.
struct BuildNode {
    name: String,
    kind: SymbolKind,
    range: Range,
    selection_range: Range,
    children: Vec<BuildNode>,
}

/// Builds the synthetic File-rooted symbol tree for one file (spec §4.3
/// step 3). `raw` is the verbatim JSON-RPC result of `textDocument/
/// documentSymbol`; `full_text` is the file's current contents, used both
/// to resolve line-relative positions and to slice out each symbol's body.
pub fn build_symbol_tree(raw: &Value, relative_path: &str, full_text: &str, encoding: &lsp_types::PositionEncodingKind) -> GatewayResult<Symbol> {
    let line_index = LineIndex::new(full_text);
    let mut roots = parse_raw_symbols(raw, &line_index, encoding)?;
    resolve_overlaps_recursive(&mut roots);

    let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path).to_string();
    let file_range = whole_file_range(full_text);
    let file_name_path = relative_path.to_string();

    let children: Vec<Symbol> = roots
        .into_iter()
        .map(|node| finalize(node, None, Some(file_name_path.clone()), full_text))
        .collect();

    Ok(Symbol {
        name: file_name,
        kind: SymbolKind::File,
        location: file_range,
        selection_range: file_range,
        body: None,
        children: Arc::from(children),
        parent_name_path: None,
        name_path: file_name_path,
    })
}

fn whole_file_range(full_text: &str) -> Range {
    let last_line = full_text.split('\n').count().saturating_sub(1) as u32;
    let last_line_len = full_text.split('\n').next_back().map(|l| l.len() as u32).unwrap_or(0);
    Range::new(polymux_types::Position::new(0, 0), polymux_types::Position::new(last_line, last_line_len))
}

/// Tries the hierarchical `DocumentSymbol[]` shape first (the modern,
/// preferred response per LSP 3.17), falling back to the flat
/// `SymbolInformation[]` shape that older or simpler servers still return.
fn parse_raw_symbols(raw: &Value, line_index: &LineIndex<'_>, encoding: &lsp_types::PositionEncodingKind) -> GatewayResult<Vec<BuildNode>> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    if let Ok(hierarchical) = serde_json::from_value::<Vec<DocumentSymbol>>(raw.clone()) {
        return Ok(hierarchical.into_iter().map(|ds| document_symbol_to_node(ds, line_index, encoding)).collect());
    }
    if let Ok(flat) = serde_json::from_value::<Vec<SymbolInformation>>(raw.clone()) {
        let nodes = flat
            .into_iter()
            .map(|si| symbol_information_to_node(si, line_index, encoding))
            .collect();
        return Ok(promote_flat_to_tree(nodes));
    }
    Err(GatewayError::ProtocolError("documentSymbol response matched neither DocumentSymbol[] nor SymbolInformation[]".to_string()))
}

fn document_symbol_to_node(ds: DocumentSymbol, line_index: &LineIndex<'_>, encoding: &lsp_types::PositionEncodingKind) -> BuildNode {
    let range = lsp_range_to_internal(ds.range, line_index, encoding);
    let selection_range = lsp_range_to_internal(ds.selection_range, line_index, encoding);
    let children = ds
        .children
        .unwrap_or_default()
        .into_iter()
        .map(|child| document_symbol_to_node(child, line_index, encoding))
        .collect();
    BuildNode {
        name: ds.name,
        kind: SymbolKind::from_lsp_u32(lsp_symbol_kind_to_u32(ds.kind)),
        range,
        selection_range,
        children,
    }
}

fn symbol_information_to_node(si: SymbolInformation, line_index: &LineIndex<'_>, encoding: &lsp_types::PositionEncodingKind) -> BuildNode {
    let range = lsp_range_to_internal(si.location.range, line_index, encoding);
    BuildNode {
        name: si.name,
        kind: SymbolKind::from_lsp_u32(lsp_symbol_kind_to_u32(si.kind)),
        selection_range: range,
        range,
        children: Vec::new(),
    }
}

fn lsp_range_to_internal(range: lsp_types::Range, line_index: &LineIndex<'_>, encoding: &lsp_types::PositionEncodingKind) -> Range {
    Range::new(to_internal(line_index, range.start, encoding), to_internal(line_index, range.end, encoding))
}

/// `lsp_types::SymbolKind`'s internal representation isn't available to
/// inspect directly in this workspace (only the crate's `Cargo.toml`, not
/// its source, was retrievable), so its numeric LSP wire value is
/// recovered via a JSON round-trip — the same technique `polymux-lsp`
/// already uses for `ServerCapabilities` option fields.
fn lsp_symbol_kind_to_u32(kind: lsp_types::SymbolKind) -> u32 {
    serde_json::to_value(kind).ok().and_then(|v| v.as_u64()).map(|v| v as u32).unwrap_or(13)
}

/// Promotes a flat, start-position-sorted list into a hierarchy by
/// containment (spec §4.3 step 2): a stack of not-yet-closed ancestors,
/// popped whenever the next item no longer fits inside the current top.
fn promote_flat_to_tree(mut items: Vec<BuildNode>) -> Vec<BuildNode> {
    items.sort_by_key(|n| (n.range.start.line, n.range.start.character));

    let mut roots: Vec<BuildNode> = Vec::new();
    let mut stack: Vec<BuildNode> = Vec::new();

    for item in items {
        while let Some(top) = stack.last() {
            if top.range.contains(&item.range) {
                break;
            }
            let finished = stack.pop().expect("just checked non-empty via last()");
            append_to(&mut stack, &mut roots, finished);
        }
        stack.push(item);
    }
    while let Some(finished) = stack.pop() {
        append_to(&mut stack, &mut roots, finished);
    }
    roots
}

fn append_to(stack: &mut [BuildNode], roots: &mut Vec<BuildNode>, node: BuildNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

/// Enforces the sibling non-overlap invariant (spec §4.3 Invariants
/// verified at construction) at every level of the tree: two siblings that
/// partially overlap without one containing the other keep only the
/// larger-spanning one.
fn resolve_overlaps_recursive(nodes: &mut Vec<BuildNode>) {
    resolve_sibling_overlaps(nodes);
    for node in nodes.iter_mut() {
        resolve_overlaps_recursive(&mut node.children);
    }
}

fn resolve_sibling_overlaps(nodes: &mut Vec<BuildNode>) {
    nodes.sort_by_key(|n| (n.range.start.line, n.range.start.character));
    let mut i = 0;
    while i + 1 < nodes.len() {
        if nodes[i].range.overlaps(&nodes[i + 1].range) && !nodes[i].range.contains(&nodes[i + 1].range) && !nodes[i + 1].range.contains(&nodes[i].range) {
            let drop_index = if nodes[i].range.len_lines() >= nodes[i + 1].range.len_lines() { i + 1 } else { i };
            warn!(
                kept = %nodes[if drop_index == i { i + 1 } else { i }].name,
                dropped = %nodes[drop_index].name,
                "discarding overlapping sibling symbol with smaller range"
            );
            nodes.remove(drop_index);
            continue;
        }
        i += 1;
    }
}

fn finalize(node: BuildNode, name_path_prefix: Option<&str>, parent_name_path: Option<String>, full_text: &str) -> Symbol {
    let name_path = match name_path_prefix {
        None => node.name.clone(),
        Some(prefix) => format!("{prefix}/{}", node.name),
    };
    let body = slice_body(full_text, &node.range);
    let children: Vec<Symbol> = node
        .children
        .into_iter()
        .map(|child| finalize(child, Some(&name_path), Some(name_path.clone()), full_text))
        .collect();

    Symbol {
        name: node.name,
        kind: node.kind,
        location: node.range,
        selection_range: node.selection_range,
        body: Some(body),
        children: Arc::from(children),
        parent_name_path,
        name_path,
    }
}

/// Reconstructs a symbol's body by slicing the *whole lines* it spans out of
/// the file's current text (spec §4.3: "bodies are not cached per-symbol
/// but are reconstructed from the file buffer cache"; spec S1: the body of
/// `Calc/add` is `"    def add(self, a, b):\n        return a + b\n"` — the
/// start line's full leading indentation and the closing line terminator,
/// not a column-precise slice of `range`). A line's own terminator is
/// included unless it is the file's last line and the file has no trailing
/// newline, so round-tripping a body back through `replace_symbol_body`
/// never drifts the file's trailing-newline convention (spec §8 property
/// 4).
pub fn slice_body(full_text: &str, range: &Range) -> String {
    let lines: Vec<&str> = full_text.split('\n').collect();
    let start_line = range.start.line as usize;
    let last_index = lines.len().saturating_sub(1);
    let end_line = (range.end.line as usize).min(last_index);
    if start_line >= lines.len() {
        return String::new();
    }

    let mut out = String::new();
    for line_no in start_line..=end_line {
        out.push_str(lines[line_no]);
        if line_no < last_index {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIERARCHICAL: &str = r#"[{
        "name": "Calc",
        "kind": 5,
        "range": {"start": {"line": 0, "character": 0}, "end": {"line": 2, "character": 27}},
        "selectionRange": {"start": {"line": 0, "character": 6}, "end": {"line": 0, "character": 10}},
        "children": [{
            "name": "add",
            "kind": 6,
            "range": {"start": {"line": 1, "character": 4}, "end": {"line": 2, "character": 27}},
            "selectionRange": {"start": {"line": 1, "character": 8}, "end": {"line": 1, "character": 11}}
        }]
    }]"#;

    const FILE_TEXT: &str = "class Calc:\n    def add(self, a, b):\n        return a + b\n";

    #[test]
    fn hierarchical_response_builds_a_file_root_with_nested_children() {
        let raw: Value = serde_json::from_str(HIERARCHICAL).unwrap();
        let root = build_symbol_tree(&raw, "calc.py", FILE_TEXT, &lsp_types::PositionEncodingKind::UTF16).unwrap();
        assert_eq!(root.kind, SymbolKind::File);
        assert_eq!(root.name_path, "calc.py");
        assert_eq!(root.children.len(), 1);

        let calc = &root.children[0];
        assert_eq!(calc.name, "Calc");
        assert_eq!(calc.name_path, "Calc");
        assert_eq!(calc.parent_name_path.as_deref(), Some("calc.py"));

        let add = &calc.children[0];
        assert_eq!(add.name_path, "Calc/add");
        assert_eq!(add.parent_name_path.as_deref(), Some("Calc"));
        assert_eq!(add.body.as_deref(), Some("    def add(self, a, b):\n        return a + b\n"));
    }

    const FLAT: &str = r#"[
        {"name": "Calc", "kind": 5, "location": {"uri": "file:///calc.py", "range": {"start": {"line": 0, "character": 0}, "end": {"line": 2, "character": 27}}}},
        {"name": "add", "kind": 6, "location": {"uri": "file:///calc.py", "range": {"start": {"line": 1, "character": 4}, "end": {"line": 2, "character": 27}}}}
    ]"#;

    #[test]
    fn flat_response_is_promoted_to_the_same_hierarchy() {
        let raw: Value = serde_json::from_str(FLAT).unwrap();
        let root = build_symbol_tree(&raw, "calc.py", FILE_TEXT, &lsp_types::PositionEncodingKind::UTF16).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "Calc");
        assert_eq!(root.children[0].children.len(), 1);
        assert_eq!(root.children[0].children[0].name_path, "Calc/add");
    }

    #[test]
    fn partially_overlapping_siblings_keep_only_the_larger_range() {
        let json = r#"[
            {"name": "a", "kind": 12, "range": {"start": {"line": 0, "character": 0}, "end": {"line": 5, "character": 0}}, "selectionRange": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}},
            {"name": "b", "kind": 12, "range": {"start": {"line": 3, "character": 0}, "end": {"line": 11, "character": 0}}, "selectionRange": {"start": {"line": 3, "character": 0}, "end": {"line": 3, "character": 1}}}
        ]"#;
        let raw: Value = serde_json::from_str(json).unwrap();
        let text = "\n".repeat(12);
        let root = build_symbol_tree(&raw, "f.rs", &text, &lsp_types::PositionEncodingKind::UTF16).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "b");
    }
}
