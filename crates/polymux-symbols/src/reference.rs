//! Reference queries (spec §4.3 Reference queries).

use std::path::Path;

use polymux_manager::LspManager;
use polymux_types::{GatewayError, GatewayResult, ReferenceContextMode, Symbol, SymbolReference};

use crate::document;
use crate::lookup::{find_symbol, relative_to, uri_to_path, LookupOptions, Scope};
use crate::position::{to_internal_range, to_lsp, LineIndex};

/// Resolves `name_path` within `relative_path` to exactly one symbol, then
/// issues `textDocument/references` at its selection-range start,
/// enriching each location per `context_mode` (spec §4.3).
pub async fn find_referencing_symbols(
    manager: &LspManager,
    root: &Path,
    name_path: &str,
    relative_path: &str,
    context_mode: ReferenceContextMode,
) -> GatewayResult<Vec<SymbolReference>> {
    let abs_path = root.join(relative_path);
    let options = LookupOptions::default();
    let matches = find_symbol(manager, root, name_path, Scope::File(abs_path.clone()), &options).await?;

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

    let locations = wrapper.references(&abs_path, lsp_position, None).await?;

    let mut out = Vec::with_capacity(locations.len());
    for location in locations {
        let Some(ref_path) = uri_to_path(location.uri.as_str()) else { continue };
        let ref_relative = relative_to(root, &ref_path);
        let ref_text = document::read_text(manager.caches(), &ref_path).await.unwrap_or_default();
        let ref_line_index = LineIndex::new(&ref_text);
        let range = to_internal_range(&ref_line_index, location.range, &encoding);

        let (context, containing_symbol_header) = match context_mode {
            ReferenceContextMode::None => (None, None),
            ReferenceContextMode::LineOnly => (Some(line_at(&ref_text, range.start.line)), None),
            ReferenceContextMode::Full => {
                let context = surrounding_lines(&ref_text, range.start.line, 3);
                let header = containing_symbol_header(manager, &ref_path, &ref_relative, range.start).await;
                (Some(context), header)
            }
        };

        out.push(SymbolReference {
            file_path: ref_relative,
            range,
            context,
            containing_symbol_header,
        });
    }

    Ok(out)
}

fn line_at(text: &str, line_no: u32) -> String {
    text.split('\n').nth(line_no as usize).unwrap_or("").trim_end_matches('\r').to_string()
}

fn surrounding_lines(text: &str, line_no: u32, context: u32) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = line_no.saturating_sub(context) as usize;
    let end = ((line_no + context) as usize).min(lines.len().saturating_sub(1));
    lines[start..=end.max(start)].join("\n")
}

/// Finds the innermost symbol in `path`'s tree whose range contains
/// `position` (already in our internal UTF-8-byte coordinates), returning
/// its declaration line as a one-line header (spec §4.3 `full` mode: "the
/// containing symbol's header line").
async fn containing_symbol_header(manager: &LspManager, path: &Path, relative_path: &str, position: polymux_types::Position) -> Option<String> {
    let wrapper = manager.acquire_for_path(path).await.ok()?;
    let tree = document::get_or_build_tree(&wrapper, manager.caches(), path, relative_path, None).await.ok()?;
    let text = document::read_text(manager.caches(), path).await.ok()?;

    let mut containing: Option<&Symbol> = None;
    for symbol in tree.walk() {
        if symbol.kind == polymux_types::SymbolKind::File {
            continue;
        }
        if symbol.location.start <= position && position < symbol.location.end {
            containing = Some(symbol);
        }
    }

    containing.map(|s| line_at(&text, s.selection_range.start.line))
}
