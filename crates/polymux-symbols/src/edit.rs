//! Edit synthesis: replace/insert/rename (spec §4.3 Edit synthesis, Edit
//! safety invariants).
//!
//! All three primitives share one tail: compute a byte-range text edit
//! against the file's current contents, hand the new full text to the
//! wrapper's `didChange` path (so the server's view advances before any
//! follow-up symbol query), then write the result to disk atomically —
//! sibling temp file, fsync, rename — before invalidating the caches that
//! keyed off the old content hash.

use std::path::{Path, PathBuf};

use lsp_types::{DocumentChangeOperation, DocumentChanges, OneOf, TextEdit};
use tokio::io::AsyncWriteExt;

use polymux_manager::LspManager;
use polymux_types::{GatewayError, GatewayResult, Position, Symbol};

use crate::document;
use crate::lookup::{find_symbol, relative_to, uri_to_path, LookupOptions, Scope};
use crate::position::{to_lsp, LineIndex};

/// Resolves `name_path` within `relative_path` to exactly one symbol, with
/// its body populated (edit callers need the current body for the
/// `expected_body` optimistic-concurrency check).
async fn resolve_one(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str) -> GatewayResult<Symbol> {
    let abs_path = root.join(relative_path);
    let options = LookupOptions { include_body: true, ..Default::default() };
    let matches = find_symbol(manager, root, name_path, Scope::File(abs_path), &options).await?;
    match matches.len() {
        0 => Err(GatewayError::UnknownSymbol(name_path.to_string())),
        1 => Ok(matches.into_iter().next().expect("len checked above")),
        _ => Err(GatewayError::AmbiguousNamePath {
            name_path: name_path.to_string(),
            candidates: matches.iter().map(|s| s.name_path.clone()).collect(),
        }),
    }
}

/// Replaces a symbol's entire body with `new_body` (spec §4.3: "compute the
/// exact range to replace as the symbol's `location` range"). If
/// `expected_body` is given and no longer matches the symbol's current
/// body, the edit is refused with `StaleSymbol` rather than silently
/// clobbering a body the caller never saw (spec §4.3 Edit safety
/// invariants).
///
/// A symbol's body (`tree::slice_body`) is the *whole lines* it spans,
/// column 0 through the closing line terminator — not a column-precise
/// slice of `location` — so the replacement here operates on the same
/// whole-line span via [`splice_whole_lines`]; otherwise a body round-
/// tripped straight back through this function (spec §8 property 4) would
/// silently drop the start line's leading indentation.
pub async fn replace_symbol_body(
    manager: &LspManager,
    root: &Path,
    name_path: &str,
    relative_path: &str,
    new_body: &str,
    expected_body: Option<&str>,
) -> GatewayResult<()> {
    let symbol = resolve_one(manager, root, name_path, relative_path).await?;
    if let Some(expected) = expected_body {
        if symbol.body.as_deref() != Some(expected) {
            return Err(GatewayError::StaleSymbol);
        }
    }

    let abs_path = root.join(relative_path);
    let text = document::read_text(manager.caches(), &abs_path).await?;
    let new_text = splice_whole_lines(&text, symbol.location.start.line, symbol.location.end.line, new_body);

    apply_and_sync(manager, &abs_path, new_text).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertAnchor {
    BeforeStart,
    AfterEnd,
}

/// Inserts `body` as a new, whole-line block immediately before `name_path`'s
/// first line (spec §4.3 "insert before / after symbol").
pub async fn insert_before_symbol(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str, body: &str) -> GatewayResult<()> {
    insert_relative_to_symbol(manager, root, name_path, relative_path, body, InsertAnchor::BeforeStart).await
}

/// Inserts `body` as a new, whole-line block immediately after `name_path`'s
/// last line.
pub async fn insert_after_symbol(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str, body: &str) -> GatewayResult<()> {
    insert_relative_to_symbol(manager, root, name_path, relative_path, body, InsertAnchor::AfterEnd).await
}

async fn insert_relative_to_symbol(
    manager: &LspManager,
    root: &Path,
    name_path: &str,
    relative_path: &str,
    body: &str,
    anchor: InsertAnchor,
) -> GatewayResult<()> {
    let symbol = resolve_one(manager, root, name_path, relative_path).await?;
    let abs_path = root.join(relative_path);
    let text = document::read_text(manager.caches(), &abs_path).await?;
    let newline = detect_newline(&text);

    let insertion_line = match anchor {
        InsertAnchor::BeforeStart => symbol.location.start.line,
        InsertAnchor::AfterEnd => symbol.location.end.line + 1,
    };
    let offset = line_start_byte_offset(&text, insertion_line);

    let mut insert_text = body.to_string();
    if !insert_text.ends_with('\n') && !insert_text.ends_with("\r\n") {
        insert_text.push_str(newline);
    }

    let mut new_text = String::with_capacity(text.len() + insert_text.len());
    new_text.push_str(&text[..offset]);
    new_text.push_str(&insert_text);
    new_text.push_str(&text[offset..]);

    apply_and_sync(manager, &abs_path, new_text).await
}

/// Requests `textDocument/rename` and applies the returned workspace-edit,
/// which may span multiple files (spec §4.3 "rename symbol"). Returns the
/// relative paths of every file actually modified.
///
/// Files are written in the order the workspace-edit lists them; per spec
/// §9's open question on rename atomicity, a failure partway through is
/// "best effort" — files already written stay written, only the remaining,
/// unwritten files are reported as failed. `EditFailed` names which files
/// succeeded so a caller can decide whether to re-run the rename.
pub async fn rename_symbol(manager: &LspManager, root: &Path, name_path: &str, relative_path: &str, new_name: &str) -> GatewayResult<Vec<String>> {
    let symbol = resolve_one(manager, root, name_path, relative_path).await?;
    let abs_path = root.join(relative_path);

    let wrapper = manager.acquire_for_path(&abs_path).await?;
    let text = document::read_text(manager.caches(), &abs_path).await?;
    let line_index = LineIndex::new(&text);
    let encoding = wrapper.position_encoding().await;
    let lsp_position = to_lsp(&line_index, symbol.selection_range.start, &encoding);

    let workspace_edit = wrapper
        .rename(&abs_path, lsp_position, new_name, None)
        .await?
        .ok_or_else(|| GatewayError::Unsupported("rename returned no workspace edit".to_string()))?;

    let per_file = collect_per_file_edits(&workspace_edit)?;
    let mut written = Vec::with_capacity(per_file.len());
    for (uri, edits) in per_file {
        let Some(file_path) = uri_to_path(&uri) else { continue };
        apply_text_edits_to_file(manager, &file_path, edits).await.map_err(|e| {
            GatewayError::EditFailed(format!("rename wrote {} file(s) before failing on {}: {e}", written.len(), file_path.display()))
        })?;
        written.push(relative_to(root, &file_path));
    }
    Ok(written)
}

/// Flattens a `WorkspaceEdit`'s two mutually-exclusive shapes (spec §9
/// Glossary "workspace edit"): the modern `documentChanges` (only its
/// `TextDocumentEdit` variant — resource operations like create/delete are
/// out of scope for a symbol rename) and the legacy flat `changes` map.
fn collect_per_file_edits(edit: &lsp_types::WorkspaceEdit) -> GatewayResult<Vec<(String, Vec<TextEdit>)>> {
    if let Some(document_changes) = &edit.document_changes {
        let mut out = Vec::new();
        match document_changes {
            DocumentChanges::Edits(edits) => {
                for text_document_edit in edits {
                    let uri = text_document_edit.text_document.uri.as_str().to_string();
                    let edits = text_document_edit.edits.iter().map(unwrap_annotated).collect();
                    out.push((uri, edits));
                }
            }
            DocumentChanges::Operations(ops) => {
                for op in ops {
                    if let DocumentChangeOperation::Edit(text_document_edit) = op {
                        let uri = text_document_edit.text_document.uri.as_str().to_string();
                        let edits = text_document_edit.edits.iter().map(unwrap_annotated).collect();
                        out.push((uri, edits));
                    }
                }
            }
        }
        return Ok(out);
    }

    if let Some(changes) = &edit.changes {
        return Ok(changes.iter().map(|(uri, edits)| (uri.as_str().to_string(), edits.clone())).collect());
    }

    Ok(Vec::new())
}

fn unwrap_annotated(edit: &OneOf<TextEdit, lsp_types::AnnotatedTextEdit>) -> TextEdit {
    match edit {
        OneOf::Left(edit) => edit.clone(),
        OneOf::Right(annotated) => annotated.text_edit.clone(),
    }
}

/// Applies a file's edits bottom-up (highest start offset first) so that
/// applying one edit never invalidates another edit's byte offsets into the
/// same text (spec §4.3: "edits are applied bottom-up within a file
/// (highest start offset first) to avoid offset invalidation").
async fn apply_text_edits_to_file(manager: &LspManager, abs_path: &Path, mut edits: Vec<TextEdit>) -> GatewayResult<()> {
    if edits.is_empty() {
        return Ok(());
    }

    let text = document::read_text(manager.caches(), abs_path).await?;
    let line_index = LineIndex::new(&text);
    let encoding = manager.acquire_for_path(abs_path).await?.position_encoding().await;

    edits.sort_by(|a, b| (b.range.start.line, b.range.start.character).cmp(&(a.range.start.line, a.range.start.character)));

    let mut new_text = text;
    for edit in edits {
        let start = crate::position::to_internal(&line_index, edit.range.start, &encoding);
        let end = crate::position::to_internal(&line_index, edit.range.end, &encoding);
        new_text = splice(&new_text, start, end, &edit.new_text);
    }

    apply_and_sync(manager, abs_path, new_text).await
}

/// Replaces the byte range `[start, end)` of `text` (in our UTF-8-byte line
/// coordinates) with `replacement`.
fn splice(text: &str, start: Position, end: Position, replacement: &str) -> String {
    let start_offset = line_relative_byte_offset(text, start);
    let end_offset = line_relative_byte_offset(text, end);
    let mut out = String::with_capacity(text.len() - (end_offset - start_offset) + replacement.len());
    out.push_str(&text[..start_offset]);
    out.push_str(replacement);
    out.push_str(&text[end_offset..]);
    out
}

/// Converts a (line, byte-in-line) position into an absolute byte offset
/// into `text`, using the same `split('\n')` line definition the symbol
/// tree builder uses (spec §4.3 Symbol tree construction; `tree::slice_body`
/// shares this exact line-splitting convention so offsets computed here line
/// up with the ranges a `Symbol` reports).
fn line_relative_byte_offset(text: &str, pos: Position) -> usize {
    let mut offset = 0usize;
    for (i, line) in text.split('\n').enumerate() {
        if i as u32 == pos.line {
            return offset + (pos.character as usize).min(line.len());
        }
        offset += line.len() + 1;
    }
    text.len()
}

/// Replaces the whole lines `[start_line, end_line]` (inclusive, column 0
/// through the line terminator after `end_line`) with `replacement`. The
/// counterpart to `tree::slice_body`'s whole-line body extraction: the same
/// span convention must be used on both sides of a `replace_symbol_body`
/// round-trip or the start line's indentation gets duplicated or dropped.
fn splice_whole_lines(text: &str, start_line: u32, end_line: u32, replacement: &str) -> String {
    let start_offset = line_start_byte_offset(text, start_line);
    let end_offset = line_start_byte_offset(text, end_line + 1);
    let mut out = String::with_capacity(text.len().saturating_sub(end_offset - start_offset) + replacement.len());
    out.push_str(&text[..start_offset]);
    out.push_str(replacement);
    out.push_str(&text[end_offset..]);
    out
}

fn line_start_byte_offset(text: &str, line_no: u32) -> usize {
    let mut offset = 0usize;
    for (i, line) in text.split('\n').enumerate() {
        if i as u32 == line_no {
            return offset;
        }
        offset += line.len() + 1;
    }
    text.len()
}

/// Detects the file's existing newline convention from its first line
/// terminator, defaulting to the platform newline for a file with none
/// (spec §4.3: "All edits preserve the file's existing newline
/// convention").
fn detect_newline(text: &str) -> &'static str {
    if let Some(idx) = text.find('\n') {
        if idx > 0 && text.as_bytes()[idx - 1] == b'\r' {
            return "\r\n";
        }
        return "\n";
    }
    if cfg!(windows) {
        "\r\n"
    } else {
        "\n"
    }
}

/// Sends the new full text to the wrapper (`didChange`, advancing the
/// server's document version before any follow-up query can observe the
/// old content) then writes it to disk atomically, then purges every cache
/// entry keyed by the file's URI (spec §4.3 Edit synthesis, §4.4
/// invalidation).
async fn apply_and_sync(manager: &LspManager, abs_path: &Path, new_text: String) -> GatewayResult<()> {
    let wrapper = manager.acquire_for_path(abs_path).await?;
    wrapper.edit_document(abs_path, new_text.clone()).await?;
    atomic_write(abs_path, &new_text).await?;
    let uri = format!("file://{}", abs_path.to_string_lossy());
    manager.caches().purge_uri(&uri);
    Ok(())
}

/// Writes `contents` to `path` via a sibling temporary file, fsync, then
/// rename (spec §4.3: "write the file to disk atomically (write to a
/// sibling temporary, fsync, rename)"; §4.3 Edit safety invariants: "a
/// failed write leaves the file byte-identical to the pre-edit state").
async fn atomic_write(path: &Path, contents: &str) -> GatewayResult<()> {
    let tmp_path = sibling_temp_path(path);

    let result: std::io::Result<()> = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(GatewayError::EditFailed(e.to_string()));
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(GatewayError::EditFailed(e.to_string()));
    }
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("polymux-edit");
    path.with_file_name(format!(".{file_name}.polymux-tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_replaces_an_interior_range() {
        let text = "line0\nline1\nline2\n";
        let out = splice(text, Position::new(1, 0), Position::new(1, 5), "REPLACED");
        assert_eq!(out, "line0\nREPLACED\nline2\n");
    }

    /// The round-trip from spec S3: `slice_body` hands out whole lines
    /// including the start line's indentation and a closing newline, so
    /// `splice_whole_lines` must consume exactly that span back out of the
    /// file, or the other bytes would drift (spec §8 property 4).
    #[test]
    fn splice_whole_lines_matches_slice_bodys_span() {
        let text = "class Calc:\n    def add(self, a, b):\n        return a + b\n";
        let body = crate::tree::slice_body(&text, &polymux_types::Range::new(Position::new(1, 4), Position::new(2, 21)));
        assert_eq!(body, "    def add(self, a, b):\n        return a + b\n");

        let out = splice_whole_lines(text, 1, 2, "    def add(self, a, b):\n        return b + a\n");
        assert_eq!(out, "class Calc:\n    def add(self, a, b):\n        return b + a\n");
    }

    #[test]
    fn detect_newline_recognizes_crlf() {
        assert_eq!(detect_newline("a\r\nb\r\n"), "\r\n");
        assert_eq!(detect_newline("a\nb\n"), "\n");
    }

    #[test]
    fn detect_newline_on_newline_free_text_falls_back_to_platform_default() {
        let expected = if cfg!(windows) { "\r\n" } else { "\n" };
        assert_eq!(detect_newline("no newlines here"), expected);
    }

    #[test]
    fn line_start_byte_offset_finds_the_right_line() {
        let text = "aa\nbb\ncc\n";
        assert_eq!(line_start_byte_offset(text, 0), 0);
        assert_eq!(line_start_byte_offset(text, 1), 3);
        assert_eq!(line_start_byte_offset(text, 2), 6);
    }
}
