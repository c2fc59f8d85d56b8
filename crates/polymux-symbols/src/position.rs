//! Position-encoding conversion (spec §9 Open Questions: LSP position
//! encoding).
//!
//! Every [`polymux_types::Position`] is a UTF-8 byte offset within its line
//! by the time it is visible above this crate. LSP servers negotiate
//! UTF-16, UTF-8 or UTF-32 units during `initialize`
//! (`lsp_types::PositionEncodingKind`); this module is the only place that
//! translates between a wire position and ours, using the line's own text
//! to walk code units/points.

use lsp_types::PositionEncodingKind;

/// A file's lines, split once and indexed by number, so position
/// conversion never rescans the whole file per symbol.
pub struct LineIndex<'a> {
    lines: Vec<&'a str>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut lines: Vec<&str> = text.split('\n').collect();
        // `split('\n')` on a trailing-newline file yields a spurious empty
        // final element; keep it anyway, since LSP positions may legally
        // point at that empty final line (end of file, no characters).
        if lines.is_empty() {
            lines.push("");
        }
        LineIndex { lines }
    }

    /// The text of line `n`, stripped of a trailing `\r` if present.
    /// Out-of-range lines return an empty slice rather than panicking —
    /// servers occasionally report a range one line past EOF for an empty
    /// file.
    pub fn line(&self, n: u32) -> &'a str {
        self.lines.get(n as usize).map(|l| l.strip_suffix('\r').unwrap_or(l)).unwrap_or("")
    }
}

/// Converts an LSP wire position (units per `encoding`) to our internal
/// UTF-8 byte offset, using `line_index` to find the line's text.
pub fn to_internal(line_index: &LineIndex<'_>, pos: lsp_types::Position, encoding: &PositionEncodingKind) -> polymux_types::Position {
    let line = line_index.line(pos.line);
    let byte_offset = match encoding.as_str() {
        "utf-8" => pos.character,
        "utf-32" => char_offset_to_byte_offset(line, pos.character),
        // UTF-16 is the LSP default when a server never negotiates one.
        _ => utf16_offset_to_byte_offset(line, pos.character),
    };
    polymux_types::Position::new(pos.line, byte_offset)
}

/// The inverse of [`to_internal`]: converts our UTF-8 byte offset back to
/// whatever unit the server negotiated, for positions this gateway sends
/// (e.g. a symbol's selection-range start, used as a `references` anchor).
pub fn to_lsp(line_index: &LineIndex<'_>, pos: polymux_types::Position, encoding: &PositionEncodingKind) -> lsp_types::Position {
    let line = line_index.line(pos.line);
    let character = match encoding.as_str() {
        "utf-8" => pos.character,
        "utf-32" => byte_offset_to_char_offset(line, pos.character),
        _ => byte_offset_to_utf16_offset(line, pos.character),
    };
    lsp_types::Position::new(pos.line, character)
}

/// Converts a whole LSP range to our internal representation in one call.
pub fn to_internal_range(line_index: &LineIndex<'_>, range: lsp_types::Range, encoding: &PositionEncodingKind) -> polymux_types::Range {
    polymux_types::Range::new(to_internal(line_index, range.start, encoding), to_internal(line_index, range.end, encoding))
}

fn utf16_offset_to_byte_offset(line: &str, utf16_offset: u32) -> u32 {
    let mut utf16_count = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if utf16_count >= utf16_offset {
            return byte_idx as u32;
        }
        utf16_count += ch.len_utf16() as u32;
    }
    line.len() as u32
}

fn byte_offset_to_utf16_offset(line: &str, byte_offset: u32) -> u32 {
    let mut utf16_count = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if byte_idx as u32 >= byte_offset {
            return utf16_count;
        }
        utf16_count += ch.len_utf16() as u32;
    }
    utf16_count
}

fn char_offset_to_byte_offset(line: &str, char_offset: u32) -> u32 {
    line.char_indices().nth(char_offset as usize).map(|(idx, _)| idx as u32).unwrap_or(line.len() as u32)
}

fn byte_offset_to_char_offset(line: &str, byte_offset: u32) -> u32 {
    line.char_indices().take_while(|(idx, _)| (*idx as u32) < byte_offset).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_line_utf16_and_byte_offsets_coincide() {
        let idx = LineIndex::new("hello world");
        let pos = lsp_types::Position::new(0, 6);
        let internal = to_internal(&idx, pos, &PositionEncodingKind::UTF16);
        assert_eq!(internal.character, 6);
        assert_eq!(to_lsp(&idx, internal, &PositionEncodingKind::UTF16).character, 6);
    }

    #[test]
    fn utf16_surrogate_pair_counts_as_two_units_but_one_byte_run() {
        // "😀" is one scalar value, 4 UTF-8 bytes, 2 UTF-16 code units.
        let idx = LineIndex::new("a😀b");
        // UTF-16 offset 3 is right after the emoji (1 for 'a' + 2 for the
        // surrogate pair), which is byte offset 5 (1 + 4).
        let internal = to_internal(&idx, lsp_types::Position::new(0, 3), &PositionEncodingKind::UTF16);
        assert_eq!(internal.character, 5);
        let back = to_lsp(&idx, internal, &PositionEncodingKind::UTF16);
        assert_eq!(back.character, 3);
    }

    #[test]
    fn utf8_encoding_is_the_identity_conversion() {
        let idx = LineIndex::new("a😀b");
        let internal = to_internal(&idx, lsp_types::Position::new(0, 5), &PositionEncodingKind::UTF8);
        assert_eq!(internal.character, 5);
    }

    #[test]
    fn out_of_range_line_returns_empty_slice_instead_of_panicking() {
        let idx = LineIndex::new("only one line");
        assert_eq!(idx.line(5), "");
    }
}
