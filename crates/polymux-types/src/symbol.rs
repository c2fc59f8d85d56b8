//! The language-agnostic [`Symbol`] model (spec §3).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A zero-based line/character position, `character` always a UTF-8 byte
/// offset within the line (spec §9 Open Questions: position encoding). LSP
/// servers may negotiate UTF-16 or UTF-32 units during `initialize`;
/// `polymux-symbols` converts every position crossing this boundary using
/// that negotiated encoding and the line's own text before a `Symbol` or a
/// `Range` is built, so everything at or above this layer only ever sees a
/// UTF-8 byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open `[start, end)` range, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// `true` if `other` lies entirely within `self`, half-open semantics.
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// `true` if `self` and `other` share any position (used to detect the
    /// overlap spec §4.3 says must be resolved by preferring the larger
    /// range as parent).
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len_lines(&self) -> u32 {
        self.end.line.saturating_sub(self.start.line) + 1
    }
}

/// The full set of LSP `SymbolKind` variants plus the synthesized `File`
/// kind used for the synthetic root of each opened file (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    File,
    Module,
    Namespace,
    Package,
    Class,
    Method,
    Property,
    Field,
    Constructor,
    Enum,
    Interface,
    Function,
    Variable,
    Constant,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Key,
    Null,
    EnumMember,
    Struct,
    Event,
    Operator,
    TypeParameter,
}

impl SymbolKind {
    /// Maps from the LSP `SymbolKind` numeric value (1-26) to ours.
    /// Unknown values fall back to `Variable`, matching "degrade gracefully
    /// rather than fail the whole tree" for a single unrecognized kind.
    pub fn from_lsp_u32(value: u32) -> Self {
        match value {
            1 => SymbolKind::File,
            2 => SymbolKind::Module,
            3 => SymbolKind::Namespace,
            4 => SymbolKind::Package,
            5 => SymbolKind::Class,
            6 => SymbolKind::Method,
            7 => SymbolKind::Property,
            8 => SymbolKind::Field,
            9 => SymbolKind::Constructor,
            10 => SymbolKind::Enum,
            11 => SymbolKind::Interface,
            12 => SymbolKind::Function,
            13 => SymbolKind::Variable,
            14 => SymbolKind::Constant,
            15 => SymbolKind::String,
            16 => SymbolKind::Number,
            17 => SymbolKind::Boolean,
            18 => SymbolKind::Array,
            19 => SymbolKind::Object,
            20 => SymbolKind::Key,
            21 => SymbolKind::Null,
            22 => SymbolKind::EnumMember,
            23 => SymbolKind::Struct,
            24 => SymbolKind::Event,
            25 => SymbolKind::Operator,
            26 => SymbolKind::TypeParameter,
            _ => SymbolKind::Variable,
        }
    }
}

/// One addressable semantic entity (spec §3).
///
/// Immutable once returned: the symbol layer never mutates a `Symbol` it has
/// handed to a caller, it rebuilds a fresh tree on the next query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub location: Range,
    pub selection_range: Range,
    pub body: Option<String>,
    pub children: Arc<[Symbol]>,
    /// Name-path of the parent, or `None` for the synthetic File root.
    /// A weak, by-name back-reference only (spec §9 — no cycles).
    pub parent_name_path: Option<String>,
    /// This symbol's own canonical name path within its file.
    pub name_path: String,
}

impl Symbol {
    /// Depth-first preorder iterator over this symbol and all descendants.
    pub fn walk(&self) -> SymbolWalk<'_> {
        SymbolWalk {
            stack: vec![self],
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Depth-first preorder walk over a symbol tree.
pub struct SymbolWalk<'a> {
    stack: Vec<&'a Symbol>,
}

impl<'a> Iterator for SymbolWalk<'a> {
    type Item = &'a Symbol;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, name_path: &str, parent: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Method,
            location: Range::new(Position::new(1, 0), Position::new(2, 0)),
            selection_range: Range::new(Position::new(1, 4), Position::new(1, 7)),
            body: None,
            children: Arc::from(vec![]),
            parent_name_path: Some(parent.to_string()),
            name_path: name_path.to_string(),
        }
    }

    #[test]
    fn range_contains_is_inclusive_of_equal_bounds() {
        let outer = Range::new(Position::new(0, 0), Position::new(10, 0));
        let inner = Range::new(Position::new(0, 0), Position::new(10, 0));
        assert!(outer.contains(&inner));
    }

    #[test]
    fn walk_visits_root_then_children_in_order() {
        let child_a = leaf("a", "Root/a", "Root");
        let child_b = leaf("b", "Root/b", "Root");
        let root = Symbol {
            name: "Root".to_string(),
            kind: SymbolKind::Class,
            location: Range::new(Position::new(0, 0), Position::new(20, 0)),
            selection_range: Range::new(Position::new(0, 6), Position::new(0, 10)),
            body: None,
            children: Arc::from(vec![child_a, child_b]),
            parent_name_path: None,
            name_path: "Root".to_string(),
        };

        let names: Vec<&str> = root.walk().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Root", "a", "b"]);
    }
}
