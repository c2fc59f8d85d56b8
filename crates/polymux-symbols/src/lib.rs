//! Language-agnostic symbol model: name-path addressing, tree construction
//! from `documentSymbol` responses, lookup, reference queries, edit
//! synthesis, call-hierarchy, and plain-text pattern search (spec §4.3,
//! component C3).
//!
//! This crate sits directly on top of `polymux-lsp` (one wrapper) and
//! `polymux-manager` (routing to the right wrapper), and reads/writes
//! through `polymux-cache`. It never talks to a subprocess directly.

pub mod callhierarchy;
pub mod document;
pub mod edit;
pub mod lookup;
pub mod pattern;
pub mod position;
pub mod reference;
pub mod tree;

pub use callhierarchy::{incoming_calls, outgoing_calls, CallHierarchyNode};
pub use edit::{insert_after_symbol, insert_before_symbol, rename_symbol, replace_symbol_body};
pub use lookup::{find_symbol, symbols_overview, LookupOptions, Scope};
pub use pattern::{search_for_pattern, PatternMatch, PatternSearchOptions};
pub use reference::find_referencing_symbols;
pub use tree::build_symbol_tree;
