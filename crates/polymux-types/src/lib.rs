//! Shared data model and error taxonomy for the polymux LSP gateway.
//!
//! This crate has no async runtime dependency and no subprocess/IO concerns
//! of its own: it exists so every other crate in the workspace (`polymux-rpc`,
//! `polymux-lsp`, `polymux-cache`, `polymux-symbols`, `polymux-manager`,
//! `polymux-http`) can share one definition of `Language`, `Symbol`, name
//! paths, and `GatewayError` instead of each re-deriving its own.

pub mod error;
pub mod language;
pub mod namepath;
pub mod symbol;

pub use error::{GatewayError, GatewayResult};
pub use language::{Language, LanguageCapabilities, LanguageDescriptor, LANGUAGE_TABLE};
pub use namepath::{component_matches, NamePathPattern};
pub use symbol::{Position, Range, Symbol, SymbolKind, SymbolWalk};

/// The numeric id of an in-flight JSON-RPC request, allocated per wrapper
/// (spec §3 PendingRequest).
pub type RequestId = i64;

/// Context in which reference results are rendered (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceContextMode {
    None,
    LineOnly,
    Full,
}

/// One located reference to a symbol, enriched per the requested
/// [`ReferenceContextMode`] (spec §4.3 Reference queries).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SymbolReference {
    pub file_path: String,
    pub range: Range,
    /// Populated for `line_only`/`full` modes: the source line(s) containing
    /// the reference.
    pub context: Option<String>,
    /// Populated for `full` mode only: the header line of the symbol that
    /// contains this reference, if one could be determined.
    pub containing_symbol_header: Option<String>,
}

/// A repository-size category used to scale per-language memory estimates
/// (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoSizeCategory {
    Small,
    Medium,
    Large,
}

impl RepoSizeCategory {
    pub fn from_file_count(count: usize) -> Self {
        if count < 1_000 {
            RepoSizeCategory::Small
        } else if count < 10_000 {
            RepoSizeCategory::Medium
        } else {
            RepoSizeCategory::Large
        }
    }

    /// Multiplier applied to a language's steady-state memory estimate.
    pub fn scale_factor(self) -> f64 {
        match self {
            RepoSizeCategory::Small => 1.0,
            RepoSizeCategory::Medium => 1.6,
            RepoSizeCategory::Large => 2.5,
        }
    }
}
