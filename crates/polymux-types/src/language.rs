//! The `Language` enumeration and its static per-language descriptors.
//!
//! Per spec §9, language-specific quirks live behind small per-language
//! adapter descriptors rather than subclasses or a trait-object hierarchy —
//! this module is the "pure data plus a handful of hooks" shape.

use serde::{Deserialize, Serialize};

/// One supported source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Markdown,
}

/// Capability flags a language's server is expected to support. These are
/// *defaults* consulted before a server is started; the wrapper's actual
/// negotiated `ServerCapabilities` (spec §4.1/§4.2) always take precedence
/// once a server is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LanguageCapabilities {
    pub workspace_symbol: bool,
    pub call_hierarchy: bool,
    pub rename: bool,
    pub incremental_sync: bool,
}

/// The static descriptor for one language: filename patterns, directories
/// to unconditionally ignore during project-wide traversal, capability
/// defaults, and the command used to launch its server.
#[derive(Debug, Clone)]
pub struct LanguageDescriptor {
    pub language: Language,
    /// Case-insensitive filename suffixes identifying source files.
    pub suffixes: &'static [&'static str],
    /// Directory names ignored unconditionally (spec §3 Language invariant).
    pub ignored_dirs: &'static [&'static str],
    pub capabilities: LanguageCapabilities,
    /// The LSP `languageId` sent with `textDocument/didOpen` (spec §4.2
    /// Document synchronisation discipline).
    pub language_id: &'static str,
    /// Default server command and arguments; callers may override.
    pub default_command: &'static str,
    pub default_args: &'static [&'static str],
    /// Startup deadline in seconds (spec §4.2: up to 300s for slow servers).
    pub startup_timeout_secs: u64,
}

const COMMON_IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", "dist", "build", ".venv"];

/// The full descriptor table, one entry per [`Language`] variant.
///
/// Invariant (spec §3): filename patterns may overlap across languages
/// (e.g. `.h` for C/C++/Objective-C); callers that need disambiguation
/// consult project configuration first and fall back to "first configured
/// language whose patterns match" only when configuration is silent.
pub const LANGUAGE_TABLE: &[LanguageDescriptor] = &[
    LanguageDescriptor {
        language: Language::Rust,
        language_id: "rust",
        suffixes: &[".rs"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: true,
        },
        default_command: "rust-analyzer",
        default_args: &[],
        startup_timeout_secs: 120,
    },
    LanguageDescriptor {
        language: Language::Python,
        language_id: "python",
        suffixes: &[".py", ".pyi"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: true,
        },
        default_command: "pyright-langserver",
        default_args: &["--stdio"],
        startup_timeout_secs: 60,
    },
    LanguageDescriptor {
        language: Language::TypeScript,
        language_id: "typescript",
        suffixes: &[".ts", ".tsx"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: true,
        },
        default_command: "typescript-language-server",
        default_args: &["--stdio"],
        startup_timeout_secs: 60,
    },
    LanguageDescriptor {
        language: Language::JavaScript,
        language_id: "javascript",
        suffixes: &[".js", ".jsx", ".mjs", ".cjs"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: true,
        },
        default_command: "typescript-language-server",
        default_args: &["--stdio"],
        startup_timeout_secs: 60,
    },
    LanguageDescriptor {
        language: Language::Go,
        language_id: "go",
        suffixes: &[".go"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: true,
        },
        default_command: "gopls",
        default_args: &[],
        startup_timeout_secs: 60,
    },
    LanguageDescriptor {
        language: Language::Java,
        language_id: "java",
        suffixes: &[".java"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: false,
        },
        default_command: "jdtls",
        default_args: &[],
        startup_timeout_secs: 300,
    },
    LanguageDescriptor {
        language: Language::C,
        language_id: "c",
        suffixes: &[".c", ".h"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: true,
        },
        default_command: "clangd",
        default_args: &[],
        startup_timeout_secs: 60,
    },
    LanguageDescriptor {
        language: Language::Cpp,
        language_id: "cpp",
        suffixes: &[".cpp", ".cc", ".cxx", ".hpp", ".hh"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: true,
            call_hierarchy: true,
            rename: true,
            incremental_sync: true,
        },
        default_command: "clangd",
        default_args: &[],
        startup_timeout_secs: 60,
    },
    LanguageDescriptor {
        language: Language::Markdown,
        language_id: "markdown",
        suffixes: &[".md", ".markdown"],
        ignored_dirs: COMMON_IGNORED_DIRS,
        capabilities: LanguageCapabilities {
            workspace_symbol: false,
            call_hierarchy: false,
            rename: false,
            incremental_sync: false,
        },
        default_command: "marksman",
        default_args: &["server"],
        startup_timeout_secs: 30,
    },
];

impl Language {
    pub fn descriptor(self) -> &'static LanguageDescriptor {
        LANGUAGE_TABLE
            .iter()
            .find(|d| d.language == self)
            .expect("LANGUAGE_TABLE has one entry per Language variant")
    }

    /// Returns every configured language whose filename suffixes match
    /// `file_name`, in table order. Routing (in `polymux-manager`) picks the
    /// first match unless project configuration declares a preference
    /// (spec §3, §4.5).
    pub fn matches_for_filename(file_name: &str) -> Vec<Language> {
        let lower = file_name.to_ascii_lowercase();
        LANGUAGE_TABLE
            .iter()
            .filter(|d| d.suffixes.iter().any(|suf| lower.ends_with(suf)))
            .map(|d| d.language)
            .collect()
    }

    pub fn is_ignored_dir(self, dir_name: &str) -> bool {
        self.descriptor().ignored_dirs.contains(&dir_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_descriptor() {
        for lang in [
            Language::Rust,
            Language::Python,
            Language::TypeScript,
            Language::JavaScript,
            Language::Go,
            Language::Java,
            Language::C,
            Language::Cpp,
            Language::Markdown,
        ] {
            assert_eq!(lang.descriptor().language, lang);
        }
    }

    #[test]
    fn overlapping_suffix_returns_all_candidates() {
        // .h overlaps C and C++ per spec invariant in §3.
        let matches = Language::matches_for_filename("widget.h");
        assert!(matches.contains(&Language::C));
        assert!(matches.contains(&Language::Cpp));
    }

    #[test]
    fn case_insensitive_suffix_match() {
        assert_eq!(Language::matches_for_filename("Main.RS"), vec![Language::Rust]);
    }

    #[test]
    fn unmatched_extension_returns_empty() {
        assert!(Language::matches_for_filename("README.nonexistent").is_empty());
    }
}
