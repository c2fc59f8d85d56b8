//! Per-language steady-state memory estimates (spec §4.5 Memory budget).
//!
//! Hard-coded base figures, roughly reflecting the known resident-memory
//! footprint of each language's reference server once it has indexed a
//! small workspace, scaled by [`RepoSizeCategory::scale_factor`].

use polymux_types::{Language, RepoSizeCategory};

fn base_estimate_mib(language: Language) -> u64 {
    match language {
        Language::Rust => 800,
        Language::Java => 900,
        Language::TypeScript => 500,
        Language::JavaScript => 400,
        Language::Go => 400,
        Language::Python => 300,
        Language::C => 350,
        Language::Cpp => 400,
        Language::Markdown => 50,
    }
}

/// The estimated steady-state memory for `language` under `repo_size`,
/// before any measured-memory override (spec §4.5: "once a wrapper has been
/// running long enough to measure actual resident memory ... the
/// measurement replaces the estimate"). This crate estimates only; OS-level
/// RSS measurement is a host-observability concern this workspace leaves to
/// the manager's caller, since `sysinfo`-style polling is out of scope for
/// the gateway core itself.
pub fn estimate_mib(language: Language, repo_size: RepoSizeCategory) -> u64 {
    (base_estimate_mib(language) as f64 * repo_size.scale_factor()).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_repos_scale_the_estimate_up() {
        let small = estimate_mib(Language::Rust, RepoSizeCategory::Small);
        let large = estimate_mib(Language::Rust, RepoSizeCategory::Large);
        assert!(large > small);
    }

    #[test]
    fn every_language_has_a_nonzero_estimate() {
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
            assert!(estimate_mib(lang, RepoSizeCategory::Small) > 0);
        }
    }
}
