//! File → language routing (spec §4.5).

use std::path::Path;

use polymux_types::{GatewayError, GatewayResult, Language};

use crate::config::ManagerConfig;

/// Routes `path` to a single configured language, per spec §4.5:
/// 1. match the basename against every configured language's suffixes;
/// 2. if more than one matches, prefer the project's declared order, then
///    the project's primary language if it's among the candidates, then
///    lexicographic language name;
/// 3. no match at all fails `UnsupportedFile` without ever touching the
///    manager's registry (testable property 6).
pub fn route(path: &Path, config: &ManagerConfig) -> GatewayResult<Language> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| GatewayError::InvalidArgument(format!("path has no file name: {}", path.display())))?;

    let all_matches = Language::matches_for_filename(file_name);
    let candidates: Vec<Language> = if config.languages.is_empty() {
        all_matches
    } else {
        all_matches.into_iter().filter(|l| config.languages.contains(l)).collect()
    };

    if candidates.is_empty() {
        return Err(GatewayError::UnsupportedFile(path.display().to_string()));
    }
    if candidates.len() == 1 {
        return Ok(candidates[0]);
    }

    if let Some(declared) = config.languages.iter().find(|l| candidates.contains(l)) {
        if let Some(primary) = config.primary_language {
            if candidates.contains(&primary) {
                return Ok(primary);
            }
        }
        return Ok(*declared);
    }

    let mut sorted = candidates;
    sorted.sort_by_key(|l| format!("{:?}", l));
    Ok(sorted[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_extension_fails_unsupported_without_touching_registry() {
        let config = ManagerConfig::new("/tmp".into(), vec![Language::Rust]);
        let result = route(Path::new("README.nonexistent"), &config);
        assert!(matches!(result, Err(GatewayError::UnsupportedFile(_))));
    }

    #[test]
    fn single_match_is_returned_directly() {
        let config = ManagerConfig::new("/tmp".into(), vec![Language::Rust, Language::Python]);
        assert_eq!(route(Path::new("main.rs"), &config).unwrap(), Language::Rust);
    }

    #[test]
    fn ambiguous_suffix_prefers_declared_order() {
        let config = ManagerConfig::new("/tmp".into(), vec![Language::Cpp, Language::C]);
        assert_eq!(route(Path::new("widget.h"), &config).unwrap(), Language::Cpp);
    }

    #[test]
    fn ambiguous_suffix_prefers_primary_language_over_declared_order() {
        let mut config = ManagerConfig::new("/tmp".into(), vec![Language::Cpp, Language::C]);
        config.primary_language = Some(Language::C);
        assert_eq!(route(Path::new("widget.h"), &config).unwrap(), Language::C);
    }

    #[test]
    fn ambiguous_suffix_with_no_project_config_falls_back_to_lexicographic() {
        let config = ManagerConfig::new("/tmp".into(), vec![]);
        assert_eq!(route(Path::new("widget.h"), &config).unwrap(), Language::C);
    }
}
