//! Name-path grammar (spec §4.3).
//!
//! A name path is a `/`-separated sequence of components. A leading `/`
//! roots the match at the file's synthetic File symbol. A trailing `/`
//! requires the matched symbol to have at least one child. Components match
//! either exactly or by substring, depending on the caller's
//! `substring_matching` flag (default: exact).

use serde::{Deserialize, Serialize};

/// A parsed name-path pattern, ready to be matched against a symbol tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePathPattern {
    /// `true` if the original string started with `/`: only match starting
    /// at the file root rather than at any depth.
    pub rooted: bool,
    /// `true` if the original string ended with `/`: only match symbols that
    /// have at least one child.
    pub requires_children: bool,
    /// The non-empty path components, in order.
    pub components: Vec<String>,
}

impl NamePathPattern {
    /// Parses a name-path string per spec §4.3's grammar.
    ///
    /// An empty pattern (after stripping leading/trailing slashes) is
    /// rejected as `InvalidArgument`-worthy by the caller; this function
    /// itself never fails, since the grammar has no other invalid forms —
    /// any non-empty run of characters between slashes is a valid component.
    pub fn parse(raw: &str) -> NamePathPattern {
        let rooted = raw.starts_with('/');
        let requires_children = raw.len() > 1 && raw.ends_with('/') || (raw == "/" && false);
        let trimmed = raw.trim_start_matches('/');
        let trimmed = if requires_children {
            trimmed.trim_end_matches('/')
        } else {
            trimmed
        };
        let components = trimmed
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        NamePathPattern {
            rooted,
            requires_children,
            components,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The final (most specific) component, e.g. `authenticate` in
    /// `UserService/authenticate`.
    pub fn last_component(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }
}

/// Matches one path component against a symbol name, exact or substring.
pub fn component_matches(pattern_component: &str, symbol_name: &str, substring_matching: bool) -> bool {
    if substring_matching {
        symbol_name.contains(pattern_component)
    } else {
        symbol_name == pattern_component
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_path() {
        let p = NamePathPattern::parse("Calculator/multiply");
        assert!(!p.rooted);
        assert!(!p.requires_children);
        assert_eq!(p.components, vec!["Calculator", "multiply"]);
    }

    #[test]
    fn leading_slash_roots_at_file() {
        let p = NamePathPattern::parse("/Calculator/multiply");
        assert!(p.rooted);
        assert_eq!(p.components, vec!["Calculator", "multiply"]);
    }

    #[test]
    fn trailing_slash_requires_children() {
        let p = NamePathPattern::parse("Calculator/");
        assert!(p.requires_children);
        assert_eq!(p.components, vec!["Calculator"]);
    }

    #[test]
    fn single_component_matches_any_depth() {
        let p = NamePathPattern::parse("User");
        assert!(!p.rooted);
        assert_eq!(p.components, vec!["User"]);
    }

    #[test]
    fn substring_matching_flag() {
        assert!(component_matches("Calc", "Calculator", true));
        assert!(!component_matches("Calc", "Calculator", false));
        assert!(component_matches("Calculator", "Calculator", false));
    }
}
