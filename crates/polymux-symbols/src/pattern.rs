//! `search_for_pattern` (spec §6.1): a textual grep supplement independent
//! of any language server, for finding things name-path addressing can't
//! reach (string literals, comments, config files).

use std::path::Path;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use regex::Regex;

use polymux_types::{GatewayError, GatewayResult};

/// Same bound spec §9 applies to symbol lookup's lazy sequence; a
/// pathological pattern over a huge tree gets the same ceiling rather than
/// an unbounded result set.
const MAX_RESULTS: usize = 1000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PatternMatch {
    pub file_path: String,
    pub line: u32,
    pub line_text: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PatternSearchOptions {
    pub paths_include_glob: Option<String>,
    pub paths_exclude_glob: Option<String>,
    pub context_lines_before: u32,
    pub context_lines_after: u32,
}

pub fn search_for_pattern(root: &Path, pattern: &str, options: &PatternSearchOptions) -> GatewayResult<Vec<PatternMatch>> {
    let regex = Regex::new(pattern).map_err(|e| GatewayError::InvalidArgument(format!("invalid pattern '{pattern}': {e}")))?;

    let mut overrides = OverrideBuilder::new(root);
    if let Some(glob) = &options.paths_include_glob {
        overrides.add(glob).map_err(|e| GatewayError::InvalidArgument(format!("invalid include glob: {e}")))?;
    }
    if let Some(glob) = &options.paths_exclude_glob {
        overrides.add(&format!("!{glob}")).map_err(|e| GatewayError::InvalidArgument(format!("invalid exclude glob: {e}")))?;
    }
    let overrides = overrides.build().map_err(|e| GatewayError::InvalidArgument(e.to_string()))?;

    let walker = WalkBuilder::new(root).git_ignore(true).hidden(false).follow_links(false).overrides(overrides).build();

    let mut results = Vec::new();
    'files: for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.path();
        let Ok(text) = std::fs::read_to_string(path) else { continue };
        let lines: Vec<&str> = text.split('\n').collect();
        let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");

        for (i, line) in lines.iter().enumerate() {
            if results.len() >= MAX_RESULTS {
                break 'files;
            }
            if !regex.is_match(line) {
                continue;
            }
            let start = i.saturating_sub(options.context_lines_before as usize);
            let end = (i + options.context_lines_after as usize).min(lines.len().saturating_sub(1));
            results.push(PatternMatch {
                file_path: relative.clone(),
                line: i as u32,
                line_text: line.to_string(),
                context_before: lines[start..i].iter().map(|l| l.to_string()).collect(),
                context_after: lines[i + 1..=end.max(i)].iter().map(|l| l.to_string()).collect(),
            });
        }
    }

    Ok(results)
}
