//! Manager-wide configuration (spec §4.5). A plain struct with a `Default`
//! impl, same shape as `polymux-lsp`'s `WrapperConfig` — the YAML loader that
//! would populate this from a project file is out of scope.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use polymux_types::{Language, RepoSizeCategory};

/// One project's declared languages, overrides, and budget.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub root_path: PathBuf,
    /// Declared languages, in project-configured preference order (spec
    /// §4.5 File → language routing, step 2).
    pub languages: Vec<Language>,
    /// If set, preferred over declared order whenever it is among the
    /// candidates for a given file.
    pub primary_language: Option<Language>,
    pub repo_size: RepoSizeCategory,
    /// Total memory budget in MiB for all running wrappers combined (spec
    /// §4.5: "default 2048 MiB").
    pub memory_budget_mib: u64,
    /// `true` starts every configured language at project open; `false`
    /// (default) defers each to its first request (spec §4.5 Eager vs
    /// lazy).
    pub eager_start: bool,
    /// Stagger between eager starts, to avoid a thundering herd.
    pub eager_start_stagger: Duration,
    /// Per-language command/argument overrides; falls back to the
    /// language's descriptor default when absent.
    pub command_overrides: HashMap<Language, (String, Vec<String>)>,
    /// Timeout used when `acquire` finds an entry already `starting` and
    /// has to wait for it (spec §4.5 Acquisition algorithm, step 2).
    pub wait_for_start_timeout: Duration,
}

impl ManagerConfig {
    pub fn new(root_path: PathBuf, languages: Vec<Language>) -> Self {
        ManagerConfig {
            root_path,
            languages,
            primary_language: None,
            repo_size: RepoSizeCategory::Small,
            memory_budget_mib: 2048,
            eager_start: false,
            eager_start_stagger: Duration::from_millis(250),
            command_overrides: HashMap::new(),
            wait_for_start_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_lazy_with_the_spec_budget() {
        let config = ManagerConfig::new("/tmp".into(), vec![Language::Rust]);
        assert!(!config.eager_start);
        assert_eq!(config.memory_budget_mib, 2048);
    }
}
