//! Polyglot query fan-out (spec §4.5): run one operation per configured
//! language concurrently, never letting one language's failure abort the
//! others.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;

use polymux_lsp::LanguageServerWrapper;
use polymux_types::{GatewayResult, Language};

use crate::registry::LspManager;

/// One language's outcome from a fan-out call.
pub struct LanguageOutcome<T> {
    pub language: Language,
    pub result: GatewayResult<T>,
}

/// Acquires a wrapper for every configured language and runs `op` against
/// each, concurrently. A language whose wrapper fails to start, or whose
/// `op` call fails, contributes its own error to the result set rather than
/// aborting the whole fan-out (spec §4.5: "per-language failure does not
/// abort the fan-out; the per-language error is attached to the returned
/// result set").
pub async fn fan_out<T, F, Fut>(manager: &LspManager, op: F) -> Vec<LanguageOutcome<T>>
where
    F: Fn(Language, Arc<LanguageServerWrapper>) -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let languages = manager.configured_languages().to_vec();
    let futures = languages.into_iter().map(|language| {
        let op = &op;
        async move {
            let result = match manager.acquire(language).await {
                Ok(wrapper) => op(language, wrapper).await,
                Err(e) => Err(e),
            };
            LanguageOutcome { language, result }
        }
    });
    join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use polymux_cache::PolymuxCaches;

    #[tokio::test]
    async fn a_failing_language_does_not_abort_the_others() {
        // Neither language's wrapper can actually start in this
        // environment (no real subprocess available), so every outcome is
        // expected to carry an error rather than panic or short-circuit —
        // exercising exactly the "failure does not abort the fan-out"
        // contract the fan-out exists to provide.
        let config = ManagerConfig::new(std::env::temp_dir(), vec![Language::Rust, Language::Python]);
        let manager = LspManager::new(config, Arc::new(PolymuxCaches::new()));

        let outcomes = fan_out(&manager, |_language, wrapper| async move { wrapper.document_symbol(std::path::Path::new("/tmp/does-not-exist.rs"), None).await }).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().any(|o| o.language == Language::Rust));
        assert!(outcomes.iter().any(|o| o.language == Language::Python));
    }
}
