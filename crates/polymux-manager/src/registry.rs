//! The LSP Manager itself (spec §4.5): a registry of one wrapper per
//! language, routing, memory-budgeted eviction, and the acquisition
//! algorithm.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use polymux_cache::PolymuxCaches;
use polymux_lsp::{LanguageServerWrapper, WrapperConfig, WrapperState};
use polymux_types::{GatewayError, GatewayResult, Language};

use crate::config::ManagerConfig;
use crate::memory;
use crate::routing;

/// A registered wrapper plus the bookkeeping the acquisition algorithm and
/// eviction loop need (spec §3 WrapperEntry). State itself is not
/// duplicated here — it's read straight from the wrapper, which is the
/// single source of truth for it.
struct WrapperEntry {
    wrapper: Arc<LanguageServerWrapper>,
    estimated_mib: u64,
    last_use: Instant,
    use_count: u64,
}

/// Owns the per-language wrapper dictionary and the total memory budget
/// for one project (spec §4.5).
pub struct LspManager {
    config: ManagerConfig,
    caches: Arc<PolymuxCaches>,
    /// Spec §4.5: "holding a global reentrant lock guarding the manager's
    /// state". A single async mutex gives a globally consistent view of
    /// total memory across every language, which a sharded map (e.g.
    /// `DashMap`) cannot without extra synchronisation of its own; it is
    /// never held across a suspending call (start, shutdown), only across
    /// the synchronous decision steps of the acquisition algorithm.
    registry: AsyncMutex<HashMap<Language, WrapperEntry>>,
    /// Per-language start-lock so concurrent callers for the same language
    /// coalesce onto a single in-flight start (spec §4.5 step 6, property
    /// 5's sibling property: "the Rust wrapper is started at most once").
    start_locks: AsyncMutex<HashMap<Language, Arc<AsyncMutex<()>>>>,
    shutdown_called: AtomicBool,
}

impl LspManager {
    pub fn new(config: ManagerConfig, caches: Arc<PolymuxCaches>) -> Self {
        LspManager {
            config,
            caches,
            registry: AsyncMutex::new(HashMap::new()),
            start_locks: AsyncMutex::new(HashMap::new()),
            shutdown_called: AtomicBool::new(false),
        }
    }

    pub fn configured_languages(&self) -> &[Language] {
        &self.config.languages
    }

    pub fn caches(&self) -> &Arc<PolymuxCaches> {
        &self.caches
    }

    /// Routes `path` to a language without ever touching the registry
    /// (testable property 6: an unsupported file starts no wrapper).
    pub fn route(&self, path: &std::path::Path) -> GatewayResult<Language> {
        routing::route(path, &self.config)
    }

    fn wrapper_config_for(&self, language: Language) -> WrapperConfig {
        let mut wrapper_config = WrapperConfig::for_language(language, self.config.root_path.clone());
        if let Some((command, args)) = self.config.command_overrides.get(&language) {
            wrapper_config.command = Some(command.clone());
            wrapper_config.args = args.clone();
        }
        wrapper_config
    }

    async fn start_lock_for(&self, language: Language) -> Arc<AsyncMutex<()>> {
        let mut locks = self.start_locks.lock().await;
        locks.entry(language).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Acquires a running wrapper for `language`, starting or waiting for
    /// one as needed (spec §4.5 Acquisition algorithm).
    pub async fn acquire(&self, language: Language) -> GatewayResult<Arc<LanguageServerWrapper>> {
        loop {
            enum Step {
                Return(Arc<LanguageServerWrapper>),
                WaitThenRetry(Arc<LanguageServerWrapper>),
                Start,
            }

            let step = {
                let mut registry = self.registry.lock().await;
                match registry.get_mut(&language) {
                    Some(entry) => match entry.wrapper.state().await {
                        WrapperState::Running => {
                            entry.last_use = Instant::now();
                            entry.use_count += 1;
                            Step::Return(entry.wrapper.clone())
                        }
                        WrapperState::Starting => Step::WaitThenRetry(entry.wrapper.clone()),
                        WrapperState::Failed | WrapperState::ShutDown => {
                            registry.remove(&language);
                            Step::Start
                        }
                        WrapperState::NotStarted | WrapperState::ShuttingDown => Step::Start,
                    },
                    None => Step::Start,
                }
            };

            match step {
                Step::Return(wrapper) => return Ok(wrapper),
                Step::WaitThenRetry(wrapper) => {
                    wrapper.wait_until_running(self.config.wait_for_start_timeout).await?;
                    continue;
                }
                Step::Start => {
                    self.start_new(language).await?;
                    continue;
                }
            }
        }
    }

    /// Routes `path` then acquires the resulting language's wrapper.
    pub async fn acquire_for_path(&self, path: &std::path::Path) -> GatewayResult<Arc<LanguageServerWrapper>> {
        let language = self.route(path)?;
        self.acquire(language).await
    }

    async fn start_new(&self, language: Language) -> GatewayResult<()> {
        let lock = self.start_lock_for(language).await;
        let _guard = lock.lock().await;

        // Re-check: another caller may have finished starting this
        // language while we were waiting for the start-lock.
        {
            let registry = self.registry.lock().await;
            if let Some(entry) = registry.get(&language) {
                if entry.wrapper.state().await == WrapperState::Running {
                    return Ok(());
                }
            }
        }

        self.evict_to_fit(language).await;

        let wrapper = Arc::new(LanguageServerWrapper::new(self.wrapper_config_for(language)));
        {
            let mut registry = self.registry.lock().await;
            registry.insert(
                language,
                WrapperEntry {
                    wrapper: wrapper.clone(),
                    estimated_mib: memory::estimate_mib(language, self.config.repo_size),
                    last_use: Instant::now(),
                    use_count: 0,
                },
            );
        }

        info!(?language, "starting language server wrapper");
        match wrapper.start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(?language, error = %e, "language server wrapper failed to start");
                Err(e)
            }
        }
    }

    /// Projected total memory if `target` were added now, and evicts the
    /// least-recently-used running wrapper of a *different* language until
    /// it fits the budget or no more eviction candidates remain (spec §4.5
    /// Acquisition algorithm, steps 4-5; testable property 7).
    async fn evict_to_fit(&self, target: Language) {
        loop {
            let victim = {
                let registry = self.registry.lock().await;
                let target_estimate = memory::estimate_mib(target, self.config.repo_size);
                let mut total: u64 = target_estimate;
                for (lang, entry) in registry.iter() {
                    if *lang != target {
                        total += entry.estimated_mib;
                    }
                }
                if total <= self.config.memory_budget_mib {
                    None
                } else {
                    registry
                        .iter()
                        .filter(|(lang, _)| **lang != target)
                        .min_by_key(|(_, entry)| entry.last_use)
                        .map(|(lang, _)| *lang)
                }
            };

            let Some(victim) = victim else { return };

            let wrapper = {
                let mut registry = self.registry.lock().await;
                registry.remove(&victim).map(|e| e.wrapper)
            };
            let Some(wrapper) = wrapper else { return };

            warn!(language = ?victim, ?target, "evicting idle language server to stay within memory budget");
            let uris = wrapper.open_uris().await;
            let _ = wrapper.shutdown().await;
            self.caches.purge_uris(uris.iter().map(String::as_str));
        }
    }

    /// Starts every configured language up front, staggered to avoid a
    /// thundering herd (spec §4.5 Eager vs lazy). Per-language start
    /// failures are logged and isolated; one language's failure never
    /// aborts the others.
    pub async fn eager_start_all(&self) {
        for (i, language) in self.config.languages.clone().into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.eager_start_stagger).await;
            }
            if let Err(e) = self.acquire(language).await {
                warn!(?language, error = %e, "eager start failed");
            }
        }
    }

    /// Drains every wrapper exactly once, even if called concurrently or
    /// repeatedly on the same instance (grounded in, and completing, the
    /// teacher's `impl Drop for LanguageServerPool` stub).
    pub async fn shutdown_all(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries: Vec<(Language, Arc<LanguageServerWrapper>)> = {
            let mut registry = self.registry.lock().await;
            registry.drain().map(|(lang, entry)| (lang, entry.wrapper)).collect()
        };
        for (language, wrapper) in entries {
            info!(?language, "shutting down language server wrapper");
            let _ = wrapper.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymux_types::RepoSizeCategory;

    fn config(languages: Vec<Language>) -> ManagerConfig {
        let mut c = ManagerConfig::new(std::env::temp_dir(), languages);
        c.memory_budget_mib = 10_000;
        c
    }

    #[tokio::test]
    async fn unsupported_file_fails_without_touching_registry() {
        let manager = LspManager::new(config(vec![Language::Rust]), Arc::new(PolymuxCaches::new()));
        let result = manager.acquire_for_path(std::path::Path::new("README.nonexistent")).await;
        assert!(matches!(result, Err(GatewayError::UnsupportedFile(_))));
        assert!(manager.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_all_is_idempotent_under_concurrent_calls() {
        let manager = Arc::new(LspManager::new(config(vec![]), Arc::new(PolymuxCaches::new())));
        let m1 = manager.clone();
        let m2 = manager.clone();
        let (r1, r2) = tokio::join!(tokio::spawn(async move { m1.shutdown_all().await }), tokio::spawn(async move { m2.shutdown_all().await }));
        r1.unwrap();
        r2.unwrap();
        // Both calls complete cleanly; the second is a no-op because the
        // flag was already set by whichever call won the race.
        assert!(manager.shutdown_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn starting_a_third_language_evicts_the_least_recently_used_other_language() {
        // Budget tight enough that two languages at the estimate fit but a
        // third does not (property 7: each estimate >= B/2 forces exactly
        // one eviction on the third start). We exercise the eviction
        // decision directly rather than through real wrapper starts, since
        // spawning real language servers is unavailable in this
        // environment.
        let mut cfg = config(vec![Language::Rust, Language::Python, Language::Go]);
        let one_lang_estimate = memory::estimate_mib(Language::Rust, cfg.repo_size);
        cfg.memory_budget_mib = one_lang_estimate * 2;
        let manager = LspManager::new(cfg, Arc::new(PolymuxCaches::new()));

        {
            let mut registry = manager.registry.lock().await;
            registry.insert(
                Language::Rust,
                WrapperEntry {
                    wrapper: Arc::new(LanguageServerWrapper::new(manager.wrapper_config_for(Language::Rust))),
                    estimated_mib: one_lang_estimate,
                    last_use: Instant::now() - std::time::Duration::from_secs(60),
                    use_count: 1,
                },
            );
            registry.insert(
                Language::Python,
                WrapperEntry {
                    wrapper: Arc::new(LanguageServerWrapper::new(manager.wrapper_config_for(Language::Python))),
                    estimated_mib: one_lang_estimate,
                    last_use: Instant::now(),
                    use_count: 1,
                },
            );
        }

        manager.evict_to_fit(Language::Go).await;

        let registry = manager.registry.lock().await;
        assert!(!registry.contains_key(&Language::Rust), "least-recently-used wrapper should have been evicted");
        assert!(registry.contains_key(&Language::Python), "more recently used wrapper should survive");
    }
}
