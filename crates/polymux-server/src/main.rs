//! Binary entry point: wires C1-C6 together (JSON-RPC transport, per-server
//! wrappers, symbol layer, caches, memory-budgeted manager, and the
//! streamable-HTTP shim) behind one process.
//!
//! Configuration here is deliberately minimal: a handful of environment
//! variables read once at startup, no YAML loader. A companion
//! configuration crate is explicitly out of scope; this is glue code to let
//! the binary start, not the configuration subsystem.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use polymux_cache::PolymuxCaches;
use polymux_http::{AppState, GatewayContext, SessionStore};
use polymux_manager::{ManagerConfig, ManagerHandle};
use polymux_types::Language;

/// Environment-variable-driven startup configuration (spec §9's "minimal
/// `GatewayConfig`" supplement). No file format, no validation beyond
/// parsing; a malformed value fails fast at startup rather than degrading
/// silently at request time.
struct GatewayConfig {
    root_path: PathBuf,
    languages: Vec<Language>,
    memory_budget_mib: u64,
    eager_start: bool,
    bind_addr: SocketAddr,
}

impl GatewayConfig {
    fn from_env() -> Result<Self> {
        let root_path = std::env::var("POLYMUX_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let languages = match std::env::var("POLYMUX_LANGUAGES") {
            Ok(value) => value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_language)
                .collect::<Result<Vec<_>>>()?,
            Err(_) => vec![Language::Rust],
        };

        let memory_budget_mib = match std::env::var("POLYMUX_MEMORY_BUDGET_MIB") {
            Ok(value) => value.parse().context("POLYMUX_MEMORY_BUDGET_MIB must be an integer")?,
            Err(_) => 2048,
        };

        let eager_start = std::env::var("POLYMUX_EAGER_START")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let bind_addr = match std::env::var("POLYMUX_BIND_ADDR") {
            Ok(value) => value.parse().context("POLYMUX_BIND_ADDR must be a socket address")?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], 8877)),
        };

        Ok(GatewayConfig {
            root_path,
            languages,
            memory_budget_mib,
            eager_start,
            bind_addr,
        })
    }
}

fn parse_language(name: &str) -> Result<Language> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "rust" => Language::Rust,
        "python" => Language::Python,
        "typescript" => Language::TypeScript,
        "javascript" => Language::JavaScript,
        "go" => Language::Go,
        "java" => Language::Java,
        "c" => Language::C,
        "cpp" | "c++" => Language::Cpp,
        "markdown" => Language::Markdown,
        other => anyhow::bail!("unknown language in POLYMUX_LANGUAGES: {other}"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env()?;
    tracing::info!(root = %config.root_path.display(), languages = ?config.languages, "starting polymux-server");

    let caches = Arc::new(PolymuxCaches::new());
    let mut manager_config = ManagerConfig::new(config.root_path.clone(), config.languages.clone());
    manager_config.memory_budget_mib = config.memory_budget_mib;
    manager_config.eager_start = config.eager_start;

    let handle = Arc::new(ManagerHandle::new(manager_config, caches));
    let manager = handle.current().await;

    if config.eager_start {
        manager.eager_start_all().await;
    }

    let context = Arc::new(GatewayContext {
        manager: manager.clone(),
        root: config.root_path.clone(),
    });
    let sessions = Arc::new(SessionStore::new());
    let state = AppState { context, sessions };

    let shutdown_manager = manager.clone();
    let result = polymux_http::serve(state, config.bind_addr).await;

    tracing::info!("shutting down language server wrappers");
    shutdown_manager.shutdown_all().await;

    result.context("http server exited with an error")
}
