//! Per-wrapper configuration. Populating one of these is the surrounding
//! orchestrator's job (project discovery, per-language overrides); this
//! crate only consumes the finished struct.

use std::path::PathBuf;
use std::time::Duration;

use polymux_types::Language;
use serde_json::Value;

/// How a document's incremental changes are sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone)]
pub struct WrapperConfig {
    pub language: Language,
    /// Overrides the language's default command, e.g. a specific
    /// rust-analyzer binary discovered at a non-default path.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub root_path: PathBuf,
    pub root_uri: String,
    pub initialization_options: Option<Value>,
    /// Upper bound on the `initialize` handshake, defaulting to the
    /// language descriptor's `startup_timeout_secs`.
    pub start_timeout: Duration,
    /// Upper bound on any one request after the handshake.
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Soft bound on the wrapper's pending-request map (spec §5 Backpressure).
    pub pending_soft_bound: usize,
    /// Bound on requests queued once the soft bound is reached; requests
    /// beyond this fail `Busy`.
    pub queue_bound: usize,
    /// Number of retries for `ContentModified`/`RequestCancelled` server
    /// errors on idempotent queries (spec §4.2 Failure model).
    pub transient_retry_bound: u32,
}

impl WrapperConfig {
    pub fn for_language(language: Language, root_path: PathBuf) -> Self {
        let descriptor = language.descriptor();
        let root_uri = format!("file://{}", root_path.to_string_lossy());
        WrapperConfig {
            language,
            command: None,
            args: descriptor.default_args.iter().map(|s| s.to_string()).collect(),
            root_path,
            root_uri,
            initialization_options: None,
            start_timeout: Duration::from_secs(descriptor.startup_timeout_secs),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            pending_soft_bound: 1024,
            queue_bound: 256,
            transient_retry_bound: 3,
        }
    }

    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or_else(|| self.language.descriptor().default_command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_the_language_descriptor() {
        let cfg = WrapperConfig::for_language(Language::Rust, PathBuf::from("/tmp/proj"));
        assert_eq!(cfg.command(), "rust-analyzer");
        assert_eq!(cfg.start_timeout, Duration::from_secs(120));
    }
}
