//! The gateway's single error taxonomy.
//!
//! Every subsystem (transport, wrapper, symbol layer, manager, HTTP shim)
//! returns `Result<_, GatewayError>`. Keeping one enum rather than one per
//! crate means callers at the tool-dispatch boundary never have to fold five
//! different error types into one before handing a result to the agent.

use std::time::Duration;

use thiserror::Error;

/// The complete error taxonomy for the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    // --- Client errors ---
    #[error("no configured language matches file: {0}")]
    UnsupportedFile(String),

    #[error("no symbol matches name path '{0}'")]
    UnknownSymbol(String),

    #[error("name path '{name_path}' is ambiguous: {} candidates", candidates.len())]
    AmbiguousNamePath {
        name_path: String,
        candidates: Vec<String>,
    },

    #[error("symbol body no longer matches the expected body; refusing edit")]
    StaleSymbol,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // --- Server errors ---
    #[error("language server wrapper is not ready")]
    NotReady,

    #[error("language server terminated")]
    ServerTerminated,

    #[error("language server returned error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("operation unsupported by this language server: {0}")]
    Unsupported(String),

    // --- Transient errors ---
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request was cancelled")]
    Cancelled,

    #[error("wrapper is busy; request queue is full")]
    Busy,

    #[error("content was modified concurrently")]
    ContentModified,

    // --- I/O errors ---
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("edit failed: {0}")]
    EditFailed(String),

    // --- Internal errors ---
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("internal panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Transient errors may be retried internally once for idempotent
    /// operations; see spec §7 Propagation policy and §4.2's cancellation
    /// code retry bound.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::Cancelled
                | GatewayError::Busy
                | GatewayError::ContentModified
                | GatewayError::ServerError { code: -32801, .. }
                | GatewayError::ServerError { code: -32802, .. }
        )
    }

    /// `true` for the two JSON-RPC codes LSP servers use to mean "try again":
    /// `RequestCancelled` (-32801) and `ContentModified` (-32802).
    pub fn is_retryable_server_error(&self) -> bool {
        matches!(
            self,
            GatewayError::ServerError { code: -32801, .. }
                | GatewayError::ServerError { code: -32802, .. }
                | GatewayError::ContentModified
        )
    }
}

/// Result alias used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;
