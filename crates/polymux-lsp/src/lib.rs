//! Owns one language-server subprocess: lifecycle, initialize handshake,
//! request API, notifications, document sync (spec §4.2).

pub mod config;
pub mod state;
pub mod wrapper;

pub use config::{SyncKind, WrapperConfig};
pub use state::{DiagnosticsStore, DocumentState, WrapperState};
pub use wrapper::{CancelToken, LanguageServerWrapper};
