//! Framed JSON-RPC 2.0 transport over a language server subprocess's stdio
//! (spec §4.1, component C1).
//!
//! This crate owns exactly one concern: turning a pair of async byte
//! streams into correlated request/response pairs plus dispatched
//! notifications and server-to-client requests. It knows nothing about LSP
//! method names, lifecycle state, or document synchronization — that is
//! `polymux-lsp`'s job, layered on top of [`Transport`].

pub mod frame;
pub mod transport;

pub use frame::{read_message, write_message};
pub use transport::{NotificationHandler, RequestHandler, Transport};
