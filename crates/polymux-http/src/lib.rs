//! Session-resilient streamable-HTTP transport and tool-dispatch surface
//! (spec §4.6, component C6). Sits on top of `polymux-manager` and
//! `polymux-symbols`; owns no language-server state of its own beyond the
//! session table.

pub mod dispatch;
pub mod server;
pub mod session;

pub use dispatch::{GatewayContext, ToolDispatch};
pub use server::{router, serve, AppState};
pub use session::{Session, SessionOutcome, SessionStore, SESSION_HEADER};
