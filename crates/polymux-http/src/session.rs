//! Session-resilient session table (spec §4.6, component C6).
//!
//! A client's streamable-HTTP session is nothing more than a server-minted
//! opaque id; the one rule that matters is spec §4.6's rebind contract: an
//! unrecognized session id presented by a client is never an error, it is
//! silently upgraded into a fresh session and the request proceeds as if it
//! were the first one on that session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use uuid::Uuid;

/// Header name carrying the session id. Opaque to this crate beyond being a
/// `const` — the deployment chooses what it actually means to the client;
/// loading it from configuration is the CLI/config layer's job, out of
/// scope here (spec.md §1 Non-goals).
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// One live session: its id and when it was minted. Transport objects
/// themselves (per spec §3 Session: "the transport object responsible for a
/// single client's streamed request/response exchange") are not modeled
/// here — `polymux-http`'s transport is a plain request/response handler,
/// not a long-lived streaming connection, so a session has nothing to own
/// beyond its id and freshness.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: Instant,
}

/// The outcome of resolving an inbound session id, distinguishing a
/// continuing session from one that had to be minted or rebound — callers
/// use this to decide whether to treat the request as an initialization
/// (spec §4.6: "handle the request as an initialization").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Continuing,
    Minted,
    Rebound,
}

/// The process-wide session table plus the single mutex that serializes
/// session creation (spec §4.6: "a single mutex serialises session creation
/// to prevent two racing invalid-session requests from constructing two
/// distinct sessions whose transports then compete").
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    creation_lock: AsyncMutex<()>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            sessions: DashMap::new(),
            creation_lock: AsyncMutex::new(()),
        }
    }

    /// Resolves an inbound session id header value into a live session,
    /// implementing spec §4.6's three-way contract:
    /// - missing header: mint a new session;
    /// - present and known: route to it;
    /// - present but unknown: log a warning naming the stale id, then mint
    ///   a fresh session under the creation lock rather than surfacing an
    ///   error.
    pub async fn resolve(&self, header_value: Option<&str>) -> (Arc<Session>, SessionOutcome) {
        match header_value {
            None => {
                let session = self.mint().await;
                (session, SessionOutcome::Minted)
            }
            Some(id) => {
                if let Some(existing) = self.sessions.get(id) {
                    return (existing.clone(), SessionOutcome::Continuing);
                }
                warn!(stale_session_id = %id, "unknown session id presented; rebinding to a fresh session");
                let session = self.mint().await;
                (session, SessionOutcome::Rebound)
            }
        }
    }

    async fn mint(&self) -> Arc<Session> {
        let _guard = self.creation_lock.lock().await;
        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            created_at: Instant::now(),
        });
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Drops sessions older than `max_age`, so a long-running gateway
    /// doesn't accumulate an unbounded session table from clients that
    /// disappear without a clean close.
    pub fn sweep_expired(&self, max_age: Duration) {
        let now = Instant::now();
        self.sessions.retain(|_, session| now.duration_since(session.created_at) < max_age);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
