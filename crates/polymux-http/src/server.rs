//! The streamable-HTTP transport shim (spec §4.6, component C6): a single
//! POST endpoint carrying every tool call as a JSON body, with session
//! resilience layered on top via the [`SESSION_HEADER`].
//!
//! Grounded in the same router/handler/state shape as the teacher's sibling
//! webhook surface (`rust-ai-ide-webhooks`), since that crate's own source
//! wasn't retrieved into the examples pack; the concrete axum wiring below
//! follows the plain `Router`/`State`/`tower_http::cors` idiom the pack
//! shows elsewhere (e.g. `keel-server`'s HTTP surface).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use polymux_types::GatewayError;

use crate::dispatch::ToolDispatch as _;
use crate::dispatch::GatewayContext;
use crate::session::{SessionStore, SESSION_HEADER};

/// Everything a request handler needs: the dispatch context (manager plus
/// project root) and the session table.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<GatewayContext>,
    pub sessions: Arc<SessionStore>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub struct ToolCallResponse {
    pub result: Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Builds the axum router: a health probe plus the one tool-call endpoint,
/// with tracing and a permissive CORS layer (the gateway is meant to sit
/// behind a trusted local loopback per spec §4.6, not face the public
/// internet directly).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/tools/call", post(call_tool))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves the router on `addr` until the process is stopped.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "polymux-http listening");
    axum::serve(listener, app).await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// The one inbound tool-call endpoint. Resolves the session per spec §4.6's
/// rebind contract, dispatches the named tool, and always echoes the
/// resolved session id back on the response — including when the request
/// presented a stale one, so the client picks up the replacement
/// transparently.
async fn call_tool(State(state): State<AppState>, headers: HeaderMap, Json(request): Json<ToolCallRequest>) -> Response {
    let header_value = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
    let (session, _outcome) = state.sessions.resolve(header_value).await;

    let result = state.context.call(&request.tool, &request.args).await;

    let mut response = match result {
        Ok(value) => (StatusCode::OK, Json(ToolCallResponse { result: value })).into_response(),
        Err(err) => (status_for(&err), Json(ErrorResponse { error: err.to_string() })).into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(&session.id) {
        response.headers_mut().insert(HeaderName::from_static("mcp-session-id"), value);
    }
    response
}

/// Maps a [`GatewayError`] onto the HTTP status a caller would expect —
/// client-shaped errors to 4xx, everything the gateway itself couldn't
/// recover from to 5xx, matching spec §7's client/server/transient/I-O/
/// internal taxonomy.
fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UnsupportedFile(_)
        | GatewayError::UnknownSymbol(_)
        | GatewayError::AmbiguousNamePath { .. }
        | GatewayError::InvalidArgument(_)
        | GatewayError::FileNotFound(_) => StatusCode::BAD_REQUEST,

        GatewayError::StaleSymbol | GatewayError::ContentModified => StatusCode::CONFLICT,

        GatewayError::PermissionDenied(_) => StatusCode::FORBIDDEN,

        GatewayError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,

        GatewayError::Busy => StatusCode::SERVICE_UNAVAILABLE,

        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,

        GatewayError::Cancelled => StatusCode::BAD_REQUEST,

        GatewayError::NotReady | GatewayError::ServerTerminated | GatewayError::ServerError { .. } | GatewayError::EditFailed(_) => {
            StatusCode::BAD_GATEWAY
        }

        GatewayError::ProtocolError(_) | GatewayError::Panic(_) | GatewayError::Io(_) | GatewayError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(status_for(&GatewayError::UnknownSymbol("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&GatewayError::StaleSymbol), StatusCode::CONFLICT);
    }

    #[test]
    fn server_errors_map_to_5xx_or_502() {
        assert_eq!(status_for(&GatewayError::NotReady), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&GatewayError::ProtocolError("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn transient_busy_maps_to_service_unavailable() {
        assert_eq!(status_for(&GatewayError::Busy), StatusCode::SERVICE_UNAVAILABLE);
    }
}
