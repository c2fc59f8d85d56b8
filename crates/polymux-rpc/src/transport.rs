//! The JSON-RPC transport itself: a writer half, a background reader task,
//! a pending-requests map, and notification/request dispatch (spec §4.1).

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use polymux_types::GatewayError;

use crate::frame::{read_message, write_message};

type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Handler for a server-to-client *notification* (no response expected).
pub type NotificationHandler = Arc<dyn Fn(Value) -> BoxFuture<()> + Send + Sync>;

/// Handler for a server-to-client *request* (a response must be written
/// back). Per spec §4.1, handlers are expected to resolve promptly; the
/// reader task awaits the handler before reading the next frame, so a slow
/// handler here stalls all other traffic on this wrapper.
pub type RequestHandler = Arc<dyn Fn(Value) -> BoxFuture<Result<Value, (i64, String)>> + Send + Sync>;

struct Shared {
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, GatewayError>>>>,
    /// ids of server-to-client requests currently being handled, used to
    /// detect the id-collision case in spec §4.1's tie-break rules.
    inflight_server_request_ids: Mutex<HashSet<i64>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    failed: AtomicBool,
    fail_notify: Notify,
}

/// A JSON-RPC transport bound to one subprocess's stdio.
///
/// Cloning a `Transport` is cheap and shares the same underlying writer,
/// pending map, and reader task — callers typically hold one `Transport`
/// per language-server wrapper and clone it into the wrapper's request
/// paths.
#[derive(Clone)]
pub struct Transport {
    writer: Arc<Mutex<Pin<Box<dyn AsyncWrite + Send>>>>,
    shared: Arc<Shared>,
    next_id: Arc<AtomicI64>,
    reader_handle: Arc<JoinHandle<()>>,
}

impl Transport {
    /// Spawns the reader task over `reader`/`writer` and returns a bound
    /// transport. `stderr`, if present, is drained into `on_stderr_line`
    /// without blocking the protocol reader (spec §4.1: "a separate reader
    /// drains the subprocess's stderr").
    pub fn spawn<R, W, E>(
        reader: R,
        writer: W,
        stderr: Option<E>,
        on_stderr_line: impl Fn(String) + Send + Sync + 'static,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            inflight_server_request_ids: Mutex::new(HashSet::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            failed: AtomicBool::new(false),
            fail_notify: Notify::new(),
        });

        let writer: Arc<Mutex<Pin<Box<dyn AsyncWrite + Send>>>> =
            Arc::new(Mutex::new(Box::pin(writer)));

        let reader_shared = shared.clone();
        let reader_writer = writer.clone();
        let reader_handle = tokio::spawn(async move {
            Self::reader_loop(reader, reader_shared, reader_writer).await;
        });

        if let Some(stderr) = stderr {
            tokio::spawn(Self::stderr_loop(stderr, on_stderr_line));
        }

        Transport {
            writer,
            shared,
            next_id: Arc::new(AtomicI64::new(1)),
            reader_handle: Arc::new(reader_handle),
        }
    }

    pub fn register_notification_handler(&self, method: impl Into<String>, handler: NotificationHandler) {
        let shared = self.shared.clone();
        let method = method.into();
        tokio::spawn(async move {
            shared.notification_handlers.write().await.insert(method, handler);
        });
    }

    /// Synchronous variant used at construction time before any traffic has
    /// started flowing, avoiding a spawn-and-race against the reader task.
    pub async fn register_notification_handler_now(&self, method: impl Into<String>, handler: NotificationHandler) {
        self.shared.notification_handlers.write().await.insert(method.into(), handler);
    }

    pub async fn register_request_handler_now(&self, method: impl Into<String>, handler: RequestHandler) {
        self.shared.request_handlers.write().await.insert(method.into(), handler);
    }

    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Resolves once the transport has transitioned to failed (reader
    /// crash, parse error, or `fail_now` called explicitly).
    pub async fn wait_for_failure(&self) {
        if self.is_failed() {
            return;
        }
        self.shared.fail_notify.notified().await;
    }

    /// Sends a request and returns its allocated id plus a receiver that
    /// resolves with the server's response. Timeout/cancellation/deadline
    /// bookkeeping is the wrapper layer's responsibility (spec §4.2); this
    /// layer only correlates ids to responses.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(i64, oneshot::Receiver<Result<Value, GatewayError>>), GatewayError> {
        if self.is_failed() {
            return Err(GatewayError::ServerTerminated);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(e) = self.write(&message).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        Ok((id, rx))
    }

    pub async fn send_notification(&self, method: &str, params: Value) -> Result<(), GatewayError> {
        if self.is_failed() {
            return Err(GatewayError::ServerTerminated);
        }
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write(&message).await
    }

    /// Sends `$/cancelRequest` for `id` (spec §4.2, §5 Cancellation). Does
    /// not itself remove the pending entry — the eventual response (or the
    /// caller's timeout) does that.
    pub async fn send_cancel_request(&self, id: i64) -> Result<(), GatewayError> {
        self.send_notification("$/cancelRequest", serde_json::json!({ "id": id }))
            .await
    }

    /// Forcibly removes a pending request without waiting for a response,
    /// used by the wrapper when a deadline elapses.
    pub async fn forget_pending(&self, id: i64) {
        self.shared.pending.lock().await.remove(&id);
    }

    pub fn pending_count(&self) -> usize {
        // best-effort, used for backpressure checks; a brief stale read is
        // acceptable since the bound is soft (spec §5 Backpressure).
        self.shared
            .pending
            .try_lock()
            .map(|m| m.len())
            .unwrap_or(0)
    }

    async fn write(&self, message: &Value) -> Result<(), GatewayError> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, message).await
    }

    async fn reader_loop<R>(reader: R, shared: Arc<Shared>, writer: Arc<Mutex<Pin<Box<dyn AsyncWrite + Send>>>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader: Pin<Box<dyn AsyncBufRead + Unpin + Send>> = Box::pin(BufReader::new(reader));

        loop {
            match read_message(&mut reader).await {
                Ok(Some(value)) => {
                    if let Err(e) = Self::dispatch(&value, &shared, &writer).await {
                        error!(error = %e, "error dispatching LSP message");
                    }
                }
                Ok(None) => {
                    debug!("LSP transport reached clean EOF");
                    Self::fail(&shared).await;
                    break;
                }
                Err(e) => {
                    error!(error = %e, "LSP transport reader crashed on malformed frame");
                    Self::fail(&shared).await;
                    break;
                }
            }
        }
    }

    async fn dispatch(
        value: &Value,
        shared: &Arc<Shared>,
        writer: &Arc<Mutex<Pin<Box<dyn AsyncWrite + Send>>>>,
    ) -> Result<(), GatewayError> {
        let has_id = value.get("id").is_some();
        let has_method = value.get("method").is_some();
        let has_result = value.get("result").is_some();
        let has_error = value.get("error").is_some();

        if has_id && !has_method {
            // Response. A response carrying both result and error is
            // treated as an error per spec §4.1's tie-break rule.
            let id = value
                .get("id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| GatewayError::ProtocolError("response id is not an integer".to_string()))?;

            {
                let inflight = shared.inflight_server_request_ids.lock().await;
                if inflight.contains(&id) {
                    Self::fail(shared).await;
                    return Err(GatewayError::ProtocolError(format!(
                        "request id {id} collision between outgoing request and in-flight server request"
                    )));
                }
            }

            let result = if has_error {
                let err = value.get("error").unwrap();
                let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
                let message = err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                Err(GatewayError::ServerError { code, message })
            } else if has_result {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            } else {
                Err(GatewayError::ProtocolError(
                    "response has neither result nor error".to_string(),
                ))
            };

            let sender = shared.pending.lock().await.remove(&id);
            match sender {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => {
                    trace!(id, "response for unknown request id, discarding");
                }
            }
            return Ok(());
        }

        if has_id && has_method {
            // Server-to-client request: must be answered synchronously.
            let id = value.get("id").cloned().unwrap_or(Value::Null);
            let id_num = id.as_i64();
            let method = value.get("method").and_then(|m| m.as_str()).unwrap_or_default().to_string();
            let params = value.get("params").cloned().unwrap_or(Value::Null);

            if let Some(id_num) = id_num {
                let already_pending = shared.pending.lock().await.contains_key(&id_num);
                if already_pending {
                    Self::fail(shared).await;
                    return Err(GatewayError::ProtocolError(format!(
                        "request id {id_num} collision: server reused an id we have outstanding"
                    )));
                }
                shared.inflight_server_request_ids.lock().await.insert(id_num);
            }

            let handler = shared.request_handlers.read().await.get(&method).cloned();
            let response = match handler {
                Some(handler) => match handler(params).await {
                    Ok(result) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Err((code, message)) => {
                        serde_json::json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                    }
                },
                None => {
                    debug!(method = %method, "no handler registered for server-to-client request");
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("method not found: {method}")}
                    })
                }
            };

            if let Some(id_num) = id_num {
                shared.inflight_server_request_ids.lock().await.remove(&id_num);
            }

            let mut w = writer.lock().await;
            write_message(&mut *w, &response).await?;
            return Ok(());
        }

        if has_method {
            // Notification.
            let method = value.get("method").and_then(|m| m.as_str()).unwrap_or_default().to_string();
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let handler = shared.notification_handlers.read().await.get(&method).cloned();
            match handler {
                Some(handler) => handler(params).await,
                None => trace!(method = %method, "unhandled notification"),
            }
            return Ok(());
        }

        warn!(?value, "received message that is neither request, response, nor notification");
        Ok(())
    }

    async fn fail(shared: &Arc<Shared>) {
        shared.failed.store(true, Ordering::SeqCst);
        let mut pending = shared.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(GatewayError::ServerTerminated));
        }
        shared.fail_notify.notify_waiters();
    }

    /// Forces the transport into the failed state from outside the reader
    /// task, used when the owning wrapper observes the subprocess itself
    /// exit (spec §4.2 Crash).
    pub async fn fail_now(&self) {
        Self::fail(&self.shared).await;
    }

    async fn stderr_loop<E>(stderr: E, on_line: impl Fn(String) + Send + Sync + 'static)
    where
        E: AsyncRead + Unpin + Send + 'static,
    {
        use tokio::io::AsyncBufReadExt;
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => on_line(line),
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "stderr reader stopped");
                    break;
                }
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // The reader task holds its own Arc<Shared>/writer clones and keeps
        // running until the underlying pipes close; we only abort it when
        // this is the last live handle, which Arc's strong_count tells us.
        if Arc::strong_count(&self.reader_handle) == 1 {
            self.reader_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn spawn_pair() -> (Transport, tokio::io::DuplexStream) {
        let (client_reader, server_writer) = tokio::io::duplex(8192);
        let (server_reader, client_writer) = tokio::io::duplex(8192);
        let transport = Transport::spawn(client_reader, client_writer, None::<tokio::io::DuplexStream>, |_| {});
        drop(server_reader);
        (transport, server_writer)
    }

    /// Writes one framed JSON-RPC message to the "server" side of a duplex
    /// pair, standing in for a subprocess's stdout.
    async fn server_send(server_writer: &mut tokio::io::DuplexStream, value: &Value) {
        write_message(server_writer, value).await.unwrap();
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let (client_reader, mut server_writer) = tokio::io::duplex(8192);
        let (_server_reader, client_writer) = tokio::io::duplex(8192);
        let transport = Transport::spawn(client_reader, client_writer, None::<tokio::io::DuplexStream>, |_| {});

        let (id, rx) = transport
            .send_request("textDocument/hover", serde_json::json!({}))
            .await
            .unwrap();

        server_send(
            &mut server_writer,
            &serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"contents": "docs"}}),
        )
        .await;

        let result = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(result, serde_json::json!({"contents": "docs"}));
    }

    #[tokio::test]
    async fn server_error_response_is_surfaced() {
        let (client_reader, mut server_writer) = tokio::io::duplex(8192);
        let (_server_reader, client_writer) = tokio::io::duplex(8192);
        let transport = Transport::spawn(client_reader, client_writer, None::<tokio::io::DuplexStream>, |_| {});

        let (id, rx) = transport
            .send_request("textDocument/definition", serde_json::json!({}))
            .await
            .unwrap();

        server_send(
            &mut server_writer,
            &serde_json::json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "nope"}}),
        )
        .await;

        let result = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        match result {
            Err(GatewayError::ServerError { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "nope");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_for_unknown_id_is_discarded_without_panicking() {
        let (transport, mut server_writer) = spawn_pair();
        server_send(
            &mut server_writer,
            &serde_json::json!({"jsonrpc": "2.0", "id": 999, "result": null}),
        )
        .await;
        // give the reader task a moment to process; no observable effect
        // beyond "nothing panics and the transport stays alive".
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!transport.is_failed());
    }

    #[tokio::test]
    async fn notification_dispatches_to_registered_handler() {
        let (transport, mut server_writer) = spawn_pair();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        transport
            .register_notification_handler_now(
                "textDocument/publishDiagnostics",
                Arc::new(move |_params| {
                    let seen = seen2.clone();
                    Box::pin(async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        server_send(
            &mut server_writer,
            &serde_json::json!({"jsonrpc": "2.0", "method": "textDocument/publishDiagnostics", "params": {}}),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_to_client_request_is_answered() {
        let (client_reader, mut server_writer) = tokio::io::duplex(8192);
        let (mut server_reader, client_writer) = tokio::io::duplex(8192);
        let transport = Transport::spawn(client_reader, client_writer, None::<tokio::io::DuplexStream>, |_| {});

        transport
            .register_request_handler_now(
                "workspace/configuration",
                Arc::new(|_params| Box::pin(async move { Ok(serde_json::json!([{"enable": true}])) })),
            )
            .await;

        server_send(
            &mut server_writer,
            &serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": "workspace/configuration", "params": {}}),
        )
        .await;

        let mut reader = tokio::io::BufReader::new(&mut server_reader);
        let response = tokio::time::timeout(Duration::from_secs(1), read_message(&mut reader))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(response["id"], serde_json::json!(7));
        assert_eq!(response["result"], serde_json::json!([{"enable": true}]));
    }

    #[tokio::test]
    async fn reader_crash_fails_all_pending_requests() {
        let (client_reader, server_writer) = tokio::io::duplex(8192);
        let (_server_reader, client_writer) = tokio::io::duplex(8192);
        let transport = Transport::spawn(client_reader, client_writer, None::<tokio::io::DuplexStream>, |_| {});

        let (_id1, rx1) = transport.send_request("foo", serde_json::json!({})).await.unwrap();
        let (_id2, rx2) = transport.send_request("bar", serde_json::json!({})).await.unwrap();

        // Dropping the server side closes the duplex, which the reader
        // observes as clean EOF and treats as a crash per spec §4.2.
        drop(server_writer);

        let r1 = tokio::time::timeout(Duration::from_secs(1), rx1).await.unwrap().unwrap();
        let r2 = tokio::time::timeout(Duration::from_secs(1), rx2).await.unwrap().unwrap();
        assert!(matches!(r1, Err(GatewayError::ServerTerminated)));
        assert!(matches!(r2, Err(GatewayError::ServerTerminated)));
        assert!(transport.is_failed());
    }

    #[tokio::test]
    async fn send_request_after_failure_is_rejected_immediately() {
        let (client_reader, server_writer) = tokio::io::duplex(8192);
        let (_server_reader, client_writer) = tokio::io::duplex(8192);
        let transport = Transport::spawn(client_reader, client_writer, None::<tokio::io::DuplexStream>, |_| {});
        drop(server_writer);
        transport.wait_for_failure().await;

        let result = transport.send_request("foo", serde_json::json!({})).await;
        assert!(matches!(result, Err(GatewayError::ServerTerminated)));
    }
}
