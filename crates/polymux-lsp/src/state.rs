//! Lifecycle state and per-document bookkeeping (spec §3 DocumentState, §4.2
//! Lifecycle).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

/// `not-started → starting → running → shutting-down → shut-down`, with
/// `failed` reachable from any state (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
    NotStarted,
    Starting,
    Running,
    ShuttingDown,
    ShutDown,
    Failed,
}

impl WrapperState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WrapperState::ShutDown | WrapperState::Failed)
    }
}

/// The wrapper's record of one open document (spec §3 DocumentState).
/// Cloning shares the same underlying text+version mutex.
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub uri: String,
    pub absolute_path: std::path::PathBuf,
    inner: Arc<Mutex<DocumentInner>>,
}

#[derive(Debug)]
struct DocumentInner {
    text: String,
    version: i32,
}

impl DocumentState {
    pub fn new(uri: String, absolute_path: std::path::PathBuf, text: String) -> Self {
        DocumentState {
            uri,
            absolute_path,
            inner: Arc::new(Mutex::new(DocumentInner { text, version: 1 })),
        }
    }

    pub async fn text(&self) -> String {
        self.inner.lock().await.text.clone()
    }

    pub async fn version(&self) -> i32 {
        self.inner.lock().await.version
    }

    /// Replaces the tracked text wholesale and bumps the version counter,
    /// returning the new version. Full-document sync and the Symbol Layer's
    /// edit primitives both funnel through here so the wrapper's notion of
    /// the document always matches the last `didChange` sent (spec §3
    /// DocumentState invariant).
    pub async fn set_text(&self, text: String) -> i32 {
        let mut inner = self.inner.lock().await;
        inner.text = text;
        inner.version += 1;
        inner.version
    }
}

/// Diagnostics last published for one URI (spec §4.2 notification handlers).
/// Last-writer-wins; readers never block a publish.
#[derive(Debug, Default)]
pub struct DiagnosticsStore {
    by_uri: std::sync::RwLock<std::collections::HashMap<String, (Vec<lsp_types::Diagnostic>, Instant)>>,
}

impl DiagnosticsStore {
    pub fn publish(&self, uri: String, diagnostics: Vec<lsp_types::Diagnostic>) {
        self.by_uri.write().unwrap().insert(uri, (diagnostics, Instant::now()));
    }

    pub fn get(&self, uri: &str) -> Option<Vec<lsp_types::Diagnostic>> {
        self.by_uri.read().unwrap().get(uri).map(|(d, _)| d.clone())
    }

    pub fn purge(&self, uri: &str) {
        self.by_uri.write().unwrap().remove(uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_text_bumps_version_monotonically() {
        let doc = DocumentState::new("file:///a".into(), "/a".into(), "one".into());
        assert_eq!(doc.version().await, 1);
        let v2 = doc.set_text("two".into()).await;
        assert_eq!(v2, 2);
        assert_eq!(doc.text().await, "two");
    }

    #[test]
    fn diagnostics_store_is_last_writer_wins() {
        let store = DiagnosticsStore::default();
        store.publish("file:///a".into(), vec![]);
        assert!(store.get("file:///a").is_some());
        store.purge("file:///a");
        assert!(store.get("file:///a").is_none());
    }
}
