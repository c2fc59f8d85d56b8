//! Debounced background snapshot flushing (spec §4.4 Persistence:
//! "periodically serialised to disk in the background with a coalescing
//! debounce window (default 5s) and flushed on clean shutdown").

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::PolymuxCaches;

const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Coalesces repeated `mark_dirty` calls into one flush per debounce
/// window, so a burst of edits doesn't write the same snapshot files over
/// and over.
pub struct FlushCoordinator {
    dirty: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FlushCoordinator {
    pub fn spawn(caches: Arc<PolymuxCaches>, cache_dir: PathBuf) -> Self {
        Self::spawn_with_debounce(caches, cache_dir, DEFAULT_DEBOUNCE)
    }

    pub fn spawn_with_debounce(caches: Arc<PolymuxCaches>, cache_dir: PathBuf, debounce: Duration) -> Self {
        let dirty = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let loop_dirty = dirty.clone();
        let loop_notify = notify.clone();
        let handle = tokio::spawn(async move {
            loop {
                loop_notify.notified().await;
                // Coalesce: wait out the debounce window, absorbing any
                // further dirty marks that arrive during it.
                tokio::time::sleep(debounce).await;
                if loop_dirty.swap(false, Ordering::SeqCst) {
                    debug!(cache_dir = %cache_dir.display(), "flushing cache snapshots");
                    caches.save_snapshots(&cache_dir).await;
                }
            }
        });

        FlushCoordinator { dirty, notify, handle }
    }

    /// Marks the caches dirty, scheduling a flush at most `debounce` from
    /// now. Cheap enough to call after every cache write.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Stops the background loop. Callers should flush once more
    /// explicitly afterward for a clean shutdown, since a pending debounce
    /// window is simply dropped, not fast-forwarded.
    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_dirty_triggers_a_flush_after_the_debounce_window() {
        let dir = tempfile::tempdir().unwrap();
        let caches = Arc::new(PolymuxCaches::new());
        caches.raw_symbols.insert("file:///a.rs", "h1", serde_json::json!({"ok": true}));

        let coordinator = FlushCoordinator::spawn_with_debounce(caches.clone(), dir.path().to_path_buf(), Duration::from_millis(30));
        coordinator.mark_dirty();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let expected = dir.path().join("raw_symbols");
        assert!(expected.exists());
        coordinator.stop();
    }
}
