//! Registry of in-flight chat tasks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ChatTask {
    request_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Chat tasks spawned by the engine, keyed by a local task id.
///
/// The reading path inserts on spawn; each task removes itself when it
/// finishes.
#[derive(Clone, Default)]
pub struct ChatTasks {
    inner: Arc<Mutex<HashMap<u64, ChatTask>>>,
    next: Arc<AtomicU64>,
}

impl std::fmt::Debug for ChatTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTasks").finish_non_exhaustive()
    }
}

impl ChatTasks {
    /// Spawn `fut` as the chat task for `request_id`.
    ///
    /// The registry lock is held across the spawn so the task cannot
    /// deregister before it has been inserted.
    pub async fn spawn<F>(&self, request_id: &str, cancel: CancellationToken, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let registry = self.clone();

        let mut tasks = self.inner.lock().await;
        let handle = tokio::spawn(async move {
            fut.await;
            registry.finish(id).await;
        });
        tasks.insert(
            id,
            ChatTask {
                request_id: request_id.to_owned(),
                cancel,
                handle,
            },
        );
        debug!(request_id, task = id, active = tasks.len(), "chat task spawned");
    }

    async fn finish(&self, id: u64) {
        if let Some(task) = self.inner.lock().await.remove(&id) {
            debug!(request_id = %task.request_id, task = id, "chat task finished");
        }
    }

    /// Number of chat tasks still running.
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Give each outstanding task up to `grace` to finish.
    ///
    /// Tasks still running afterwards have their token cancelled and are
    /// abandoned without being joined. Returns how many were abandoned.
    pub async fn drain(&self, grace: Duration) -> usize {
        let tasks = std::mem::take(&mut *self.inner.lock().await);
        if tasks.is_empty() {
            return 0;
        }
        info!(count = tasks.len(), "waiting for in-flight chats");

        let mut abandoned = 0;
        for (id, mut task) in tasks {
            if tokio::time::timeout(grace, &mut task.handle).await.is_err() {
                warn!(
                    request_id = %task.request_id,
                    task = id,
                    "chat still running after shutdown grace, abandoning"
                );
                task.cancel.cancel();
                abandoned += 1;
            }
        }
        abandoned
    }
}
