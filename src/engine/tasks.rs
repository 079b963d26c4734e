use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TrackedTask {
    id: Uuid,
    token: CancellationToken,
}

/// In-flight fetches keyed by source URL.
///
/// An entry exists exactly while a fetch runs: [`TaskRegistry::register`]
/// hands out a [`TaskGuard`] and dropping the guard removes the entry again.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TrackedTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TrackedTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Callers must own `url` through a successful `DownloadCache::try_begin`.
    pub fn register(self: &Arc<Self>, url: &str) -> TaskGuard {
        let task = TrackedTask { id: Uuid::new_v4(), token: CancellationToken::new() };
        let guard = TaskGuard {
            registry: Arc::clone(self),
            url: url.to_string(),
            id: task.id,
            token: task.token.clone(),
        };

        if let Some(prev) = self.lock().insert(url.to_string(), task) {
            tracing::warn!(url, prev_id = %prev.id, "replaced a live task registration");
        }
        guard
    }

    /// Signals the task running for `url`, if any. Returns whether one was found.
    pub fn cancel(&self, url: &str) -> bool {
        match self.lock().get(url) {
            Some(task) => {
                tracing::debug!(url, task_id = %task.id, "cancel requested");
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `url` if it still belongs to task `id`.
    pub fn deregister(&self, url: &str, id: Uuid) -> bool {
        let mut tasks = self.lock();
        match tasks.get(url) {
            Some(task) if task.id == id => {
                tasks.remove(url);
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, url: &str) -> bool {
        self.lock().contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Registration handle owned by the running fetch.
#[derive(Debug)]
pub struct TaskGuard {
    registry: Arc<TaskRegistry>,
    url: String,
    id: Uuid,
    token: CancellationToken,
}

impl TaskGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.registry.deregister(&self.url, self.id) {
            tracing::trace!(url = %self.url, task_id = %self.id, "deregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_drop_deregisters() {
        let registry = Arc::new(TaskRegistry::new());
        let guard = registry.register("http://a");
        assert!(registry.is_registered("http://a"));
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(!registry.is_registered("http://a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_unknown_url_is_noop() {
        let registry = Arc::new(TaskRegistry::new());
        assert!(!registry.cancel("http://nobody"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_signals_token() {
        let registry = Arc::new(TaskRegistry::new());
        let guard = registry.register("http://a");
        assert!(!guard.token().is_cancelled());

        assert!(registry.cancel("http://a"));
        assert!(guard.token().is_cancelled());
        // still registered until the task unwinds
        assert!(registry.is_registered("http://a"));
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let registry = Arc::new(TaskRegistry::new());
        let guard = registry.register("http://a");
        let token = guard.token().clone();
        drop(guard);

        assert!(!registry.cancel("http://a"));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_stale_deregister_keeps_newer_registration() {
        let registry = Arc::new(TaskRegistry::new());
        let old = registry.register("http://a");
        let old_id = old.id();
        std::mem::forget(old);

        let new = registry.register("http://a");
        assert!(!registry.deregister("http://a", old_id));
        assert!(registry.is_registered("http://a"));

        drop(new);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_races_completion() {
        let registry = Arc::new(TaskRegistry::new());
        for _ in 0..100 {
            let guard = registry.register("http://race");
            let r2 = registry.clone();
            let canceller = std::thread::spawn(move || {
                r2.cancel("http://race");
            });
            drop(guard);
            canceller.join().unwrap();
            assert!(!registry.is_registered("http://race"));
        }
    }
}
