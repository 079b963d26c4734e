use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Receives the path of every finished download. Calls arrive from many
/// tasks in no particular order; only the latest one matters.
pub trait LastCompletedSink: Send + Sync {
    fn publish(&self, path: &Path);
}

/// Keeps the most recent path in memory.
#[derive(Debug, Default)]
pub struct LatestPath {
    last: Mutex<Option<PathBuf>>,
}

impl LatestPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<PathBuf> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LastCompletedSink for LatestPath {
    fn publish(&self, path: &Path) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.to_path_buf());
    }
}
