use crate::engine::model::{BeginOutcome, DownloadRecord, DownloadStatus};
use crate::engine::naming::ensure_unique_with;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("no record for {0}")]
    NotTracked(String),

    #[error("path for {url} already set to {path}")]
    PathAlreadySet { url: String, path: PathBuf },

    #[error("invalid status transition for {url}: {from:?} -> {to:?}")]
    InvalidTransition { url: String, from: DownloadStatus, to: DownloadStatus },
}

/// Source URL -> record. The only way to start working on a URL is
/// [`DownloadCache::try_begin`]; whoever gets `Inserted` owns the record.
#[derive(Debug, Default)]
pub struct DownloadCache {
    records: Mutex<HashMap<String, DownloadRecord>>,
}

impl DownloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DownloadRecord>> {
        // A panicking holder cannot leave a half-written record behind: every
        // mutation below is a single insert/assign.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// [`DownloadCache::try_begin`] that hands the new record to a
    /// [`RecordGuard`]. `None` if the URL is already tracked.
    pub fn begin(self: &Arc<Self>, url: &str) -> Option<RecordGuard> {
        match self.try_begin(url) {
            BeginOutcome::Inserted => Some(RecordGuard {
                cache: Arc::clone(self),
                url: url.to_string(),
                settled: false,
            }),
            BeginOutcome::AlreadyPresent => None,
        }
    }

    pub fn try_begin(&self, url: &str) -> BeginOutcome {
        let mut records = self.lock();
        if records.contains_key(url) {
            return BeginOutcome::AlreadyPresent;
        }
        records.insert(url.to_string(), DownloadRecord::pending(url));
        BeginOutcome::Inserted
    }

    pub fn set_path(&self, url: &str, path: PathBuf) -> Result<(), CacheError> {
        let mut records = self.lock();
        Self::set_path_locked(&mut records, url, path)
    }

    fn set_path_locked(
        records: &mut HashMap<String, DownloadRecord>,
        url: &str,
        path: PathBuf,
    ) -> Result<(), CacheError> {
        let rec = records
            .get_mut(url)
            .ok_or_else(|| CacheError::NotTracked(url.to_string()))?;
        if let Some(existing) = &rec.file_path {
            return Err(CacheError::PathAlreadySet { url: url.to_string(), path: existing.clone() });
        }
        rec.file_path = Some(path);
        Ok(())
    }

    /// Picks the lowest free variant of `candidate` (not on disk, not held by
    /// another pending or downloaded record) and stores it as `url`'s path,
    /// all under one lock. Failed records never wrote a file and hold nothing.
    pub fn claim_path(&self, url: &str, candidate: &Path) -> Result<PathBuf, CacheError> {
        let mut records = self.lock();
        let claimed = {
            let held_by_other = |p: &Path| {
                records.values().any(|r| {
                    r.url != url
                        && r.status != DownloadStatus::Failed
                        && r.file_path.as_deref() == Some(p)
                })
            };
            ensure_unique_with(candidate, |p| p.exists() || held_by_other(p))
        };
        Self::set_path_locked(&mut records, url, claimed.clone())?;
        Ok(claimed)
    }

    pub fn set_status(&self, url: &str, status: DownloadStatus) -> Result<(), CacheError> {
        let mut records = self.lock();
        let rec = records
            .get_mut(url)
            .ok_or_else(|| CacheError::NotTracked(url.to_string()))?;

        match (rec.status, status) {
            (DownloadStatus::Pending, DownloadStatus::Downloaded)
            | (DownloadStatus::Pending, DownloadStatus::Failed) => {
                rec.status = status;
                Ok(())
            }
            (from, to) => Err(CacheError::InvalidTransition { url: url.to_string(), from, to }),
        }
    }

    pub fn remove(&self, url: &str) -> Option<DownloadRecord> {
        self.lock().remove(url)
    }

    fn remove_if_pending(&self, url: &str) -> bool {
        let mut records = self.lock();
        match records.get(url) {
            Some(rec) if rec.status == DownloadStatus::Pending => {
                records.remove(url);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, url: &str) -> Option<DownloadRecord> {
        self.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Ownership of a freshly begun record.
///
/// Dropping the guard before [`RecordGuard::settle`] removes the record if it
/// is still `Pending`, so an abandoned or cancelled lifecycle never blocks the
/// URL.
#[derive(Debug)]
pub struct RecordGuard {
    cache: Arc<DownloadCache>,
    url: String,
    settled: bool,
}

impl RecordGuard {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Records the final status and keeps the record after the guard is gone.
    pub fn settle(mut self, status: DownloadStatus) -> Result<(), CacheError> {
        self.settled = true;
        self.cache.set_status(&self.url, status)
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if !self.settled && self.cache.remove_if_pending(&self.url) {
            tracing::debug!(url = %self.url, "released unfinished record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const URL: &str = "http://www.glowfoto.com/viewimage.php?img=abc&y=2009&m=03&t=jpg&rand=42";

    #[test]
    fn test_try_begin_inserts_pending_record() {
        let cache = DownloadCache::new();
        assert_eq!(cache.try_begin(URL), BeginOutcome::Inserted);

        let rec = cache.get(URL).unwrap();
        assert_eq!(rec, DownloadRecord { url: URL.to_string(), file_path: None, status: DownloadStatus::Pending });
    }

    #[test]
    fn test_try_begin_twice_is_already_present() {
        let cache = DownloadCache::new();
        assert_eq!(cache.try_begin(URL), BeginOutcome::Inserted);
        cache.set_path(URL, PathBuf::from("/tmp/a.jpg")).unwrap();

        assert_eq!(cache.try_begin(URL), BeginOutcome::AlreadyPresent);
        // untouched
        assert_eq!(cache.get(URL).unwrap().file_path, Some(PathBuf::from("/tmp/a.jpg")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_try_begin_concurrent_single_winner() {
        let cache = Arc::new(DownloadCache::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.try_begin(URL))
            })
            .collect();

        let outcomes: Vec<BeginOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let inserted = outcomes.iter().filter(|o| **o == BeginOutcome::Inserted).count();
        assert_eq!(inserted, 1);
        assert_eq!(outcomes.len() - inserted, 31);
    }

    #[test]
    fn test_set_path_only_once() {
        let cache = DownloadCache::new();
        cache.try_begin(URL);
        cache.set_path(URL, PathBuf::from("/tmp/a.jpg")).unwrap();

        let err = cache.set_path(URL, PathBuf::from("/tmp/b.jpg")).unwrap_err();
        assert_eq!(
            err,
            CacheError::PathAlreadySet { url: URL.to_string(), path: PathBuf::from("/tmp/a.jpg") }
        );
    }

    #[test]
    fn test_set_path_without_record() {
        let cache = DownloadCache::new();
        assert_eq!(
            cache.set_path(URL, PathBuf::from("/tmp/a.jpg")),
            Err(CacheError::NotTracked(URL.to_string()))
        );
    }

    #[test]
    fn test_status_transitions() {
        let cache = DownloadCache::new();
        cache.try_begin(URL);
        cache.set_status(URL, DownloadStatus::Failed).unwrap();

        assert!(matches!(
            cache.set_status(URL, DownloadStatus::Downloaded),
            Err(CacheError::InvalidTransition { from: DownloadStatus::Failed, .. })
        ));
        assert!(cache.set_status(URL, DownloadStatus::Pending).is_err());
        assert_eq!(cache.get(URL).unwrap().status, DownloadStatus::Failed);
    }

    #[test]
    fn test_remove_allows_new_begin() {
        let cache = DownloadCache::new();
        cache.try_begin(URL);
        assert!(cache.remove(URL).is_some());
        assert!(cache.remove(URL).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.try_begin(URL), BeginOutcome::Inserted);
    }

    #[test]
    fn test_claim_path_skips_paths_held_by_other_records() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("same.jpg");
        let cache = DownloadCache::new();
        cache.try_begin("http://a");
        cache.try_begin("http://b");

        let a = cache.claim_path("http://a", &target).unwrap();
        let b = cache.claim_path("http://b", &target).unwrap();

        assert_eq!(a, target);
        assert_eq!(b, dir.path().join("same(1).jpg"));
        assert_eq!(cache.get("http://b").unwrap().file_path, Some(b));
    }

    #[test]
    fn test_claim_path_ignores_failed_records() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("same.jpg");
        let cache = DownloadCache::new();
        cache.try_begin("http://a");
        cache.claim_path("http://a", &target).unwrap();
        cache.set_status("http://a", DownloadStatus::Failed).unwrap();

        cache.try_begin("http://b");
        assert_eq!(cache.claim_path("http://b", &target).unwrap(), target);
    }

    #[test]
    fn test_claim_path_respects_downloaded_records() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("same.jpg");
        let cache = DownloadCache::new();
        cache.try_begin("http://a");
        cache.claim_path("http://a", &target).unwrap();
        cache.set_status("http://a", DownloadStatus::Downloaded).unwrap();

        cache.try_begin("http://b");
        assert_eq!(cache.claim_path("http://b", &target).unwrap(), dir.path().join("same(1).jpg"));
    }

    #[test]
    fn test_record_guard_drop_releases_pending_record() {
        let cache = Arc::new(DownloadCache::new());
        let guard = cache.begin(URL).unwrap();
        assert!(cache.begin(URL).is_none());

        drop(guard);
        assert!(cache.get(URL).is_none());
        assert!(cache.begin(URL).is_some());
    }

    #[test]
    fn test_record_guard_settle_keeps_record() {
        let cache = Arc::new(DownloadCache::new());
        let guard = cache.begin(URL).unwrap();
        guard.settle(DownloadStatus::Failed).unwrap();

        assert_eq!(cache.get(URL).unwrap().status, DownloadStatus::Failed);
    }

    #[test]
    fn test_record_guard_drop_keeps_settled_record() {
        let cache = Arc::new(DownloadCache::new());
        let guard = cache.begin(URL).unwrap();
        cache.set_status(URL, DownloadStatus::Downloaded).unwrap();

        drop(guard);
        assert_eq!(cache.get(URL).unwrap().status, DownloadStatus::Downloaded);
    }

    #[test]
    fn test_claim_path_skips_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("disk.jpg");
        std::fs::write(&target, b"x").unwrap();
        let cache = DownloadCache::new();
        cache.try_begin(URL);

        assert_eq!(cache.claim_path(URL, &target).unwrap(), dir.path().join("disk(1).jpg"));
    }
}
