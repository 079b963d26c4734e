use crate::engine::cache::{DownloadCache, RecordGuard};
use crate::engine::events::EngineEvent;
use crate::engine::model::*;
use crate::engine::naming::{fit_path_length, sanitize};
use crate::engine::sink::LastCompletedSink;
use crate::engine::tasks::{TaskGuard, TaskRegistry};
use crate::plugins::registry::{FetchContext, FetchError, PluginRegistry, TransferDriver};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    /// The destination is unusable; nothing else should be tried against it.
    #[error("cannot create save directory {}: {source}", path.display())]
    SaveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of [`Orchestrator::submit`].
#[derive(Debug)]
pub enum Submission {
    /// The fetch runs in the background; the handle yields its outcome.
    Started(JoinHandle<Outcome>),
    /// Nothing to fetch (already tracked, or no resolver matched).
    Finished(Outcome),
}

/// Everything resolved and registered; only the transfer is left.
///
/// Field order matters when the future is dropped mid-transfer: the task
/// registration goes before the record.
struct Prepared {
    url: String,
    request: FetchRequest,
    dest: PathBuf,
    driver: Arc<dyn TransferDriver>,
    guard: TaskGuard,
    record: RecordGuard,
}

enum Stage {
    Done(Outcome),
    Ready(Prepared),
}

/// Drives one source URL from dedup check to recorded result. Clones share
/// the cache, the task registry and the event channel.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    cache: Arc<DownloadCache>,
    tasks: Arc<TaskRegistry>,
    sink: Arc<dyn LastCompletedSink>,
    fetch_ctx: FetchContext,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Orchestrator {
    pub fn new(registry: PluginRegistry, fetch_ctx: FetchContext, sink: Arc<dyn LastCompletedSink>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            registry: Arc::new(registry),
            cache: Arc::new(DownloadCache::new()),
            tasks: Arc::new(TaskRegistry::new()),
            sink,
            fetch_ctx,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn record(&self, url: &str) -> Option<DownloadRecord> {
        self.cache.get(url)
    }

    pub fn is_running(&self, url: &str) -> bool {
        self.tasks.is_registered(url)
    }

    /// Asks the fetch for `url` to stop. No-op if nothing is running.
    pub fn cancel(&self, url: &str) -> bool {
        self.tasks.cancel(url)
    }

    /// Drops a finished (downloaded or failed) record so the URL can be
    /// submitted again. Pending records belong to a live task and stay.
    pub fn forget(&self, url: &str) -> bool {
        match self.cache.get(url) {
            Some(rec) if rec.status != DownloadStatus::Pending => self.cache.remove(url).is_some(),
            _ => false,
        }
    }

    /// Runs the whole lifecycle for one link and waits for it.
    pub async fn download(&self, input: LinkInput, save_dir: &Path) -> Result<Outcome, OrchestratorError> {
        match self.prepare(input, save_dir).await? {
            Stage::Done(outcome) => Ok(outcome),
            Stage::Ready(p) => Ok(self.run_fetch(p).await),
        }
    }

    /// Dedups, resolves and registers inline, then hands the transfer to a
    /// spawned task and returns.
    pub async fn submit(&self, input: LinkInput, save_dir: &Path) -> Result<Submission, OrchestratorError> {
        match self.prepare(input, save_dir).await? {
            Stage::Done(outcome) => Ok(Submission::Finished(outcome)),
            Stage::Ready(p) => {
                let this = self.clone();
                Ok(Submission::Started(tokio::spawn(async move { this.run_fetch(p).await })))
            }
        }
    }

    /// Downloads every link concurrently into `save_dir`. An unusable
    /// directory aborts the batch before any link starts; per-link failures
    /// only show up in that link's outcome. Outcomes keep input order.
    pub async fn download_batch(
        &self,
        inputs: Vec<LinkInput>,
        save_dir: &Path,
    ) -> Result<Vec<Outcome>, OrchestratorError> {
        ensure_dir(save_dir).await?;

        let total = inputs.len();
        let mut futs = FuturesUnordered::new();
        for (i, input) in inputs.into_iter().enumerate() {
            let this = self.clone();
            futs.push(async move {
                let outcome = match this.download(input, save_dir).await {
                    Ok(o) => o,
                    Err(e) => Outcome::Failed(e.to_string()),
                };
                (i, outcome)
            });
        }

        let mut outcomes: Vec<Option<Outcome>> = vec![None; total];
        while let Some((i, outcome)) = futs.next().await {
            outcomes[i] = Some(outcome);
        }
        Ok(outcomes.into_iter().flatten().collect())
    }

    async fn prepare(&self, input: LinkInput, save_dir: &Path) -> Result<Stage, OrchestratorError> {
        let url = input.url.clone();

        // Held until the record is settled; dropping it early (abandon, error,
        // caller dropping this future) releases the URL again.
        let Some(record) = self.cache.begin(&url) else {
            tracing::debug!(url = %url, "already tracked, skipping");
            self.abandoned(&url, "already tracked");
            return Ok(Stage::Done(Outcome::AlreadyTracked));
        };

        if let Err(e) = ensure_dir(save_dir).await {
            drop(record);
            tracing::error!(url = %url, error = %e, "save directory unusable");
            let _ = self.event_tx.send(EngineEvent::Error { scope: "save-dir".to_string(), message: e.to_string() });
            return Err(e);
        }

        let target = match self.registry.resolve(&input) {
            Resolution::Target(t) => t,
            Resolution::NoMatch => {
                drop(record);
                tracing::debug!(url = %url, "no resolver matched");
                self.abandoned(&url, "no matching resolver");
                return Ok(Stage::Done(Outcome::NoMatch));
            }
        };

        let preferred = sanitize(&target.suggested_file_name);
        let name = fit_path_length(save_dir, &preferred, input.index);
        let dest = match self.cache.claim_path(&url, &save_dir.join(&name)) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(url = %url, error = %e, "cache record out of sync");
                return Ok(Stage::Done(self.fail(record, e.to_string())));
            }
        };
        if dest.file_name() != Some(std::ffi::OsStr::new(&preferred)) {
            let _ = self.event_tx.send(EngineEvent::Info {
                scope: "naming".to_string(),
                message: format!("{} saved as {}", preferred, dest.display()),
            });
        }

        let Some(driver) = self.registry.driver_for(&target.direct_url) else {
            return Ok(Stage::Done(self.fail(record, format!("no driver for {}", target.direct_url))));
        };

        let guard = self.tasks.register(&url);
        tracing::info!(url = %url, task_id = %guard.id(), direct_url = %target.direct_url, path = %dest.display(), driver = driver.name(), "fetch started");
        let _ = self.event_tx.send(EngineEvent::Started {
            url: url.clone(),
            direct_url: target.direct_url.clone(),
            target_path: dest.clone(),
        });

        let request = FetchRequest {
            source_url: url.clone(),
            direct_url: target.direct_url,
            referer: input.referer.clone().unwrap_or_else(|| url.clone()),
            headers: input.headers,
        };

        Ok(Stage::Ready(Prepared { url, request, dest, driver, guard, record }))
    }

    async fn run_fetch(&self, p: Prepared) -> Outcome {
        let result = p
            .driver
            .fetch_to_file(&p.request, &self.fetch_ctx, &p.dest, p.guard.token())
            .await;

        // Deregister first so a resubmission after a cancel never sees the
        // old task.
        drop(p.guard);
        self.finalize(p.record, &p.url, &p.dest, result)
    }

    fn finalize(&self, record: RecordGuard, url: &str, dest: &Path, result: Result<u64, FetchError>) -> Outcome {
        match result {
            Ok(bytes) => {
                if let Err(e) = record.settle(DownloadStatus::Downloaded) {
                    tracing::error!(url, error = %e, "cache record out of sync");
                }
                self.sink.publish(dest);
                tracing::info!(url, path = %dest.display(), bytes, "downloaded");
                let _ = self.event_tx.send(EngineEvent::StatusChanged {
                    url: url.to_string(),
                    status: DownloadStatus::Downloaded,
                });
                Outcome::Downloaded(dest.to_path_buf())
            }
            Err(e) if e.is_cancelled() => {
                // Nothing was committed; the URL can be resubmitted.
                drop(record);
                tracing::info!(url, "fetch cancelled");
                let _ = self.event_tx.send(EngineEvent::Cancelled { url: url.to_string() });
                Outcome::Cancelled
            }
            Err(e) => self.fail(record, e.to_string()),
        }
    }

    fn fail(&self, record: RecordGuard, message: String) -> Outcome {
        let url = record.url().to_string();
        if let Err(e) = record.settle(DownloadStatus::Failed) {
            tracing::error!(url = %url, error = %e, "cache record out of sync");
        }
        tracing::warn!(url = %url, error = %message, "download failed");
        let _ = self.event_tx.send(EngineEvent::Error { scope: format!("fetch({})", url), message: message.clone() });
        let _ = self.event_tx.send(EngineEvent::StatusChanged { url, status: DownloadStatus::Failed });
        Outcome::Failed(message)
    }

    fn abandoned(&self, url: &str, reason: &str) {
        let _ = self.event_tx.send(EngineEvent::Abandoned { url: url.to_string(), reason: reason.to_string() });
    }
}

async fn ensure_dir(save_dir: &Path) -> Result<(), OrchestratorError> {
    tokio::fs::create_dir_all(save_dir)
        .await
        .map_err(|source| OrchestratorError::SaveDirectory { path: save_dir.to_path_buf(), source })
}
