#![allow(dead_code)]

use async_trait::async_trait;
use image_ripper::engine::model::FetchRequest;
use image_ripper::engine::sink::LatestPath;
use image_ripper::plugins::registry::{FetchContext, FetchError, PluginRegistry, TransferDriver};
use image_ripper::Orchestrator;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xFF, 0xD9];

/// Orchestrator over the default plugins plus the sink it publishes to.
pub fn orchestrator() -> (Orchestrator, Arc<LatestPath>) {
    orchestrator_with_ctx(FetchContext::default())
}

pub fn orchestrator_with_ctx(ctx: FetchContext) -> (Orchestrator, Arc<LatestPath>) {
    let registry = PluginRegistry::with_defaults().unwrap();
    let sink = Arc::new(LatestPath::new());
    (Orchestrator::new(registry, ctx, sink.clone()), sink)
}

/// Serves `body` at `file_path` exactly `times` times.
pub async fn mount_image(server: &MockServer, file_path: &str, body: &[u8], times: u64) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.to_vec())
                .append_header("Content-Type", "image/jpeg"),
        )
        .expect(times)
        .mount(server)
        .await;
}

/// Same as [`mount_image`] but the response only starts after `delay`.
pub async fn mount_slow_image(server: &MockServer, file_path: &str, delay: Duration, times: u64) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(JPEG_BYTES.to_vec())
                .set_delay(delay),
        )
        .expect(times)
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, file_path: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Driver that never touches the network: records each request and writes
/// a fixed body to the destination.
#[derive(Default)]
pub struct RecordingDriver {
    pub requests: Mutex<Vec<FetchRequest>>,
}

impl RecordingDriver {
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferDriver for RecordingDriver {
    fn name(&self) -> &'static str {
        "recording-driver"
    }

    fn supports(&self, _direct_url: &str) -> bool {
        true
    }

    async fn fetch_to_file(
        &self,
        req: &FetchRequest,
        _ctx: &FetchContext,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.requests.lock().unwrap().push(req.clone());
        tokio::fs::write(dest, JPEG_BYTES).await?;
        Ok(JPEG_BYTES.len() as u64)
    }
}

pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
