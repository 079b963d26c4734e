use crate::engine::model::DownloadStatus;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started { url: String, direct_url: String, target_path: PathBuf },
    StatusChanged { url: String, status: DownloadStatus },
    Abandoned { url: String, reason: String },
    Cancelled { url: String },
    Error { scope: String, message: String },
    Info { scope: String, message: String },
}
