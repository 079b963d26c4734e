pub mod engine;
pub mod plugins;

pub use engine::model::{DownloadRecord, DownloadStatus, LinkInput, Outcome, ResolvedTarget, Resolution};
pub use engine::orchestrator::{Orchestrator, OrchestratorError, Submission};
pub use plugins::registry::{FetchContext, PluginRegistry};
