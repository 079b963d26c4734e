use std::collections::HashMap;
use std::path::PathBuf;

/// One link handed to the orchestrator: a hosting-page URL plus whatever the
/// post scraper knew about it.
#[derive(Debug, Clone, Default)]
pub struct LinkInput {
    pub url: String,
    /// Thumbnail URL, sent as `Referer` instead of the source URL when set.
    pub referer: Option<String>,
    pub post_title: Option<String>,
    /// Position of the image inside its post; used for fallback file names.
    pub index: u32,
    pub headers: HashMap<String, String>,
}

impl LinkInput {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Default::default() }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_post(mut self, title: impl Into<String>, index: u32) -> Self {
        self.post_title = Some(title.into());
        self.index = index;
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Downloaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub url: String,
    pub file_path: Option<PathBuf>,
    pub status: DownloadStatus,
}

impl DownloadRecord {
    pub fn pending(url: &str) -> Self {
        Self { url: url.to_string(), file_path: None, status: DownloadStatus::Pending }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub direct_url: String,
    pub suggested_file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Target(ResolvedTarget),
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    Inserted,
    AlreadyPresent,
}

/// How a single URL's lifecycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Another task already owns this URL; nothing was done.
    AlreadyTracked,
    NoMatch,
    Downloaded(PathBuf),
    Failed(String),
    Cancelled,
}

impl Outcome {
    pub fn is_downloaded(&self) -> bool {
        matches!(self, Outcome::Downloaded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMethod {
    #[default]
    Get,
    Post,
}

impl FetchMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            _ => None,
        }
    }
}

/// Everything the transfer driver needs for one request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source_url: String,
    pub direct_url: String,
    pub referer: String,
    pub headers: HashMap<String, String>,
}
