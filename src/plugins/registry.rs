use crate::engine::model::{FetchMethod, FetchRequest, LinkInput, Resolution};
use async_trait::async_trait;
use clap::{ArgMatches, Command};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-host translation from a hosting-page URL to the real image.
///
/// Implementations are pure: no I/O, same input gives the same output.
pub trait LinkResolver: Send + Sync {
    fn name(&self) -> &'static str;
    /// 0 means "not mine"; the highest score wins.
    fn can_handle(&self, input: &LinkInput) -> u8;
    fn resolve(&self, input: &LinkInput) -> Resolution;
}

/// Supplies the `Cookie` header for outgoing requests (forum login etc.).
pub trait CookieSource: Send + Sync + std::fmt::Debug {
    fn cookie_header(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct StaticCookie(pub String);

impl CookieSource for StaticCookie {
    fn cookie_header(&self) -> Option<String> {
        if self.0.trim().is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows; U; Windows NT 5.2; en-US; rv:1.7.10) Gecko/20050716 Firefox/1.0.6";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct FetchContext {
    pub user_agent: String,
    pub timeout: Duration,
    pub method: FetchMethod,
    pub cookies: Option<Arc<dyn CookieSource>>,
}

impl Default for FetchContext {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            method: FetchMethod::Get,
            cookies: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("cancelled")]
    Cancelled,

    #[error("http status error: {0}")]
    Status(reqwest::StatusCode),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

#[async_trait]
pub trait TransferDriver: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, direct_url: &str) -> bool;

    /// Downloads `req.direct_url` into `dest`, returning the byte count.
    ///
    /// Must stop at the next I/O await once `cancel` fires, and must not
    /// leave anything at `dest` unless it returns `Ok`.
    async fn fetch_to_file(
        &self,
        req: &FetchRequest,
        ctx: &FetchContext,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct DownloadCliConfig {
    pub headers: HashMap<String, String>,
    pub fetch_ctx: FetchContext,
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_download_command(&self, cmd: Command) -> Command;
    fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    resolvers: Vec<Box<dyn LinkResolver>>,
    drivers: Vec<Arc<dyn TransferDriver>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { resolvers: vec![], drivers: vec![], cli_plugins: vec![] }
    }

    pub fn with_defaults() -> Result<Self, FetchError> {
        let mut reg = Self::new();

        reg.register_resolver(crate::plugins::glowfoto::resolver::GlowFotoResolver::new());
        reg.register_resolver(crate::plugins::direct::resolver::DirectImageResolver::new());

        reg.register_driver(Arc::new(crate::plugins::http::driver::HttpDriver::new()?));

        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        Ok(reg)
    }

    pub fn register_resolver(&mut self, resolver: impl LinkResolver + 'static) {
        self.resolvers.push(Box::new(resolver));
    }

    pub fn register_driver(&mut self, driver: Arc<dyn TransferDriver>) {
        self.drivers.push(driver);
    }

    pub fn augment_download_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_download_command(c))
    }

    pub fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_download_matches(matches, cfg)?;
        }
        Ok(())
    }

    pub fn best_resolver(&self, input: &LinkInput) -> Option<&dyn LinkResolver> {
        self.resolvers
            .iter()
            .map(|r| (r.can_handle(input), r.as_ref()))
            .max_by_key(|(c, _)| *c)
            .and_then(|(c, r)| if c == 0 { None } else { Some(r) })
    }

    /// Runs the best resolver; no resolver at all is the same as `NoMatch`.
    pub fn resolve(&self, input: &LinkInput) -> Resolution {
        match self.best_resolver(input) {
            Some(r) => {
                tracing::debug!(url = %input.url, resolver = r.name(), "resolving");
                r.resolve(input)
            }
            None => Resolution::NoMatch,
        }
    }

    pub fn driver_for(&self, direct_url: &str) -> Option<Arc<dyn TransferDriver>> {
        self.drivers.iter().find(|d| d.supports(direct_url)).cloned()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
