use crate::engine::model::FetchMethod;
use crate::plugins::registry::{CliPlugin, DownloadCliConfig, StaticCookie, DEFAULT_USER_AGENT};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::sync::Arc;
use std::time::Duration;

pub struct HttpCliPlugin;

impl HttpCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpCliPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CliPlugin for HttpCliPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn augment_download_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("http_header")
                .long("header")
                .help_heading("HTTP")
                .help("Extra HTTP header (repeatable), e.g. --header 'Accept: image/*'")
                .action(ArgAction::Append)
                .num_args(1),
        )
        .arg(
            Arg::new("http_user_agent")
                .long("user-agent")
                .help_heading("HTTP")
                .help("HTTP User-Agent")
                .default_value(DEFAULT_USER_AGENT)
                .num_args(1),
        )
        .arg(
            Arg::new("http_timeout_secs")
                .long("timeout-secs")
                .help_heading("HTTP")
                .help("Per-request timeout in seconds")
                .default_value("20")
                .num_args(1),
        )
        .arg(
            Arg::new("http_method")
                .long("method")
                .help_heading("HTTP")
                .help("Request method for image fetches (GET or POST)")
                .default_value("GET")
                .num_args(1),
        )
        .arg(
            Arg::new("http_cookie")
                .long("cookie")
                .help_heading("HTTP")
                .help("Cookie header sent with every fetch, e.g. --cookie 'bbsessionhash=...'")
                .num_args(1),
        )
    }

    fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()> {
        if let Some(ua) = matches.get_one::<String>("http_user_agent") {
            cfg.fetch_ctx.user_agent = ua.clone();
        }
        if let Some(s) = matches.get_one::<String>("http_timeout_secs") {
            cfg.fetch_ctx.timeout = Duration::from_secs(s.parse()?);
        }
        if let Some(s) = matches.get_one::<String>("http_method") {
            cfg.fetch_ctx.method = FetchMethod::from_str(s)
                .ok_or_else(|| anyhow::anyhow!("unsupported method: {}", s))?;
        }
        if let Some(c) = matches.get_one::<String>("http_cookie") {
            cfg.fetch_ctx.cookies = Some(Arc::new(StaticCookie(c.clone())));
        }

        if let Some(values) = matches.get_many::<String>("http_header") {
            for h in values {
                let (k, v) = h
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("invalid header format: {}", h))?;
                cfg.headers.insert(k.trim().to_string(), v.trim().to_string());
            }
        }

        Ok(())
    }
}
