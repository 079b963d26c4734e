use clap::{Arg, ArgAction, Command};
use image_ripper::engine::events::EngineEvent;
use image_ripper::engine::model::{LinkInput, Outcome};
use image_ripper::engine::sink::{LastCompletedSink, LatestPath};
use image_ripper::plugins::registry::{DownloadCliConfig, PluginRegistry};
use image_ripper::Orchestrator;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn build_cli(registry: &PluginRegistry) -> Command {
    let download = Command::new("download")
        .about("Resolve hosting-page links and download the images behind them")
        .arg(
            Arg::new("links")
                .help("Hosting-page links")
                .action(ArgAction::Append)
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new("out_dir")
                .long("out-dir")
                .help("Save directory (created on demand)")
                .default_value("./rips")
                .num_args(1),
        )
        .arg(
            Arg::new("post_title")
                .long("post-title")
                .help("Post title; direct image links are then named <title>_<n>.<ext>")
                .num_args(1),
        )
        .arg(
            Arg::new("referer")
                .long("referer")
                .help("Thumbnail URL sent as Referer instead of the link itself")
                .num_args(1),
        );

    let download = registry.augment_download_command(download);

    Command::new("image-ripper")
        .about("Fetches images behind image-host links - plugin based")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .help("Debug logging (RUST_LOG overrides)")
                .action(ArgAction::SetTrue),
        )
        .subcommand(download)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "image_ripper=debug" } else { "image_ripper=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Shows the most recent finished file under the per-link spinners.
struct ProgressSink {
    bar: ProgressBar,
    latest: LatestPath,
}

impl LastCompletedSink for ProgressSink {
    fn publish(&self, path: &Path) {
        self.latest.publish(path);
        self.bar.set_message(format!("last: {}", path.display()));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = PluginRegistry::with_defaults()?;
    let app = build_cli(&registry);
    let matches = app.get_matches();
    init_tracing(matches.get_flag("verbose"));

    let Some(("download", m)) = matches.subcommand() else {
        return Ok(());
    };

    let out_dir: PathBuf = m
        .get_one::<String>("out_dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./rips"));

    let mut cfg = DownloadCliConfig::default();
    registry.apply_download_matches(m, &mut cfg)?;

    let post_title = m.get_one::<String>("post_title").cloned();
    let referer = m.get_one::<String>("referer").cloned();
    let inputs: Vec<LinkInput> = m
        .get_many::<String>("links")
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(i, raw)| {
            let mut input = LinkInput::new(raw.clone()).with_index(i as u32 + 1);
            input.post_title = post_title.clone();
            input.referer = referer.clone();
            input.headers = cfg.headers.clone();
            input
        })
        .collect();
    let urls: Vec<String> = inputs.iter().map(|i| i.url.clone()).collect();

    let mp = MultiProgress::new();
    let sty_pb = ProgressStyle::with_template("{spinner:.green} {prefix} {wide_msg}")?.tick_chars("|/-\\ ");
    let last_bar = mp.add(ProgressBar::new_spinner());
    last_bar.set_style(ProgressStyle::with_template("{wide_msg}")?);

    let sink = Arc::new(ProgressSink { bar: last_bar.clone(), latest: LatestPath::new() });
    let orchestrator = Orchestrator::new(registry, cfg.fetch_ctx.clone(), sink.clone());

    let mut rx = orchestrator.subscribe();
    let ui_mp = mp.clone();
    let ui_task = tokio::spawn(async move {
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();
        while let Ok(evt) = rx.recv().await {
            match evt {
                EngineEvent::Started { url, direct_url, target_path } => {
                    let pb = ui_mp.insert_from_back(1, ProgressBar::new_spinner());
                    pb.set_style(sty_pb.clone());
                    pb.set_prefix(format!("[{}]", target_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()));
                    pb.enable_steady_tick(std::time::Duration::from_millis(120));
                    pb.set_message(format!("fetching {}", direct_url));
                    bars.insert(url, pb);
                }
                EngineEvent::StatusChanged { url, status } => {
                    if let Some(pb) = bars.remove(&url) {
                        pb.finish_with_message(format!("{:?}", status).to_lowercase());
                    }
                }
                EngineEvent::Cancelled { url } => {
                    if let Some(pb) = bars.remove(&url) {
                        pb.finish_with_message("cancelled");
                    }
                }
                EngineEvent::Abandoned { url, reason } => {
                    let _ = ui_mp.println(format!("[SKIP] {}: {}", url, reason));
                }
                EngineEvent::Error { scope, message } => {
                    let _ = ui_mp.println(format!("[ERR] {}: {}", scope, message));
                }
                EngineEvent::Info { scope, message } => {
                    let _ = ui_mp.println(format!("[INFO] {}: {}", scope, message));
                }
            }
        }
    });

    let canceller = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling in-flight downloads");
            for url in &urls {
                canceller.cancel(url);
            }
        }
    });

    let outcomes = orchestrator.download_batch(inputs.clone(), &out_dir).await?;
    ui_task.abort();
    last_bar.finish();

    println!();
    println!("Summary:");
    for (input, outcome) in inputs.iter().zip(&outcomes) {
        match outcome {
            Outcome::Downloaded(path) => println!("- ok        {} -> {}", input.url, path.display()),
            Outcome::Failed(reason) => println!("- failed    {} ({})", input.url, reason),
            Outcome::Cancelled => println!("- cancelled {}", input.url),
            Outcome::NoMatch => println!("- skipped   {} (unsupported link)", input.url),
            Outcome::AlreadyTracked => println!("- duplicate {}", input.url),
        }
    }
    if let Some(last) = sink.latest.get() {
        println!("Last completed: {}", last.display());
    }

    Ok(())
}
