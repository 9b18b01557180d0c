use crate::{
    aggregator::ProbeAggregator,
    config::Config,
    feedback::{FeedbackCollector, FileScreenshot, ScreenshotSource},
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "conn-check")]
#[command(about = "Connectivity probe fan-out and feedback report join")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./conn-check.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the four connectivity probes once and print the result.
    Check {
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Build a feedback report from a screenshot file plus a connectivity run.
    Feedback {
        #[command(flatten)]
        probe: ProbeArgs,
        #[arg(long)]
        screenshot: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
        /// Extra report field as KEY=VALUE; repeatable.
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        #[arg(long, default_value = "cli")]
        target: String,
        /// Write the report JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config {
        #[command(flatten)]
        probe: ProbeArgs,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ProbeArgs {
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    #[arg(long)]
    pub http_url: Option<String>,
    #[arg(long)]
    pub https_url: Option<String>,
}

impl ProbeArgs {
    pub fn apply(&self, cfg: &mut Config) -> Result<()> {
        if let Some(ms) = self.timeout_ms {
            cfg.probe.timeout_ms = ms;
        }
        if let Some(url) = &self.http_url {
            cfg.probe.http_url = url.clone();
        }
        if let Some(url) = &self.https_url {
            cfg.probe.https_url = url.clone();
        }
        cfg.validate()
    }
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

pub fn dispatch(args: Args) -> Result<()> {
    let mut cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let probe = match &args.cmd {
        Command::Check { probe } | Command::Feedback { probe, .. } | Command::Config { probe } => {
            probe
        }
    };
    probe.apply(&mut cfg)?;

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;

    match args.cmd {
        Command::Check { .. } => runtime.block_on(check(&cfg)),
        Command::Feedback {
            screenshot,
            description,
            fields,
            target,
            out,
            ..
        } => runtime.block_on(feedback(
            &cfg,
            FeedbackArgs {
                screenshot,
                description,
                fields,
                target,
                out,
            },
        )),
        Command::Config { .. } => {
            print!("{}", toml::to_string(&cfg).with_context(|| "serializing config")?);
            Ok(())
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["conn-check.toml", "conn-check.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Reports go to stdout, so logs stay on stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from("conn-check.log"));
    }
    Some(PathBuf::from(&cfg.logging.file_path))
}

async fn check(cfg: &Config) -> Result<()> {
    let aggregator = ProbeAggregator::from_config(cfg)?;
    let endpoints = aggregator.endpoints();
    info!(http = %endpoints.http, https = %endpoints.https, "checking connectivity");
    let run = aggregator.start(cfg.probe.timeout(), None);
    let report = run.wait().await;
    info!(
        elapsed_ms = report.elapsed_ms,
        healthy = report.all_connected(),
        "connectivity check done"
    );
    emit(
        cfg,
        None,
        &serde_json::json!({
            "report": report,
            "fields": report.flatten(),
        }),
    )
}

struct FeedbackArgs {
    screenshot: PathBuf,
    description: String,
    fields: Vec<(String, String)>,
    target: String,
    out: Option<PathBuf>,
}

async fn feedback(cfg: &Config, args: FeedbackArgs) -> Result<()> {
    if !args.screenshot.is_file() {
        return Err(anyhow!(
            "screenshot does not exist: {}",
            args.screenshot.display()
        ));
    }

    let collector = FeedbackCollector::from_config(cfg)?;
    let join = collector.begin(args.target.as_str(), cfg.probe.timeout(), None);
    join.set_description(&args.description);
    for (key, value) in args.fields {
        join.add_field(key, value);
    }

    // Text goes in first; the screenshot is what lets the report finalize.
    let shot = FileScreenshot::new(&args.screenshot)
        .capture(&args.target)
        .await
        .ok_or_else(|| anyhow!("reading screenshot: {}", args.screenshot.display()))?;
    join.set_screenshot(shot);

    let report = join
        .wait()
        .await
        .ok_or_else(|| anyhow!("feedback report was never delivered"))?;
    emit(cfg, args.out.as_deref(), &report.summary())
}

fn emit(cfg: &Config, out: Option<&Path>, value: &serde_json::Value) -> Result<()> {
    let rendered = if cfg.output.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                ensure_dir(parent)?;
            }
            std::fs::write(path, rendered)
                .with_context(|| format!("writing report: {}", path.display()))?;
            info!("report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
