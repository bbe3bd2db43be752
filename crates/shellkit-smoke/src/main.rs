//! ShellKit smoke harness.
//!
//! Runs one worker version against a live origin: install, activate, two
//! fetch passes over the shell and a background sync. Prints a JSON summary
//! with per-phase timings.
//!
//! The first pass runs right after install, so shell URLs are already cached
//! and only extra URLs reach the network. The second pass runs after the
//! first pass's background refreshes have settled.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults (http://localhost:8080/, cr-attendance-v5)
//! shellkit-smoke
//!
//! # Custom config, extra URLs, JSON logs
//! shellkit-smoke --config worker.json --fetch ./reports/weekly.html --log-format json
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use serde_json::json;
use shellkit_common::{init_logging, LogConfig, LogFormat, SystemClock};
use shellkit_net::{HttpNetwork, Request};
use shellkit_sw::{
    ClientRegistry, ClientType, MemoryCacheStorage, Registration, ShellWorker, WorkerConfig,
    WorkerDeps,
};
use tracing::{info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "shellkit-smoke")]
#[command(about = "Install, activate and exercise the offline worker against a live origin")]
struct Cli {
    /// Worker configuration (JSON); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured scope URL
    #[arg(long)]
    scope: Option<String>,

    /// Extra URL to fetch after activation, relative to the scope (repeatable)
    #[arg(long = "fetch", value_name = "URL")]
    fetch: Vec<String>,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: String,

    /// Log filter directive, overrides RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,

    /// Write the summary to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Durations per phase.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, phase: &'static str, duration: Duration) {
        self.timings.entry(phase).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (phase, durations) in &self.timings {
            let ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let total: f64 = ms.iter().sum();
            let max = ms.iter().copied().fold(0.0, f64::max);
            summary.insert(
                phase.to_string(),
                json!({
                    "count": ms.len(),
                    "total_ms": round2(total),
                    "avg_ms": round2(total / ms.len().max(1) as f64),
                    "max_ms": round2(max),
                }),
            );
        }
        serde_json::Value::Object(summary)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Fetch every target twice through the active worker, settling each
/// background refresh before the next request.
async fn fetch_passes(
    registration: &Registration,
    targets: &[Url],
    perf: &mut PerfTiming,
) -> Vec<serde_json::Value> {
    let mut fetches = Vec::new();
    for pass in ["after-install", "after-refresh"] {
        for target in targets {
            let start = Instant::now();
            let outcome = registration.handle_fetch(Request::get(target.clone())).await;
            perf.record("fetch", start.elapsed());

            fetches.push(json!({
                "pass": pass,
                "url": target.as_str(),
                "source": outcome.source().map(|s| format!("{s:?}")),
                "status": outcome.response().map(|r| r.status.as_u16()),
            }));
            let failed = outcome.wait_until.settle().await;
            if failed > 0 {
                warn!(url = %target, failed, "Background refresh did not finish");
            }
        }
    }
    fetches
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = LogFormat::from_name(&cli.log_format)
        .ok_or_else(|| anyhow!("unknown log format: {}", cli.log_format))?;
    let mut log_config = LogConfig::default().with_format(format);
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter);
    }
    init_logging(log_config);

    let mut config = match &cli.config {
        Some(path) => WorkerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(scope) = cli.scope {
        config.scope = scope;
    }
    config.validate()?;

    let extra: Vec<Url> = cli
        .fetch
        .iter()
        .map(|raw| config.resolve(raw))
        .collect::<Result<_, _>>()?;
    let scope = config.scope_url()?;
    let sync_tag = config.sync_tag.clone();

    let clients = Arc::new(ClientRegistry::new());
    let deps = WorkerDeps {
        store: Arc::new(MemoryCacheStorage::new()),
        network: Arc::new(HttpNetwork::new(config.network.clone())?),
        clock: Arc::new(SystemClock),
        clients: clients.clone(),
    };
    let worker = ShellWorker::new(config, deps)?;
    let mut targets = worker.config().shell_urls()?;
    targets.extend(extra);

    let (page, mut inbox) = clients.open(scope.clone(), ClientType::Window).await;
    let (mut registration, _events) = Registration::new(scope.clone(), clients.clone());
    let mut perf = PerfTiming::default();

    info!(scope = %scope, version = %worker.version(), "Starting smoke run");

    let start = Instant::now();
    let installed = registration.install(worker).await?;
    perf.record("install", start.elapsed());
    if installed.cached.is_empty() {
        bail!("no shell asset could be cached from {scope}");
    }
    let active = registration
        .active()
        .ok_or_else(|| anyhow!("worker did not activate"))?;
    let controlled = clients
        .get(&page)
        .await
        .is_some_and(|c| c.is_controlled_by(active.id));

    let fetches = fetch_passes(&registration, &targets, &mut perf).await;

    let start = Instant::now();
    let notified = registration.dispatch_sync(&sync_tag).await;
    perf.record("sync", start.elapsed());
    let received = inbox.try_recv().is_ok();

    let summary = json!({
        "cache": installed.cache_name,
        "install": {
            "cached": installed.cached.iter().map(Url::as_str).collect::<Vec<_>>(),
            "failed": installed
                .failed
                .iter()
                .map(|(url, reason)| json!({ "url": url.as_str(), "reason": reason }))
                .collect::<Vec<_>>(),
        },
        "page_controlled": controlled,
        "fetches": fetches,
        "sync": { "tag": sync_tag, "notified": notified, "received": received },
        "timings": perf.summary(),
    });

    let rendered = serde_json::to_string_pretty(&summary)?;
    match cli.output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Summary written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
