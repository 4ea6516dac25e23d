//! Threat Map Replay CLI
//!
//! Runs deterministic scenarios against the map core, or drives the real
//! refresh scheduler against a live backend.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use threatmap_core::{MapConfig, MapRenderer, RefreshScheduler};
use threatmap_env::{HttpFeedSource, TokioContext};
use threatmap_sim::scenarios::ScenarioId;
use threatmap_sim::{ScenarioResult, ScenarioRunner};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Threat map deterministic replay CLI
#[derive(Parser, Debug)]
#[command(name = "threatmap-sim")]
#[command(about = "Replay threat map scenarios on a virtual clock", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (quiet_night, mass_attack, malformed_feed, outage, push_burst, zoom_storm, kab_front, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Virtual (or, with --live, wall-clock) duration in seconds
    #[arg(short, long, default_value = "60")]
    duration: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export sampled frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// JSON map configuration overriding the defaults
    #[arg(short, long)]
    config: Option<String>,

    /// Backend origin; runs the refresh scheduler against it instead of a replay
    #[arg(long)]
    live: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let config = match &args.config {
        Some(path) => MapConfig::load(path).with_context(|| format!("loading config {}", path))?,
        None => MapConfig::default(),
    };

    if let Some(url) = &args.live {
        let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
        return runtime.block_on(run_live(url, config, args.duration));
    }

    if !args.json {
        info!("Threat Map Replay v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().map_err(anyhow::Error::msg)?]
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            bail!("--export only supports a single scenario, not 'all'");
        }
        let runner = ScenarioRunner::new(base_seed)
            .with_duration(args.duration)
            .with_config(config);
        let (result, export) = runner.run_with_export(scenarios[0], 1.0);
        export
            .write_to_file(export_path)
            .with_context(|| format!("writing export to {}", export_path))?;
        info!("Exported {} frames to {}", export.frames.len(), export_path);
        report(&result);
        if !result.passed {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_duration(args.duration)
            .with_config(config.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "tracks": r.final_track_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed, total);
            for r in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    r.scenario.name(),
                    r.seed,
                    r.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | fetches={} markers<={}",
            result.scenario.name(),
            result.seed,
            result.metrics.fetches_ok,
            result.metrics.max_markers
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

/// Polls a real backend for `duration` seconds, logging every published view.
async fn run_live(url: &str, config: MapConfig, duration: f64) -> Result<()> {
    let source = Arc::new(HttpFeedSource::new(url).with_context(|| format!("connecting to {}", url))?);
    let stream = source.subscribe();

    let renderer = MapRenderer::from_config(&config, Arc::clone(&source));
    let handle = RefreshScheduler::new(
        TokioContext::shared(),
        Arc::clone(&source),
        renderer,
        config.normalizer(),
        config.scheduler.clone(),
    )
    .start();
    info!(url, "live scheduler started");

    let mut rx = handle.subscribe();
    let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(duration.max(0.0));
    loop {
        match tokio::time::timeout_at(deadline, rx.changed()).await {
            Err(_) => break,
            Ok(Err(_)) => {
                warn!("scheduler stopped");
                break;
            }
            Ok(Ok(())) => {
                let state = rx.borrow_and_update().clone();
                match &state.error {
                    Some(e) => warn!(
                        failures = state.consecutive_failures,
                        retryable = e.retryable,
                        "fetch failed: {}",
                        e.message
                    ),
                    None => info!(
                        generation = state.snapshot.generation,
                        tracks = state.snapshot.tracks.len(),
                        dropped = state.snapshot.stats.dropped(),
                        markers = state.frame.markers.len(),
                        clustered = state.frame.clustered,
                        "view updated"
                    ),
                }
            }
        }
    }

    let state = handle.current();
    handle.stop();
    stream.abort();
    info!(
        fetches_ok = state.fetches_ok,
        fetches_failed = state.fetches_failed,
        "live run finished"
    );
    Ok(())
}
