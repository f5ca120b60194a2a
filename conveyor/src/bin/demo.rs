//! Drives two retyping pipelines through both lanes and prints engine metrics.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use conveyor::{
    Engine, EngineOptions, Lane, LaunchResults, LoggingOptions, PipelineBuilder, PipelineId, Stage,
    init_logging,
};

#[derive(Parser, Debug)]
#[command(name = "conveyor-demo")]
#[command(version, about = "Run sample pipelines on the conveyor engine")]
struct Args {
    /// Worker threads (defaults to hardware threads plus two).
    #[arg(short, long)]
    threads: Option<usize>,

    /// Items submitted to the sync lane each round.
    #[arg(long, default_value_t = 64)]
    sync_items: usize,

    /// Items loaded into the async lane before the first round.
    #[arg(long, default_value_t = 1_000)]
    async_items: usize,

    /// Minimum number of sync rounds.
    #[arg(short, long, default_value_t = 5)]
    rounds: usize,

    /// Engine options as a JSON file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&LoggingOptions {
        log_dir: args.log_dir.clone(),
        ..LoggingOptions::default()
    });

    let mut options = match &args.config {
        Some(path) => EngineOptions::from_file(path)
            .with_context(|| format!("loading engine options from {}", path.display()))?,
        None => EngineOptions::default(),
    };
    if let Some(threads) = args.threads {
        options.worker_threads = Some(threads);
    }

    let mut engine = Engine::new(options).context("starting engine")?;
    let numeric = register_numeric(&engine)?;
    let text = register_text(&engine)?;
    tracing::info!(engine_id = %engine.id(), threads = engine.thread_count(), "Demo started");

    engine.submit_many(Lane::Async, numeric, 0..args.async_items as i64)?;
    engine.submit_many(
        Lane::Async,
        text,
        (0..args.async_items).map(|n| (n * 3).to_string()),
    )?;

    let mut async_completed = 0;
    let mut async_failed = 0;
    let mut round = 0;
    loop {
        if round < args.rounds {
            engine.submit_many(Lane::Sync, numeric, 0..args.sync_items as i64)?;
            engine.submit_many(
                Lane::Sync,
                text,
                (0..args.sync_items).map(|n| match n % 10 {
                    9 => "nine".to_string(),
                    _ => n.to_string(),
                }),
            )?;
        }

        let sync_results = engine.launch_sync()?;
        let (sync_completed, sync_failed) = tally(&sync_results);

        let launch = engine.launch_async()?;
        let (completed, failed) = tally(&launch.results);
        async_completed += completed;
        async_failed += failed;

        tracing::info!(
            round,
            sync_completed,
            sync_failed,
            async_completed,
            async_failed,
            async_active = launch.active,
            "Round finished"
        );

        round += 1;
        if round >= args.rounds && launch.active == 0 {
            break;
        }
    }

    engine.shutdown().context("shutting down engine")?;

    let report = serde_json::json!({
        "engine": engine.metrics(),
        "pipelines": [engine.pipeline_metrics(numeric)?, engine.pipeline_metrics(text)?],
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// int -> float -> string -> float
fn register_numeric(engine: &Engine) -> anyhow::Result<PipelineId> {
    let id = PipelineBuilder::new()
        .stage(Stage::map("scale", |n: i64, _| n as f64 * 1.5))
        .stage(Stage::map("format", |x: f64, _| format!("{x:.2}")))
        .stage(Stage::try_map("parse", |s: String, _| s.parse::<f64>()))
        .register(engine)?;
    Ok(id)
}

/// string -> int -> string
fn register_text(engine: &Engine) -> anyhow::Result<PipelineId> {
    let id = PipelineBuilder::new()
        .stage(Stage::try_map("parse", |s: String, _| s.parse::<i64>()))
        .stage(Stage::map("describe", |n: i64, ctx| {
            format!("{n} squared is {} (worker {})", n * n, ctx.worker_id)
        }))
        .register(engine)?;
    Ok(id)
}

fn tally(results: &LaunchResults) -> (usize, usize) {
    results
        .iter()
        .fold((0, 0), |(completed, failed), (_, outcomes)| {
            let errors = outcomes.errors().count();
            (completed + outcomes.count() - errors, failed + errors)
        })
}
