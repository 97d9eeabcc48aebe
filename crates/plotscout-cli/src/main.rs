use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plotscout_core::{GeoScorer, MarketSnapshot, ScoreTable};
use plotscout_runtime::{
    Pipeline, PipelineBuilder, ProviderRegistry, ProviderRouter, ReportSynthesizer, ResponseCache,
    RunStatus, RunStore, RuntimeConfig,
};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "plotscout")]
#[command(author, version, about = "Rank real-estate sub-markets by projected return", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (overridden by PLOTSCOUT_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score and rank a snapshot without calling any model
    Score {
        /// Market snapshot (YAML or JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Runtime config; only the scoring section is used
        #[arg(long, env = "PLOTSCOUT_CONFIG")]
        config: Option<PathBuf>,

        /// Print the ranking as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the full analysis pipeline
    Run {
        #[arg(long)]
        snapshot: PathBuf,

        #[arg(long, env = "PLOTSCOUT_CONFIG")]
        config: PathBuf,

        /// Directory holding the response cache and the last run
        #[arg(long, default_value = ".plotscout")]
        state_dir: PathBuf,

        /// Ignore the saved run and cache
        #[arg(long)]
        fresh: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List adapters per capability and check they respond
    Providers {
        #[arg(long, env = "PLOTSCOUT_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "plotscout_runtime=debug,plotscout_core=debug"
    } else {
        "plotscout_runtime=info,plotscout_core=info"
    };
    let filter =
        EnvFilter::try_from_env("PLOTSCOUT_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Score {
            snapshot,
            config,
            json,
        } => cmd_score(&snapshot, config.as_deref(), json),
        Commands::Run {
            snapshot,
            config,
            state_dir,
            fresh,
            json,
        } => cmd_run(&snapshot, &config, &state_dir, fresh, json).await,
        Commands::Providers { config } => cmd_providers(&config).await,
    }
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    RuntimeConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

fn load_snapshot(path: &Path) -> Result<MarketSnapshot> {
    MarketSnapshot::from_file(path).with_context(|| format!("loading snapshot {}", path.display()))
}

fn cmd_score(snapshot: &Path, config: Option<&Path>, json: bool) -> Result<ExitCode> {
    let config = match config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };
    let snapshot = load_snapshot(snapshot)?;

    let scorer = GeoScorer::new(config.scoring, config.concurrency.pool_size)
        .context("invalid scoring configuration")?;
    let table = scorer.score(&snapshot);

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        print_ranking(&table);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_ranking(table: &ScoreTable) {
    println!(
        "{:>4}  {:<24} {:<12} {:<16} {:>6}  {:>7}  {:<9} {}",
        "rank", "area", "city", "locality", "score", "growth", "tier", "confidence"
    );
    for row in table.ranked() {
        let score = &row.score;
        let confidence = if score.confidence.is_low_data() {
            "low data"
        } else {
            "full"
        };
        println!(
            "{:>4}  {:<24} {:<12} {:<16} {:>6.3}  {:>6.1}%  {:<9} {}",
            row.rank,
            row.area_id,
            row.city,
            row.locality,
            score.composite,
            score.components.growth_rate * 100.0,
            format!("{:?}", score.growth_tier).to_lowercase(),
            confidence,
        );
    }
}

async fn cmd_run(
    snapshot_path: &Path,
    config_path: &Path,
    state_dir: &Path,
    fresh: bool,
    json: bool,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let snapshot = load_snapshot(snapshot_path)?;

    let store = RunStore::new(state_dir);
    store
        .init()
        .await
        .with_context(|| format!("preparing state dir {}", state_dir.display()))?;

    let cache = Arc::new(ResponseCache::new(config.cache.max_entries, config.cache.ttl));
    let prior = if fresh {
        None
    } else {
        let restored = store.load_cache(&cache).await.context("loading response cache")?;
        let prior = store.load_run().await.context("loading previous run")?;
        tracing::info!(cached = restored, resume = prior.is_some(), "State loaded");
        prior
    };

    let router = ProviderRouter::from_config(&config, &ProviderRegistry::with_defaults(), cache)
        .context("configuring providers")?;
    let pipeline: Pipeline = PipelineBuilder::from_config(&config)
        .router(Arc::new(router))
        .build()
        .context("building pipeline")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight calls");
            on_signal.cancel();
        }
    });

    let run = pipeline.run(&snapshot, prior.as_ref(), &cancel).await;

    store.save_run(&run).await.context("saving run")?;
    store
        .save_cache(pipeline.router().cache())
        .await
        .context("saving response cache")?;

    let report = ReportSynthesizer::new().synthesize(&run);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
        println!(
            "\n{} provider calls, {} cached, {} tokens, ~${:.4}",
            run.usage.llm_calls,
            run.usage.cached_responses,
            run.usage.total_tokens,
            run.usage.estimated_cost
        );
    }

    Ok(match run.status {
        RunStatus::Complete => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(2),
        RunStatus::Pending | RunStatus::Failed => ExitCode::FAILURE,
    })
}

async fn cmd_providers(config_path: &Path) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let registry = ProviderRegistry::with_defaults();

    let available: Vec<String> = registry
        .available_kinds()
        .iter()
        .map(|k| k.to_string())
        .collect();
    println!("Adapter kinds in this build: {}", available.join(", "));

    let router = ProviderRouter::from_config(&config, &registry, Arc::new(ResponseCache::default()))
        .context("configuring providers")?;

    let mut all_healthy = true;
    for capability in router.capabilities() {
        let Some(route) = router.route(capability) else {
            continue;
        };
        let policy = route.policy();
        println!(
            "\n{} (timeout {:?}, {} attempts per adapter)",
            capability, policy.timeout, policy.retry_budget
        );
        for (position, provider) in route.providers().iter().enumerate() {
            let healthy = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, provider.health_check())
                .await
                .unwrap_or(false);
            all_healthy &= healthy;
            println!(
                "  {}. {:<16} {:<28} {}",
                position + 1,
                provider.name(),
                provider.model(),
                if healthy { "ok" } else { "unreachable" }
            );
        }
    }

    Ok(if all_healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
