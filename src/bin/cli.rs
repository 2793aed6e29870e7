//! duplisweep CLI: on-demand registry inspection and scans for local use
//! and CI integration, alongside the always-on `duplisweep-server` daemon.
//!
//! Shape follows the daemon's own CLI conventions: `clap` derive, a
//! `#[command(subcommand)]` enum, a `--format` flag for machine-readable
//! output, `tracing_subscriber` initialized the same way the binaries do.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use duplisweep::config::ScanFrequency;
use duplisweep::prelude::*;
use duplisweep::queue::JobState;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "duplisweep")]
#[command(about = "Cross-repository duplicate-detection CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the repository registry document.
    #[arg(long, global = true, default_value = "repositories.json")]
    config: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Commands {
    /// Validate the registry document without running anything.
    Validate,

    /// List repositories, optionally filtered.
    List {
        #[arg(long, value_enum)]
        priority: Option<PriorityArg>,
        #[arg(long, value_enum)]
        frequency: Option<FrequencyArg>,
        #[arg(long)]
        tag: Option<String>,
    },

    /// Run a one-off scan of a single repository (spec §4.12).
    Scan {
        /// Repository name as it appears in the registry.
        name: String,
    },

    /// Run a one-off inter-project scan of a repository group (spec §4.13).
    ScanGroup {
        /// Group name as it appears in the registry.
        name: String,
    },

    /// Run tonight's selection once, synchronously, and report results
    /// (the `runOnStartup` path of spec §4.1, invoked by hand).
    RunOnce,

    /// Scan-result cache operations (spec §4.7).
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum CacheAction {
    /// Drop every cached result for a repository path.
    Invalidate { repository_path: String },
    /// Print hit/miss/set/invalidation counters.
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Critical,
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Critical => Priority::Critical,
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FrequencyArg {
    Daily,
    Weekly,
    Monthly,
    OnDemand,
}

impl From<FrequencyArg> for ScanFrequency {
    fn from(value: FrequencyArg) -> Self {
        match value {
            FrequencyArg::Daily => ScanFrequency::Daily,
            FrequencyArg::Weekly => ScanFrequency::Weekly,
            FrequencyArg::Monthly => ScanFrequency::Monthly,
            FrequencyArg::OnDemand => ScanFrequency::OnDemand,
        }
    }
}

fn print_result(result: &ScanResult, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(result).expect("ScanResult always serializes")
            );
        }
        OutputFormat::Text => {
            println!("{}", result.executive_summary.bold());
            println!(
                "  blocks={} groups={} exact={} suggestions={} quick_wins={} duplication={:.1}% from_cache={}",
                result.metrics.total_blocks,
                result.metrics.total_groups,
                result.metrics.exact_duplicates,
                result.metrics.total_suggestions,
                result.metrics.quick_wins,
                result.metrics.duplication_percent,
                result.from_cache,
            );
        }
    }
}

async fn build_pipeline(
    registry: SharedRegistry,
) -> anyhow::Result<(Arc<ScanOrchestrator>, Arc<InterProjectCoordinator>, EventBus)> {
    let events = EventBus::new();
    let cache_config = registry.cache_config().await;
    let cache = ScanCache::new(cache_config, CacheBackendConfig::from_env())?;

    let gateway_config = PatternGatewayConfig::from_env();
    let extractor_config = BlockExtractorConfig::default();
    let similarity_config = SimilarityConfig::from_env();
    let suggestion_config = SuggestionConfig::default();

    let orchestrator = Arc::new(ScanOrchestrator::new(
        registry.clone(),
        cache,
        events.clone(),
        gateway_config,
        extractor_config,
        similarity_config.clone(),
        suggestion_config,
    ));
    let inter = Arc::new(InterProjectCoordinator::new(
        registry.clone(),
        events.clone(),
        orchestrator.clone(),
        similarity_config,
        suggestion_config,
    ));

    Ok((orchestrator, inter, events))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,duplisweep=info".to_string()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => match ConfigRegistry::load(cli.config.clone()).await {
            Ok(registry) => {
                let repos = registry.all_repositories().await.len();
                let groups = registry.all_groups().await.len();
                println!(
                    "{} {} ({} repositories, {} groups)",
                    "valid:".green().bold(),
                    cli.config.display(),
                    repos,
                    groups
                );
            }
            Err(e) => {
                eprintln!("{} {}", "invalid:".red().bold(), e);
                std::process::exit(1);
            }
        },

        Commands::List { priority, frequency, tag } => {
            let registry = ConfigRegistry::load(cli.config.clone()).await?;
            let mut repos = registry.all_repositories().await;
            if let Some(p) = priority {
                let p: Priority = p.into();
                repos.retain(|r| r.priority == p);
            }
            if let Some(f) = frequency {
                let f: ScanFrequency = f.into();
                repos.retain(|r| r.scan_frequency == f);
            }
            if let Some(t) = &tag {
                repos.retain(|r| r.has_tag(t));
            }

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&repos)?),
                OutputFormat::Text => {
                    for repo in &repos {
                        println!(
                            "{:<24} {:<10?} {:<10?} enabled={} last_scanned={}",
                            repo.name,
                            repo.priority,
                            repo.scan_frequency,
                            repo.enabled,
                            repo.last_scanned_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()),
                        );
                    }
                    println!("{} repositories", repos.len());
                }
            }
        }

        Commands::Scan { name } => {
            let registry: SharedRegistry = Arc::new(ConfigRegistry::load(cli.config.clone()).await?);
            let (orchestrator, _inter, _events) = build_pipeline(registry.clone()).await?;
            let repository = registry.get_repository(&name).await?;
            let (_tx, rx) = watch::channel(false);
            let result = orchestrator.scan_repository(&repository, rx).await?;
            print_result(&result, cli.format);
        }

        Commands::ScanGroup { name } => {
            let registry: SharedRegistry = Arc::new(ConfigRegistry::load(cli.config.clone()).await?);
            let (_orchestrator, inter, _events) = build_pipeline(registry.clone()).await?;
            let group = registry.get_group(&name).await?;
            let (_tx, rx) = watch::channel(false);
            let result = inter.scan_group(&group, rx).await?;
            print_result(&result, cli.format);
        }

        Commands::RunOnce => {
            let registry: SharedRegistry = Arc::new(ConfigRegistry::load(cli.config.clone()).await?);
            let (orchestrator, inter, events) = build_pipeline(registry.clone()).await?;
            let executor: Arc<dyn JobExecutor> = Arc::new(PipelineExecutor::new(orchestrator, inter));

            let scan_config = registry.scan_config().await;
            let pool_config = WorkerPoolConfig {
                max_concurrent_scans: scan_config.max_concurrent_scans,
                scan_timeout: Duration::from_secs(scan_config.scan_timeout),
                retry_delay_ms: scan_config.retry_delay_ms,
                history_dir: std::env::var("DUPLISWEEP_HISTORY_DIR")
                    .unwrap_or_else(|_| "scan-history".to_string())
                    .into(),
            };
            let pool = WorkerPool::new(pool_config, events, executor);

            let (mut candidates, groups) = select_nightly(&registry, chrono::Utc::now()).await;
            candidates.truncate(scan_config.max_repositories_per_night);
            println!(
                "selected {} repositories and {} groups for tonight",
                candidates.len(),
                groups.len()
            );

            let mut ids = Vec::new();
            for candidate in &candidates {
                ids.push(
                    pool.enqueue(
                        JobKind::Intra,
                        &candidate.repository.name,
                        candidate.repository.priority,
                        scan_config.retry_attempts,
                    )
                    .await,
                );
            }
            for group in &groups {
                ids.push(
                    pool.enqueue(JobKind::Inter, &group.group.name, Priority::Medium, scan_config.retry_attempts)
                        .await,
                );
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let run_handle = tokio::spawn(pool.clone().run(shutdown_rx));

            loop {
                let mut all_done = true;
                for id in &ids {
                    match pool.job(id).await {
                        Some(job) => {
                            if !matches!(job.state, JobState::Completed | JobState::Failed | JobState::Canceled) {
                                all_done = false;
                                break;
                            }
                        }
                        None => all_done = false,
                    }
                }
                if all_done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }

            let _ = shutdown_tx.send(true);
            let _ = run_handle.await;

            let mut completed = 0;
            let mut failed = 0;
            for id in &ids {
                match pool.job(id).await.map(|j| j.state) {
                    Some(JobState::Completed) => completed += 1,
                    Some(JobState::Failed) => failed += 1,
                    _ => {}
                }
            }
            println!("{completed} completed, {failed} failed");
        }

        Commands::Cache { action } => {
            let registry = ConfigRegistry::load(cli.config.clone()).await?;
            let cache_config = registry.cache_config().await;
            let cache = ScanCache::new(cache_config, CacheBackendConfig::from_env())?;
            match action {
                CacheAction::Invalidate { repository_path } => {
                    cache.invalidate(&repository_path).await;
                    println!("invalidated cache entries for {repository_path}");
                }
                CacheAction::Stats => {
                    let stats = cache.stats();
                    match cli.format {
                        OutputFormat::Json => println!(
                            "{}",
                            serde_json::to_string_pretty(&serde_json::json!({
                                "hits": stats.hits,
                                "misses": stats.misses,
                                "sets": stats.sets,
                                "invalidations": stats.invalidations,
                            }))?
                        ),
                        OutputFormat::Text => println!(
                            "hits={} misses={} sets={} invalidations={}",
                            stats.hits, stats.misses, stats.sets, stats.invalidations
                        ),
                    }
                }
            }
        }
    }

    Ok(())
}
