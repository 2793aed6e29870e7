//! duplisweep daemon: loads the repository registry, starts the cron
//! scheduler, and runs the worker pool until a shutdown signal arrives.
//!
//! Shape follows the teacher's `github-sync-daemon.rs`: load config, wire
//! dependencies, then `tokio::select!` the main run future against a
//! `ctrl_c` future, logging the same way at each stage.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use duplisweep::prelude::*;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info,duplisweep=debug".to_string()))
        .init();

    tracing::info!("starting duplisweep daemon");

    let registry_path = env::var("DUPLISWEEP_REGISTRY").unwrap_or_else(|_| "repositories.json".to_string());
    let registry: SharedRegistry = Arc::new(ConfigRegistry::load(PathBuf::from(&registry_path)).await?);
    tracing::info!(path = %registry_path, "repository registry loaded");

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
    let executor: Arc<dyn JobExecutor> = Arc::new(PipelineExecutor::new(orchestrator, inter));

    let scan_config = registry.scan_config().await;
    let pool_config = WorkerPoolConfig {
        max_concurrent_scans: scan_config.max_concurrent_scans,
        scan_timeout: Duration::from_secs(scan_config.scan_timeout),
        retry_delay_ms: scan_config.retry_delay_ms,
        history_dir: PathBuf::from(env::var("DUPLISWEEP_HISTORY_DIR").unwrap_or_else(|_| "scan-history".to_string())),
    };
    let pool = WorkerPool::new(pool_config, events.clone(), executor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(CronSchedule::parse(&scan_config.schedule)?, scan_config.run_on_startup);
    let max_per_night = scan_config.max_repositories_per_night;
    let retry_attempts = scan_config.retry_attempts;

    let scheduler_registry = registry.clone();
    let scheduler_pool = pool.clone();
    let scheduler_shutdown = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.changed().await;
        }
    };
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run(
                |tick| {
                    let registry = scheduler_registry.clone();
                    let pool = scheduler_pool.clone();
                    async move {
                        let (mut candidates, groups) = select_nightly(&registry, tick.at).await;
                        candidates.truncate(max_per_night);
                        for candidate in candidates {
                            pool.enqueue(
                                JobKind::Intra,
                                &candidate.repository.name,
                                candidate.repository.priority,
                                retry_attempts,
                            )
                            .await;
                        }
                        for group in groups {
                            pool.enqueue(JobKind::Inter, &group.group.name, Priority::Medium, retry_attempts).await;
                        }
                    }
                },
                scheduler_shutdown,
            )
            .await;
    });

    let pool_run = pool.clone().run(shutdown_rx);

    let shutdown = async {
        signal::ctrl_c().await.expect("failed to install CTRL+C signal handler");
        tracing::info!("shutdown signal received, draining in-flight jobs");
        let _ = shutdown_tx.send(true);
    };

    tokio::select! {
        _ = pool_run => {
            tracing::info!("worker pool run loop exited");
        }
        _ = shutdown => {
            tracing::info!("daemon stopped gracefully");
        }
    }

    scheduler_task.abort();
    Ok(())
}
