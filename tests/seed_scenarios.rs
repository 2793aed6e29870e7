//! End-to-end seed scenarios exercising the full registry -> orchestrator
//! -> cache path against a real (temporary) git repository. The five
//! grouping scenarios already have focused unit coverage next to the
//! Similarity Engine itself; this file covers the scenario unit tests
//! can't reach on their own: cache-hit short-circuiting across real git
//! commits, and the job-lifecycle/boundary behaviors that only show up
//! once the Config Registry, Scan Cache, and Orchestrator run together.

use std::path::Path;
use std::sync::Arc;

use duplisweep::prelude::*;
use duplisweep::queue::JobState;
use tokio::process::Command as TokioCommand;
use tokio::sync::watch;

async fn git(dir: &Path, args: &[&str]) {
    let status = TokioCommand::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .expect("git must be on PATH for this test");
    assert!(status.status.success(), "git {:?} failed: {:?}", args, status);
}

async fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]).await;
    git(dir, &["config", "user.email", "seed@example.com"]).await;
    git(dir, &["config", "user.name", "Seed"]).await;
    std::fs::write(dir.join("a.js"), "console.log('hello');\n").unwrap();
    git(dir, &["add", "."]).await;
    git(dir, &["commit", "-q", "-m", "init"]).await;
}

fn write_registry(registry_path: &Path, repo_path: &Path) {
    let doc = serde_json::json!({
        "scanConfig": {
            "enabled": true,
            "schedule": "0 2 * * *",
            "maxRepositoriesPerNight": 5,
            "maxConcurrentScans": 2,
            "scanTimeout": 60,
            "retryAttempts": 1,
            "retryDelayMs": 50,
            "runOnStartup": false
        },
        "cacheConfig": {
            "enabled": true,
            "ttlSeconds": 86400,
            "invalidateOnChange": true,
            "trackGitCommits": true,
            "trackUncommittedChanges": true
        },
        "repositories": [{
            "name": "seed-repo",
            "path": repo_path,
            "priority": "high",
            "scanFrequency": "daily",
            "enabled": true,
            "tags": []
        }],
        "repositoryGroups": []
    });
    std::fs::write(registry_path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
}

/// A matcher binary that is guaranteed absent, so the Pattern Gateway
/// degrades to an empty match set (spec §4.8) rather than requiring the
/// external AST matcher in this test environment.
fn gateway_config() -> PatternGatewayConfig {
    PatternGatewayConfig {
        matcher_bin: "definitely-not-installed-ast-matcher".into(),
        rules_dir: "rules".into(),
        timeout: std::time::Duration::from_secs(5),
        max_output_bytes: 1024 * 1024,
    }
}

async fn build_orchestrator(registry: SharedRegistry) -> (Arc<ScanOrchestrator>, EventBus) {
    let events = EventBus::new();
    let cache_config = registry.cache_config().await;
    let cache = ScanCache::new(cache_config, CacheBackendConfig::default()).unwrap();
    let orchestrator = Arc::new(ScanOrchestrator::new(
        registry,
        cache,
        events.clone(),
        gateway_config(),
        BlockExtractorConfig::default(),
        SimilarityConfig::default(),
        SuggestionConfig::default(),
    ));
    (orchestrator, events)
}

/// Scenario 6 (spec §8): a second scan at the same commit hits the cache
/// and is flagged `fromCache=true`; a scan after a new commit misses.
#[tokio::test]
async fn cache_hit_short_circuits_until_the_commit_changes() {
    let repo_dir = tempfile::TempDir::new().unwrap();
    init_repo(repo_dir.path()).await;

    let registry_dir = tempfile::TempDir::new().unwrap();
    let registry_path = registry_dir.path().join("repositories.json");
    write_registry(&registry_path, repo_dir.path());

    let registry: SharedRegistry = Arc::new(ConfigRegistry::load(registry_path).await.unwrap());
    let (orchestrator, _events) = build_orchestrator(registry.clone()).await;
    let repository = registry.get_repository("seed-repo").await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let first = orchestrator.scan_repository(&repository, rx.clone()).await.unwrap();
    assert!(!first.from_cache);

    let second = orchestrator.scan_repository(&repository, rx.clone()).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.metrics.total_groups, first.metrics.total_groups);

    std::fs::write(repo_dir.path().join("b.js"), "console.log('world');\n").unwrap();
    git(repo_dir.path(), &["add", "."]).await;
    git(repo_dir.path(), &["commit", "-q", "-m", "second"]).await;

    let third = orchestrator.scan_repository(&repository, rx).await.unwrap();
    assert!(!third.from_cache);
}

/// Cache policy (spec §4.7 "Optional policy: if trackUncommittedChanges
/// and worktree is dirty, cache is bypassed"): a dirty worktree at the
/// same commit neither serves nor writes a cache entry, so a subsequent
/// scan after the worktree is cleaned still misses and recomputes.
#[tokio::test]
async fn dirty_worktree_bypasses_the_cache() {
    let repo_dir = tempfile::TempDir::new().unwrap();
    init_repo(repo_dir.path()).await;

    let registry_dir = tempfile::TempDir::new().unwrap();
    let registry_path = registry_dir.path().join("repositories.json");
    write_registry(&registry_path, repo_dir.path());

    let registry: SharedRegistry = Arc::new(ConfigRegistry::load(registry_path).await.unwrap());
    let (orchestrator, _events) = build_orchestrator(registry.clone()).await;
    let repository = registry.get_repository("seed-repo").await.unwrap();

    // Dirty the worktree without committing: same commit hash, uncommitted
    // changes present.
    std::fs::write(repo_dir.path().join("a.js"), "console.log('changed');\n").unwrap();

    let (_tx, rx) = watch::channel(false);
    let first = orchestrator.scan_repository(&repository, rx.clone()).await.unwrap();
    assert!(!first.from_cache);

    let second = orchestrator.scan_repository(&repository, rx).await.unwrap();
    assert!(!second.from_cache, "a dirty worktree must never serve a cache hit");
}

/// Boundary behavior (spec §8): an empty repository (no matcher, no
/// extracted blocks) still completes the scan with zero groups rather
/// than failing.
#[tokio::test]
async fn empty_repository_scan_succeeds_with_zero_groups() {
    let repo_dir = tempfile::TempDir::new().unwrap();
    init_repo(repo_dir.path()).await;

    let registry_dir = tempfile::TempDir::new().unwrap();
    let registry_path = registry_dir.path().join("repositories.json");
    write_registry(&registry_path, repo_dir.path());

    let registry: SharedRegistry = Arc::new(ConfigRegistry::load(registry_path).await.unwrap());
    let (orchestrator, _events) = build_orchestrator(registry.clone()).await;
    let repository = registry.get_repository("seed-repo").await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let result = orchestrator.scan_repository(&repository, rx).await.unwrap();
    assert_eq!(result.metrics.total_blocks, 0);
    assert_eq!(result.metrics.total_groups, 0);
    assert_eq!(result.executive_summary, "No duplicate patterns found.");
}

/// A completed scan updates the registry's `lastScannedAt` and appends a
/// scan-history entry (spec §4.12 step 9, §4.2).
#[tokio::test]
async fn completed_scan_updates_registry_bookkeeping() {
    let repo_dir = tempfile::TempDir::new().unwrap();
    init_repo(repo_dir.path()).await;

    let registry_dir = tempfile::TempDir::new().unwrap();
    let registry_path = registry_dir.path().join("repositories.json");
    write_registry(&registry_path, repo_dir.path());

    let registry: SharedRegistry = Arc::new(ConfigRegistry::load(registry_path).await.unwrap());
    let (orchestrator, _events) = build_orchestrator(registry.clone()).await;
    let repository = registry.get_repository("seed-repo").await.unwrap();

    assert!(repository.last_scanned_at.is_none());

    let (_tx, rx) = watch::channel(false);
    orchestrator.scan_repository(&repository, rx).await.unwrap();

    let updated = registry.get_repository("seed-repo").await.unwrap();
    assert!(updated.last_scanned_at.is_some());
    assert_eq!(updated.scan_history.len(), 1);
}

/// The job lifecycle end to end through the Worker Pool, using the real
/// `PipelineExecutor`: a job enqueued against the seeded registry reaches
/// `Completed` without ever passing through `Failed`.
#[tokio::test]
async fn worker_pool_drives_a_job_to_completion() {
    let repo_dir = tempfile::TempDir::new().unwrap();
    init_repo(repo_dir.path()).await;

    let registry_dir = tempfile::TempDir::new().unwrap();
    let registry_path = registry_dir.path().join("repositories.json");
    write_registry(&registry_path, repo_dir.path());

    let registry: SharedRegistry = Arc::new(ConfigRegistry::load(registry_path).await.unwrap());
    let (orchestrator, events) = build_orchestrator(registry.clone()).await;
    let group_registry = registry.clone();
    let inter = Arc::new(InterProjectCoordinator::new(
        group_registry,
        events.clone(),
        orchestrator.clone(),
        SimilarityConfig::default(),
        SuggestionConfig::default(),
    ));
    let executor: Arc<dyn JobExecutor> = Arc::new(PipelineExecutor::new(orchestrator, inter));

    let history_dir = tempfile::TempDir::new().unwrap();
    let pool = WorkerPool::new(
        WorkerPoolConfig {
            max_concurrent_scans: 1,
            scan_timeout: std::time::Duration::from_secs(10),
            retry_delay_ms: 10,
            history_dir: history_dir.path().to_path_buf(),
        },
        events,
        executor,
    );

    let id = pool.enqueue(JobKind::Intra, "seed-repo", Priority::High, 2).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn(pool.clone().run(shutdown_rx));

    let mut final_state = None;
    for _ in 0..100 {
        if let Some(job) = pool.job(&id).await {
            if matches!(job.state, JobState::Completed | JobState::Failed) {
                final_state = Some(job.state);
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let _ = shutdown_tx.send(true);
    let _ = run_handle.await;

    assert_eq!(final_state, Some(JobState::Completed));
}
