//! Scan Orchestrator (spec §4.12, component C12).
//!
//! Drives one repository through Git resolution, cache lookup, the
//! Pattern Gateway, Block Extractor, Similarity Engine, and Suggestion
//! Generator (C6-C11), publishing a progress event at each stage
//! boundary and checking the job's cancellation signal between them
//! (spec §5 "the Orchestrator yields between stages to honor
//! cancellation"). This is the pipeline's error boundary (spec §7
//! "Propagation"): everything below returns typed errors, the
//! orchestrator converts them into job state + events.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::block_extractor::{BlockExtractor, BlockExtractorConfig};
use crate::cache::ScanCache;
use crate::config::model::Repository;
use crate::config::registry::SharedRegistry;
use crate::config::model::ScanHistoryEntry;
use crate::error::QueueError;
use crate::events::{Event, EventBus, Topic};
use crate::git_tracker::GitTracker;
use crate::pattern_gateway::{PatternGateway, PatternGatewayConfig};
use crate::queue::job::{JobKind, ScanJob};
use crate::queue::worker_pool::JobExecutor;
use crate::similarity::{SimilarityConfig, SimilarityEngine};
use crate::suggestion::{SuggestionConfig, SuggestionGenerator};
use crate::types::{CodeBlock, DuplicateGroup, ScanMetrics, ScanResult};

/// Maps a file extension to the `CodeBlock.language` tag (spec §3).
fn detect_language(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ts") | Some("tsx") => "typescript",
        Some("js") | Some("jsx") | Some("mjs") => "javascript",
        Some("py") => "python",
        Some("rs") => "rust",
        Some("go") => "go",
        Some("java") => "java",
        _ => "unknown",
    }
    .to_string()
}

/// Reads an exclusion-filtered file from disk relative to the repository
/// root, for the Block Extractor's backward function-name scan.
fn read_relative(repo_path: &Path, relative: &str) -> Option<String> {
    std::fs::read_to_string(repo_path.join(relative)).ok()
}

fn executive_summary(metrics: &ScanMetrics) -> String {
    if metrics.total_groups == 0 {
        return "No duplicate patterns found.".to_string();
    }
    format!(
        "Found {} duplicate group(s) across {} code block(s) ({:.1}% duplication); {} consolidation suggestion(s), {} quick win(s).",
        metrics.total_groups,
        metrics.total_blocks,
        metrics.duplication_percent,
        metrics.total_suggestions,
        metrics.quick_wins
    )
}

fn compute_metrics(blocks: &[CodeBlock], groups: &[DuplicateGroup], suggestions_len: usize) -> ScanMetrics {
    let total_blocks = blocks.len();
    let total_groups = groups.len();
    let exact_duplicates = groups
        .iter()
        .filter(|g| g.similarity_method == crate::types::SimilarityMethod::Exact)
        .count();
    let duplicated_blocks: usize = groups.iter().map(|g| g.occurrence_count).sum();
    let duplication_percent = if total_blocks == 0 {
        0.0
    } else {
        100.0 * duplicated_blocks as f64 / total_blocks as f64
    };
    let quick_wins = groups.iter().filter(|g| g.quality_score >= 0.85 && g.occurrence_count <= 3).count();

    ScanMetrics {
        total_blocks,
        total_groups,
        exact_duplicates,
        total_suggestions: suggestions_len,
        quick_wins,
        duplication_percent,
    }
}

/// Whether the cancellation channel has fired (spec §5 "Cancel is
/// cooperative at stage boundaries").
fn is_canceled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    registry: SharedRegistry,
    cache: Arc<ScanCache>,
    events: EventBus,
    git: GitTracker,
    gateway_config: PatternGatewayConfig,
    extractor_config: BlockExtractorConfig,
    similarity_config: SimilarityConfig,
    suggestion_config: SuggestionConfig,
}

impl ScanOrchestrator {
    pub fn new(
        registry: SharedRegistry,
        cache: Arc<ScanCache>,
        events: EventBus,
        gateway_config: PatternGatewayConfig,
        extractor_config: BlockExtractorConfig,
        similarity_config: SimilarityConfig,
        suggestion_config: SuggestionConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            events,
            git: GitTracker::new(),
            gateway_config,
            extractor_config,
            similarity_config,
            suggestion_config,
        }
    }

    async fn publish(&self, topic: Topic, scan_id: &str, payload: serde_json::Value) {
        self.events.publish(Event::new(topic, payload).with_scan_id(scan_id)).await;
    }

    /// Runs C8-C10 for one repository, returning the raw blocks and
    /// validated groups without touching cache or suggestions. Shared with
    /// the Inter-Project Coordinator (spec §4.13 step 1 "optionally via
    /// cached per-repo scan" — here, uncached, since the coordinator needs
    /// the actual blocks, not just a cached `ScanResult`'s id references).
    pub async fn produce_blocks_and_groups(
        &self,
        repository: &Repository,
    ) -> Result<(Vec<CodeBlock>, Vec<DuplicateGroup>), QueueError> {
        let gateway = PatternGateway::new(self.gateway_config.clone());
        let output = gateway.invoke(&repository.path).await?;
        if output.truncated {
            warn!(repository = %repository.name, "pattern gateway output truncated, proceeding with partial matches");
        }

        let extractor = BlockExtractor::new(self.extractor_config.clone());
        let repo_path = repository.path.clone();
        let blocks = extractor.extract(
            repository.path.to_string_lossy().as_ref(),
            "unknown",
            output.matches,
            move |p| read_relative(&repo_path, &p.to_string_lossy()),
        );
        let blocks = retag_language(blocks);

        let engine = SimilarityEngine::new(self.similarity_config.clone());
        let groups = engine.group(&blocks);

        Ok((blocks, groups))
    }

    /// The 9-step pipeline (spec §4.12) for one repository.
    pub async fn scan_repository(
        &self,
        repository: &Repository,
        cancel: watch::Receiver<bool>,
    ) -> Result<ScanResult, QueueError> {
        let scan_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        let started_instant = std::time::Instant::now();

        // Step 1: resolve commit. NotAGitRepository degrades to "no cache"
        // rather than failing the scan (spec §4.12 step 1, §7).
        let commit_hash = match self.git.get_head_commit(&repository.path).await {
            Ok(hash) => Some(hash),
            Err(crate::error::GitError::NotAGitRepository(_)) => None,
            Err(e) => return Err(QueueError::Git(e)),
        };

        // Step 2: cache lookup. If `trackUncommittedChanges` is enabled and
        // the worktree is dirty, the cache is bypassed entirely (spec §4.7
        // "Optional policy") — neither read nor, later, write.
        let worktree_dirty = self.cache.config().track_uncommitted_changes
            && self
                .git
                .has_uncommitted_changes(&repository.path)
                .await
                .unwrap_or(false);

        if worktree_dirty {
            self.publish(Topic::CacheMiss, &scan_id, json!({"repository": repository.name, "reason": "dirty_worktree"})).await;
        } else if let Some(hash) = &commit_hash {
            match self.cache.get(&repository.path.to_string_lossy(), hash).await {
                Ok(Some(mut cached)) => {
                    cached.from_cache = true;
                    self.publish(Topic::CacheHit, &scan_id, json!({"repository": repository.name})).await;
                    self.publish(
                        Topic::ScanCompleted,
                        &scan_id,
                        json!({"repository": repository.name, "fromCache": true}),
                    ).await;
                    return Ok(cached);
                }
                Ok(None) => {
                    self.publish(Topic::CacheMiss, &scan_id, json!({"repository": repository.name})).await;
                }
                Err(e) => warn!(repository = %repository.name, error = %e, "cache lookup failed, treating as miss"),
            }
        }

        if is_canceled(&cancel) {
            return Err(QueueError::Canceled(scan_id));
        }

        // Step 3.
        self.publish(
            Topic::ScanProgress,
            &scan_id,
            json!({"stage": "scanning", "percent": 10}),
        ).await;

        // Steps 4-6.
        let (blocks, groups) = self.produce_blocks_and_groups(repository).await?;

        if is_canceled(&cancel) {
            return Err(QueueError::Canceled(scan_id));
        }
        self.publish(
            Topic::ScanProgress,
            &scan_id,
            json!({"stage": "extracting", "percent": 40}),
        ).await;
        self.publish(
            Topic::ScanProgress,
            &scan_id,
            json!({"stage": "analyzing", "percent": 70}),
        ).await;
        for group in &groups {
            self.publish(
                Topic::ScanDuplicate,
                &scan_id,
                json!({"groupId": group.id, "occurrenceCount": group.occurrence_count}),
            ).await;
        }

        if is_canceled(&cancel) {
            return Err(QueueError::Canceled(scan_id));
        }

        // Step 7.
        let suggestion_gen = SuggestionGenerator::new(self.suggestion_config);
        let suggestions: Vec<_> = groups.iter().map(|g| suggestion_gen.generate(g)).collect();
        self.publish(
            Topic::ScanProgress,
            &scan_id,
            json!({"stage": "suggesting", "percent": 90}),
        ).await;

        // Step 8.
        let metrics = compute_metrics(&blocks, &groups, suggestions.len());
        let result = ScanResult {
            scan_id: scan_id.clone(),
            kind: JobKind::Intra,
            started_at,
            duration_seconds: started_instant.elapsed().as_secs_f64(),
            repositories: vec![repository.name.clone()],
            code_block_ids: blocks.iter().map(|b| b.id.clone()).collect(),
            group_ids: groups.iter().map(|g| g.id.clone()).collect(),
            suggestion_ids: suggestions.iter().map(|s| s.id.clone()).collect(),
            metrics: metrics.clone(),
            from_cache: false,
            executive_summary: executive_summary(&metrics),
        };

        if !worktree_dirty {
            if let Some(hash) = &commit_hash {
                if let Err(e) = self
                    .cache
                    .put(&repository.path.to_string_lossy(), hash, result.clone())
                    .await
                {
                    warn!(repository = %repository.name, error = %e, "failed to write scan result to cache");
                }
            }
        }
        self.publish(
            Topic::ScanCompleted,
            &scan_id,
            json!({"repository": repository.name, "fromCache": false}),
        ).await;

        // Step 9.
        self.registry.update_last_scanned(&repository.name, chrono::Utc::now()).await?;
        self.registry
            .append_history(
                &repository.name,
                ScanHistoryEntry {
                    scan_id: scan_id.clone(),
                    started_at,
                    duration_seconds: result.duration_seconds,
                    groups_found: groups.len(),
                    from_cache: false,
                },
            )
            .await?;

        info!(repository = %repository.name, scan_id, groups = groups.len(), "scan completed");
        Ok(result)
    }
}

fn retag_language(mut blocks: Vec<CodeBlock>) -> Vec<CodeBlock> {
    for block in &mut blocks {
        block.language = detect_language(Path::new(&block.relative_path));
    }
    blocks
}

impl From<crate::error::RegistryError> for QueueError {
    fn from(e: crate::error::RegistryError) -> Self {
        QueueError::Repository(e.to_string())
    }
}

/// Dispatches `ScanJob`s to the orchestrator (`Intra`) or the Inter-Project
/// Coordinator (`Inter`), matching the `JobExecutor` contract the Worker
/// Pool was built against (spec §4.4, §4.12, §4.13).
pub struct PipelineExecutor {
    orchestrator: Arc<ScanOrchestrator>,
    inter: Arc<crate::inter_project::InterProjectCoordinator>,
}

impl PipelineExecutor {
    pub fn new(
        orchestrator: Arc<ScanOrchestrator>,
        inter: Arc<crate::inter_project::InterProjectCoordinator>,
    ) -> Self {
        Self { orchestrator, inter }
    }
}

#[async_trait]
impl JobExecutor for PipelineExecutor {
    async fn execute(&self, job: &ScanJob, cancel: watch::Receiver<bool>) -> Result<serde_json::Value, String> {
        let result = match job.kind {
            JobKind::Intra => {
                let repository = self
                    .orchestrator
                    .registry
                    .get_repository(&job.target)
                    .await
                    .map_err(|e| e.to_string())?;
                self.orchestrator.scan_repository(&repository, cancel).await
            }
            JobKind::Inter => {
                let group = self
                    .orchestrator
                    .registry
                    .get_group(&job.target)
                    .await
                    .map_err(|e| e.to_string())?;
                self.inter.scan_group(&group, cancel).await
            }
        };
        result.map(|r| serde_json::to_value(r).expect("ScanResult always serializes")).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_language_from_extension() {
        assert_eq!(detect_language(Path::new("a/b.ts")), "typescript");
        assert_eq!(detect_language(Path::new("a/b.py")), "python");
        assert_eq!(detect_language(Path::new("a/b.unknown")), "unknown");
    }

    #[test]
    fn executive_summary_reports_no_duplicates() {
        let metrics = ScanMetrics {
            total_blocks: 5,
            total_groups: 0,
            exact_duplicates: 0,
            total_suggestions: 0,
            quick_wins: 0,
            duplication_percent: 0.0,
        };
        assert_eq!(executive_summary(&metrics), "No duplicate patterns found.");
    }
}
