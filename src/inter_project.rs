//! Inter-Project Coordinator (spec §4.13, component C13).
//!
//! Runs the same Pattern Gateway -> Block Extractor -> Similarity Engine
//! pipeline the Scan Orchestrator (C12) uses, but across every repository
//! in a [`RepositoryGroup`], grouping blocks by `contentHash` across the
//! union of repositories and optionally re-running Layer-2 structural
//! comparison across repository boundaries (spec §4.13).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use crate::config::model::RepositoryGroup;
use crate::config::registry::SharedRegistry;
use crate::error::QueueError;
use crate::events::{Event, EventBus, Topic};
use crate::orchestrator::ScanOrchestrator;
use crate::queue::job::JobKind;
use crate::similarity::{SimilarityConfig, SimilarityEngine};
use crate::suggestion::{SuggestionConfig, SuggestionGenerator};
use crate::types::{CodeBlock, DuplicateGroup, ScanMetrics, ScanResult};

pub struct InterProjectCoordinator {
    registry: SharedRegistry,
    events: EventBus,
    orchestrator: Arc<ScanOrchestrator>,
    similarity_config: SimilarityConfig,
    suggestion_config: SuggestionConfig,
}

impl InterProjectCoordinator {
    pub fn new(
        registry: SharedRegistry,
        events: EventBus,
        orchestrator: Arc<ScanOrchestrator>,
        similarity_config: SimilarityConfig,
        suggestion_config: SuggestionConfig,
    ) -> Self {
        Self {
            registry,
            events,
            orchestrator,
            similarity_config,
            suggestion_config,
        }
    }

    /// Cross-repository content-hash grouping (spec §4.13 step 2): blocks
    /// sharing a `contentHash` but living in ≥2 distinct repositories.
    fn hash_groups_across_repos(blocks: &[CodeBlock]) -> Vec<Vec<usize>> {
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, block) in blocks.iter().enumerate() {
            by_hash.entry(block.content_hash.as_str()).or_default().push(idx);
        }
        by_hash
            .into_values()
            .filter(|members| {
                let repos: std::collections::HashSet<&str> =
                    members.iter().map(|&i| blocks[i].repository_path.as_str()).collect();
                members.len() >= 2 && repos.len() >= 2
            })
            .collect()
    }

    fn build_group(blocks: &[CodeBlock], indices: &[usize]) -> DuplicateGroup {
        let members: Vec<&CodeBlock> = indices.iter().map(|&i| &blocks[i]).collect();
        let canonical = members
            .iter()
            .min_by(|a, b| {
                a.source_code
                    .len()
                    .cmp(&b.source_code.len())
                    .then_with(|| a.relative_path.cmp(&b.relative_path))
            })
            .expect("cross-repo group is non-empty");

        let total_lines: u32 = members.iter().map(|b| b.line_count).sum();
        let mut affected_files: Vec<String> = members.iter().map(|b| b.relative_path.clone()).collect();
        affected_files.sort();
        affected_files.dedup();
        let mut affected_repositories: Vec<String> = members.iter().map(|b| b.repository_path.clone()).collect();
        affected_repositories.sort();
        affected_repositories.dedup();

        let mut group = DuplicateGroup {
            id: uuid::Uuid::new_v4().to_string(),
            member_block_ids: members.iter().map(|b| b.id.clone()).collect(),
            canonical_block_id: canonical.id.clone(),
            similarity_score: 1.0,
            similarity_method: crate::types::SimilarityMethod::Exact,
            category: members[0].category,
            occurrence_count: members.len(),
            total_lines,
            affected_files,
            affected_repositories,
            quality_score: 1.0,
            impact_score: 0.0,
        };
        group.impact_score = group.base_impact_score();
        group
    }

    /// Runs the cross-repository pipeline for one `RepositoryGroup`
    /// (spec §4.13). Cancellation is checked between repositories, the
    /// same cooperative-cancel discipline the Orchestrator applies between
    /// pipeline stages (spec §5).
    pub async fn scan_group(
        &self,
        group: &RepositoryGroup,
        cancel: watch::Receiver<bool>,
    ) -> Result<ScanResult, QueueError> {
        let scan_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        let started_instant = std::time::Instant::now();

        let mut all_blocks = Vec::new();
        for name in &group.repositories {
            if *cancel.borrow() {
                return Err(QueueError::Canceled(scan_id));
            }
            let repository = match self.registry.get_repository(name).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(repository = name, error = %e, "skipping unknown group member");
                    continue;
                }
            };
            let (blocks, _) = self.orchestrator.produce_blocks_and_groups(&repository).await?;
            all_blocks.extend(blocks);
        }

        // Step 2: content-hash groups spanning >=2 repositories.
        let mut groups: Vec<DuplicateGroup> = Self::hash_groups_across_repos(&all_blocks)
            .into_iter()
            .map(|indices| Self::build_group(&all_blocks, &indices))
            .collect();

        // Step 3: optional cross-repository Layer-2 rerun over blocks that
        // did not already land in an exact cross-repo group, same engine
        // and configuration the per-repo pass uses.
        let already_grouped: std::collections::HashSet<String> =
            groups.iter().flat_map(|g| g.member_block_ids.iter().cloned()).collect();
        let remaining: Vec<CodeBlock> = all_blocks
            .iter()
            .filter(|b| !already_grouped.contains(&b.id))
            .cloned()
            .collect();
        let engine = SimilarityEngine::new(self.similarity_config.clone());
        let mut structural_groups: Vec<DuplicateGroup> = engine
            .group(&remaining)
            .into_iter()
            .filter(|g| {
                g.affected_repositories.len() >= 2
            })
            .collect();
        groups.append(&mut structural_groups);

        // Step 4: cross-repo impact uplift is applied by the Suggestion
        // Generator, which multiplies by 1.2 whenever a group's
        // `affectedRepositories.len() >= 2` — already true of every group
        // this coordinator emits, so a cross-repo group's strategy is never
        // downgraded relative to the single-repository cascade (spec
        // §4.13 step 4).
        for group_event in &groups {
            self.events.publish(
                Event::new(
                    Topic::ScanDuplicate,
                    serde_json::json!({"groupId": group_event.id, "crossRepo": true}),
                )
                .with_scan_id(&scan_id),
            ).await;
        }

        let suggestion_gen = SuggestionGenerator::new(self.suggestion_config);
        let suggestions: Vec<_> = groups.iter().map(|g| suggestion_gen.generate(g)).collect();

        let metrics = ScanMetrics {
            total_blocks: all_blocks.len(),
            total_groups: groups.len(),
            exact_duplicates: groups
                .iter()
                .filter(|g| g.similarity_method == crate::types::SimilarityMethod::Exact)
                .count(),
            total_suggestions: suggestions.len(),
            quick_wins: groups.iter().filter(|g| g.quality_score >= 0.85 && g.occurrence_count <= 3).count(),
            duplication_percent: if all_blocks.is_empty() {
                0.0
            } else {
                100.0 * groups.iter().map(|g| g.occurrence_count).sum::<usize>() as f64 / all_blocks.len() as f64
            },
        };

        let result = ScanResult {
            scan_id,
            kind: JobKind::Inter,
            started_at,
            duration_seconds: started_instant.elapsed().as_secs_f64(),
            repositories: group.repositories.clone(),
            code_block_ids: all_blocks.iter().map(|b| b.id.clone()).collect(),
            group_ids: groups.iter().map(|g| g.id.clone()).collect(),
            suggestion_ids: suggestions.iter().map(|s| s.id.clone()).collect(),
            metrics,
            from_cache: false,
            executive_summary: format!(
                "Found {} cross-repository duplicate group(s) across {} repositories.",
                groups.len(),
                group.repositories.len()
            ),
        };

        self.events.publish(
            Event::new(Topic::ScanCompleted, serde_json::json!({"group": group.name, "fromCache": false}))
                .with_scan_id(&result.scan_id),
        ).await;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, SourceLocation};

    fn block(id: &str, repo: &str, hash: &str) -> CodeBlock {
        CodeBlock {
            id: id.to_string(),
            pattern_id: "p1".to_string(),
            category: Category::Utility,
            location: SourceLocation {
                file_path: "a.js".to_string(),
                line_start: 1,
                line_end: 1,
                column_start: None,
                column_end: None,
            },
            relative_path: "a.js".to_string(),
            source_code: "doThing();".to_string(),
            language: "javascript".to_string(),
            repository_path: repo.to_string(),
            line_count: 1,
            tags: vec![],
            content_hash: hash.to_string(),
            ast_hash: None,
            complexity_score: None,
        }
    }

    #[test]
    fn cross_repo_hash_groups_require_two_distinct_repositories() {
        let blocks = vec![block("a", "/repo1", "h1"), block("b", "/repo1", "h1")];
        assert!(InterProjectCoordinator::hash_groups_across_repos(&blocks).is_empty());

        let blocks = vec![block("a", "/repo1", "h1"), block("b", "/repo2", "h1")];
        assert_eq!(InterProjectCoordinator::hash_groups_across_repos(&blocks).len(), 1);
    }
}
