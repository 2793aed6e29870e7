//! Suggestion Generator (spec §4.11, component C11).
//!
//! Turns each validated [`DuplicateGroup`] into one [`ConsolidationSuggestion`]
//! via a strategy decision cascade, an impact/ROI scoring formula, and a
//! strategy-keyed migration-step template. Pure function of its inputs —
//! no I/O, matching the teacher's scoring-module shape of small,
//! independently testable transforms.

use crate::types::{Category, Complexity, ConsolidationSuggestion, DuplicateGroup, MigrationStep, Risk, Strategy};

#[derive(Debug, Clone, Copy)]
pub struct SuggestionConfig {
    pub occurrences_per_file_estimate: f64,
    pub testing_effort_hours: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            occurrences_per_file_estimate: 0.25,
            testing_effort_hours: 0.5,
        }
    }
}

pub struct SuggestionGenerator {
    config: SuggestionConfig,
}

impl SuggestionGenerator {
    pub fn new(config: SuggestionConfig) -> Self {
        Self { config }
    }

    /// Strategy decision cascade (spec §4.11 steps 1-5). Checked in order;
    /// the first matching rule wins.
    fn decide_strategy(&self, group: &DuplicateGroup) -> (Strategy, &'static str) {
        let occurrences = group.occurrence_count;
        let repo_count = group.affected_repositories.len();
        let file_count = group.affected_files.len();

        if occurrences <= 3 && repo_count <= 1 {
            return (Strategy::LocalUtil, "few occurrences confined to a single repository");
        }
        if (4..=8).contains(&occurrences) || (2..=3).contains(&file_count) {
            return (
                Strategy::SharedPackage,
                "moderate occurrence count or spread across a small number of files",
            );
        }
        if occurrences >= 9 || matches!(group.category, Category::ApiHandler | Category::DatabaseOperation) {
            return (
                Strategy::McpServer,
                "high occurrence count or a category that benefits from centralized service logic",
            );
        }
        if repo_count >= 2 && occurrences >= 4 {
            return (
                Strategy::AutonomousAgent,
                "cross-cutting duplication spanning multiple repositories",
            );
        }
        (Strategy::NoAction, "duplication does not clear any consolidation threshold")
    }

    fn complexity_for(&self, group: &DuplicateGroup) -> Complexity {
        let avg_lines = group.total_lines as f64 / group.occurrence_count.max(1) as f64;
        match avg_lines {
            l if l < 3.0 => Complexity::Trivial,
            l if l < 8.0 => Complexity::Simple,
            l if l < 20.0 => Complexity::Moderate,
            l if l < 50.0 => Complexity::Complex,
            _ => Complexity::VeryComplex,
        }
    }

    fn risk_for(&self, group: &DuplicateGroup, strategy: Strategy) -> Risk {
        match strategy {
            Strategy::NoAction => Risk::Minimal,
            Strategy::LocalUtil => Risk::Low,
            Strategy::SharedPackage if group.affected_repositories.len() <= 1 => Risk::Low,
            Strategy::SharedPackage => Risk::Medium,
            Strategy::McpServer => Risk::High,
            Strategy::AutonomousAgent => Risk::High,
        }
    }

    fn complexity_multiplier(complexity: Complexity) -> f64 {
        match complexity {
            Complexity::Trivial => 1.3,
            Complexity::Simple => 1.1,
            Complexity::Moderate => 0.9,
            Complexity::Complex | Complexity::VeryComplex => 0.7,
        }
    }

    fn risk_multiplier(risk: Risk) -> f64 {
        match risk {
            Risk::Minimal => 1.2,
            Risk::Low => 1.1,
            Risk::Medium => 0.9,
            Risk::High | Risk::Critical => 0.7,
        }
    }

    /// Migration steps from a strategy-keyed template (spec §4.11). Effort
    /// totals `base + 0.25h/file + 0.5h testing`.
    fn migration_steps(&self, group: &DuplicateGroup, strategy: Strategy) -> (Vec<MigrationStep>, f64) {
        let file_count = group.affected_files.len() as f64;
        let (templates, base_hours): (Vec<&str>, f64) = match strategy {
            Strategy::LocalUtil => (
                vec![
                    "Extract the duplicated block into a local utility function",
                    "Replace each occurrence with a call to the new utility",
                    "Run the existing test suite against affected call sites",
                ],
                1.0,
            ),
            Strategy::SharedPackage => (
                vec![
                    "Create or identify a shared package for the consolidated logic",
                    "Move the utility into the shared package with its own tests",
                    "Publish/version the package",
                    "Update each call site to depend on the shared package",
                    "Remove the now-dead duplicated implementations",
                ],
                3.0,
            ),
            Strategy::McpServer => (
                vec![
                    "Design a service interface covering the duplicated behavior",
                    "Implement the service behind the MCP server",
                    "Migrate call sites to the service client incrementally",
                    "Decommission the duplicated in-process implementations",
                ],
                6.0,
            ),
            Strategy::AutonomousAgent => (
                vec![
                    "Scope the cross-cutting orchestration the duplication implies",
                    "Design an agent-driven workflow to own the consolidated behavior",
                    "Migrate repositories onto the workflow one at a time",
                ],
                8.0,
            ),
            Strategy::NoAction => (vec!["No consolidation action recommended"], 0.0),
        };

        let steps = templates
            .into_iter()
            .enumerate()
            .map(|(idx, description)| MigrationStep {
                order: idx as u32 + 1,
                description: description.to_string(),
            })
            .collect();

        let effort = if matches!(strategy, Strategy::NoAction) {
            0.0
        } else {
            base_hours + file_count * self.config.occurrences_per_file_estimate + self.config.testing_effort_hours
        };
        (steps, effort)
    }

    /// Builds one suggestion for one validated group (spec §4.11).
    pub fn generate(&self, group: &DuplicateGroup) -> ConsolidationSuggestion {
        let (strategy, rationale) = self.decide_strategy(group);
        let complexity = self.complexity_for(group);
        let risk = self.risk_for(group, strategy);

        let mut impact = group.impact_score;
        if group.affected_repositories.len() >= 2 {
            impact *= 1.2;
        }

        let roi = impact * Self::complexity_multiplier(complexity) * Self::risk_multiplier(risk);
        let (migration_steps, effort_hours) = self.migration_steps(group, strategy);

        let loc_reduction = if group.occurrence_count > 1 {
            group.total_lines - group.total_lines / group.occurrence_count as u32
        } else {
            0
        };

        ConsolidationSuggestion {
            id: uuid::Uuid::new_v4().to_string(),
            group_id: group.id.clone(),
            strategy,
            strategy_rationale: rationale.to_string(),
            complexity,
            risk,
            breaking_changes: matches!(strategy, Strategy::McpServer | Strategy::AutonomousAgent),
            estimated_effort_hours: effort_hours,
            loc_reduction,
            confidence: group.quality_score,
            migration_steps,
            roi_score: roi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SimilarityMethod;

    fn group(occurrences: usize, repos: usize, files: usize, category: Category, total_lines: u32) -> DuplicateGroup {
        let mut g = DuplicateGroup {
            id: "g1".to_string(),
            member_block_ids: (0..occurrences).map(|i| i.to_string()).collect(),
            canonical_block_id: "0".to_string(),
            similarity_score: 1.0,
            similarity_method: SimilarityMethod::Structural,
            category,
            occurrence_count: occurrences,
            total_lines,
            affected_files: (0..files).map(|i| format!("f{i}.js")).collect(),
            affected_repositories: (0..repos).map(|i| format!("/repo{i}")).collect(),
            quality_score: 0.85,
            impact_score: 0.0,
        };
        g.impact_score = g.base_impact_score();
        g
    }

    #[test]
    fn few_occurrences_single_repo_is_local_util() {
        let g = group(3, 1, 1, Category::Utility, 12);
        let gen = SuggestionGenerator::new(SuggestionConfig::default());
        let s = gen.generate(&g);
        assert_eq!(s.strategy, Strategy::LocalUtil);
        assert!(!s.breaking_changes);
    }

    #[test]
    fn high_occurrence_api_handler_is_mcp_server() {
        let g = group(10, 2, 4, Category::ApiHandler, 40);
        let gen = SuggestionGenerator::new(SuggestionConfig::default());
        let s = gen.generate(&g);
        assert_eq!(s.strategy, Strategy::McpServer);
        assert!(s.breaking_changes);
    }

    #[test]
    fn cross_repo_group_gets_impact_uplift() {
        let single_repo = group(3, 1, 1, Category::Utility, 12);
        let multi_repo = group(3, 2, 1, Category::Utility, 12);
        let gen = SuggestionGenerator::new(SuggestionConfig::default());
        let s1 = gen.generate(&single_repo);
        let s2 = gen.generate(&multi_repo);
        assert!(s2.roi_score > s1.roi_score);
    }

    #[test]
    fn effort_includes_base_plus_per_file_plus_testing() {
        let g = group(5, 1, 3, Category::Utility, 30);
        let gen = SuggestionGenerator::new(SuggestionConfig::default());
        let s = gen.generate(&g);
        assert!((s.estimated_effort_hours - (3.0 + 3.0 * 0.25 + 0.5)).abs() < 1e-9);
    }
}
