//! Canonical tagged records shared across the pipeline (spec §3, §9
//! "define a single canonical set of tagged records ... and parse at the
//! trust boundary"). Nothing downstream of the Pattern Gateway trust
//! boundary touches an untyped `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// A span of source within one file. `lineEnd >= lineStart >= 1` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub column_start: Option<u32>,
    pub column_end: Option<u32>,
}

impl SourceLocation {
    pub fn line_count(&self) -> u32 {
        self.line_end.saturating_sub(self.line_start) + 1
    }
}

/// Semantic label assigned to a [`CodeBlock`] via the Block Extractor's
/// static `ruleId -> category` table (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Utility,
    ApiHandler,
    DatabaseOperation,
    Async,
    Configuration,
    Logging,
    ErrorHandling,
    Validation,
    Other,
}

/// One extracted code block (spec §3 CodeBlock).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBlock {
    pub id: String,
    pub pattern_id: String,
    pub category: Category,
    pub location: SourceLocation,
    pub relative_path: String,
    pub source_code: String,
    pub language: String,
    pub repository_path: String,
    pub line_count: u32,
    pub tags: Vec<String>,
    /// Whitespace-normalized SHA-256, first 16 hex chars (spec §3, §4.9).
    pub content_hash: String,
    pub ast_hash: Option<String>,
    pub complexity_score: Option<f64>,
}

impl CodeBlock {
    pub fn function_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|t| t.strip_prefix("function:"))
    }
}

impl Category {
    /// Impact-score category bonus (spec §4.11: "category bonus (6-10)").
    fn impact_bonus(self) -> f64 {
        match self {
            Category::ApiHandler | Category::DatabaseOperation => 10.0,
            Category::Async | Category::ErrorHandling => 8.0,
            Category::Validation | Category::Configuration => 7.0,
            Category::Logging | Category::Utility | Category::Other => 6.0,
        }
    }
}

/// How two or more [`CodeBlock`]s were judged similar (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethod {
    Exact,
    Structural,
    StructuralOppositeLogic,
    Semantic,
    Hybrid,
}

/// A group of blocks judged duplicates of one another (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: String,
    pub member_block_ids: Vec<String>,
    pub canonical_block_id: String,
    pub similarity_score: f64,
    pub similarity_method: SimilarityMethod,
    pub category: Category,
    pub occurrence_count: usize,
    pub total_lines: u32,
    pub affected_files: Vec<String>,
    pub affected_repositories: Vec<String>,
    pub quality_score: f64,
    pub impact_score: f64,
}

impl DuplicateGroup {
    /// Base impact score before the Suggestion Generator's cross-repo ROI
    /// uplift (spec §3 "impactScore (derived)", §4.11: occurrences x5,
    /// repositories x15, total lines x0.5, plus a category bonus).
    pub fn base_impact_score(&self) -> f64 {
        let score = self.occurrence_count as f64 * 5.0
            + self.affected_repositories.len() as f64 * 15.0
            + self.total_lines as f64 * 0.5
            + self.category.impact_bonus();
        score.min(100.0)
    }
}

/// Recommended consolidation approach (spec §3, §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    LocalUtil,
    SharedPackage,
    McpServer,
    AutonomousAgent,
    NoAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStep {
    pub order: u32,
    pub description: String,
}

/// A proposed consolidation for one [`DuplicateGroup`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSuggestion {
    pub id: String,
    pub group_id: String,
    pub strategy: Strategy,
    pub strategy_rationale: String,
    pub complexity: Complexity,
    pub risk: Risk,
    pub breaking_changes: bool,
    pub estimated_effort_hours: f64,
    pub loc_reduction: u32,
    pub confidence: f64,
    pub migration_steps: Vec<MigrationStep>,
    pub roi_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub total_blocks: usize,
    pub total_groups: usize,
    pub exact_duplicates: usize,
    pub total_suggestions: usize,
    pub quick_wins: usize,
    pub duplication_percent: f64,
}

/// Top-level output of one scan (spec §3 ScanResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub kind: crate::queue::JobKind,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_seconds: f64,
    pub repositories: Vec<String>,
    pub code_block_ids: Vec<String>,
    pub group_ids: Vec<String>,
    pub suggestion_ids: Vec<String>,
    pub metrics: ScanMetrics,
    pub from_cache: bool,
    pub executive_summary: String,
}

/// A raw match reported by the external AST matcher (spec §4.8):
/// `{ruleId, filePath, lineStart, lineEnd, matchedText, astNodeType?, metaVars?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub rule_id: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub matched_text: String,
    pub ast_node_type: Option<String>,
    pub meta_vars: Option<std::collections::HashMap<String, String>>,
}
