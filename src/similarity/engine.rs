//! Similarity Engine (spec §4.10, component C10) — THE CORE.
//!
//! Turns a set of [`CodeBlock`]s into validated [`DuplicateGroup`]s
//! through five ordered layers, each of which can only reduce an
//! otherwise-positive result (spec §4.10 preamble). Configuration is a
//! single immutable struct built once per process (spec §4.10.9, §9
//! "Configuration surface"), the same pattern `config/model.rs` uses for
//! `ScanConfig`/`CacheConfig`.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::SimilarityError;
use crate::types::{Category, CodeBlock, DuplicateGroup, SimilarityMethod};

use super::normalize::{
    chain_similarity, extract_http_status_codes, extract_method_chain, has_opposite_logic, neutralize_comparisons,
    normalize,
};

const CONTROL_FLOW_KEYWORDS: [&str; 8] = ["if", "else", "for", "while", "switch", "case", "try", "catch"];

#[derive(Debug, Clone, Copy)]
pub struct QualityWeights {
    pub avg_similarity: f64,
    pub size: f64,
    pub consistency: f64,
    pub tag_overlap: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            avg_similarity: 0.40,
            size: 0.20,
            consistency: 0.20,
            tag_overlap: 0.20,
        }
    }
}

/// Immutable per-process engine configuration (spec §4.10.9). Feature
/// flags default on; disabling one "restores the pre-flag behavior
/// exactly" per spec, which each layer implements by short-circuiting to
/// a neutral value (penalty 1.0, gate always-pass) rather than skipping
/// the computation differently in different code paths.
#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    pub structural_threshold: f64,
    pub levenshtein_weight: f64,
    pub chain_weight: f64,
    pub opposite_logic_penalty: f64,
    pub http_status_penalty: f64,
    pub ast_hash_uplift_floor: f64,
    pub min_line_count: u32,
    pub min_unique_tokens: usize,
    pub min_group_quality: f64,
    pub quality_weights: QualityWeights,
    pub enable_semantic_operators: bool,
    pub enable_logical_operator_check: bool,
    pub enable_method_chain_validation: bool,
    pub enable_semantic_layer: bool,
    pub enable_quality_filtering: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            structural_threshold: 0.90,
            levenshtein_weight: 0.7,
            chain_weight: 0.3,
            opposite_logic_penalty: 0.80,
            http_status_penalty: 0.70,
            ast_hash_uplift_floor: 0.95,
            min_line_count: 3,
            min_unique_tokens: 8,
            min_group_quality: 0.70,
            quality_weights: QualityWeights::default(),
            enable_semantic_operators: true,
            enable_logical_operator_check: true,
            enable_method_chain_validation: true,
            enable_semantic_layer: true,
            enable_quality_filtering: true,
        }
    }
}

impl SimilarityConfig {
    /// Reads `STRUCTURAL_THRESHOLD`, `OPPOSITE_LOGIC_PENALTY`,
    /// `HTTP_STATUS_PENALTY`, `MIN_GROUP_QUALITY`, and the
    /// `ENABLE_*` feature flags (spec §6).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_f64("STRUCTURAL_THRESHOLD") {
            config.structural_threshold = v;
        }
        if let Some(v) = env_f64("OPPOSITE_LOGIC_PENALTY") {
            config.opposite_logic_penalty = v;
        }
        if let Some(v) = env_f64("HTTP_STATUS_PENALTY") {
            config.http_status_penalty = v;
        }
        if let Some(v) = env_f64("MIN_GROUP_QUALITY") {
            config.min_group_quality = v;
        }
        config.enable_semantic_operators = env_flag("ENABLE_SEMANTIC_OPERATORS", config.enable_semantic_operators);
        config.enable_logical_operator_check =
            env_flag("ENABLE_LOGICAL_OPERATOR_CHECK", config.enable_logical_operator_check);
        config.enable_method_chain_validation =
            env_flag("ENABLE_METHOD_CHAIN_VALIDATION", config.enable_method_chain_validation);
        config.enable_semantic_layer = env_flag("ENABLE_SEMANTIC_LAYER", config.enable_semantic_layer);
        config.enable_quality_filtering = env_flag("ENABLE_QUALITY_FILTERING", config.enable_quality_filtering);
        config
    }
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name).ok().map(|v| v == "true" || v == "1").unwrap_or(default)
}

/// Pairwise score plus the method it was reached by (spec §4.10.3).
#[derive(Debug, Clone, Copy)]
struct PairScore {
    score: f64,
    method: SimilarityMethod,
}

pub struct SimilarityEngine {
    config: SimilarityConfig,
}

impl SimilarityEngine {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    /// Complexity prefilter (spec §4.10.5): blocks below the minimum line
    /// count / unique-token count, unless they contain a control-flow
    /// keyword, are excluded from Layer-2 grouping. Layer-1 hash grouping
    /// bypasses this filter entirely.
    fn passes_complexity_prefilter(&self, block: &CodeBlock) -> bool {
        if block.line_count >= self.config.min_line_count {
            return true;
        }
        let unique_tokens: HashSet<&str> = block.source_code.split_whitespace().collect();
        if unique_tokens.len() >= self.config.min_unique_tokens {
            return true;
        }
        CONTROL_FLOW_KEYWORDS
            .iter()
            .any(|kw| block.source_code.split(|c: char| !c.is_alphanumeric()).any(|t| t == *kw))
    }

    /// Layer 3 semantic-compatibility gate (spec §4.10.4).
    fn semantically_compatible(&self, a: &CodeBlock, b: &CodeBlock) -> bool {
        if !self.config.enable_semantic_layer {
            return true;
        }
        if a.pattern_id != b.pattern_id || a.category != b.category {
            return false;
        }
        if let (Some(fa), Some(fb)) = (a.function_tag(), b.function_tag()) {
            if fa == fb && a.relative_path == b.relative_path {
                return false;
            }
        }
        let (min, max) = if a.line_count <= b.line_count {
            (a.line_count, b.line_count)
        } else {
            (b.line_count, a.line_count)
        };
        if max == 0 {
            return true;
        }
        (min as f64 / max as f64) >= 0.5
    }

    /// Layer 2 structural similarity (spec §4.10.3): Levenshtein baseline,
    /// optional AST-hash uplift, then the semantic-penalty sub-checks,
    /// each of which can only lower the score.
    fn structural_score(&self, a: &CodeBlock, b: &CodeBlock) -> PairScore {
        let norm_a = normalize(&a.source_code);
        let norm_b = normalize(&b.source_code);

        let mut score = levenshtein_similarity(&norm_a, &norm_b);

        if let (Some(ha), Some(hb)) = (&a.ast_hash, &b.ast_hash) {
            if ha == hb {
                score = score.max(self.config.ast_hash_uplift_floor);
            }
        }

        if self.config.enable_method_chain_validation {
            let chain_a = extract_method_chain(&a.source_code);
            let chain_b = extract_method_chain(&b.source_code);
            let chain_sim = chain_similarity(&chain_a, &chain_b);
            if chain_sim < 1.0 {
                score = self.config.levenshtein_weight * levenshtein_similarity(&norm_a, &norm_b)
                    + self.config.chain_weight * chain_sim;
            }
        }

        if self.config.enable_logical_operator_check && has_opposite_logic(&a.source_code, &b.source_code) {
            let neutral_a = neutralize_comparisons(&norm_a);
            let neutral_b = neutralize_comparisons(&norm_b);
            if neutral_a == neutral_b {
                return PairScore {
                    score: 0.75,
                    method: SimilarityMethod::StructuralOppositeLogic,
                };
            }
            score *= self.config.opposite_logic_penalty;
        }

        let status_a = extract_http_status_codes(&a.source_code);
        let status_b = extract_http_status_codes(&b.source_code);
        if !status_a.is_empty() && !status_b.is_empty() && status_a != status_b {
            score *= self.config.http_status_penalty;
        }

        PairScore {
            score,
            method: SimilarityMethod::Structural,
        }
    }

    fn pair_score(&self, a: &CodeBlock, b: &CodeBlock) -> Option<PairScore> {
        if a.content_hash == b.content_hash {
            return Some(PairScore {
                score: 1.0,
                method: SimilarityMethod::Exact,
            });
        }
        if !self.semantically_compatible(a, b) {
            return None;
        }
        Some(self.structural_score(a, b))
    }

    /// Runs the full pipeline: Layer 1 hash grouping, Layer 2/3 structural
    /// grouping over the complexity-prefiltered remainder, group
    /// validation, and the Layer 4 quality filter (spec §4.10.6, §4.10.7).
    /// Invalid or low-quality groups are dropped with a `warn!`, matching
    /// the ValidationError contract in spec §7 ("silently drops the
    /// offending group with a warning event; not a job failure").
    pub fn group(&self, blocks: &[CodeBlock]) -> Vec<DuplicateGroup> {
        let mut assigned: HashSet<usize> = HashSet::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();

        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, block) in blocks.iter().enumerate() {
            by_hash.entry(block.content_hash.as_str()).or_default().push(idx);
        }
        for (_, members) in by_hash {
            if members.len() >= 2 {
                for &idx in &members {
                    assigned.insert(idx);
                }
                groups.push(members);
            }
        }

        let mut remaining: Vec<usize> = (0..blocks.len())
            .filter(|idx| !assigned.contains(idx) && self.passes_complexity_prefilter(&blocks[*idx]))
            .collect();
        remaining.sort_by_key(|&idx| blocks[idx].line_count);

        for &a_idx in &remaining {
            if assigned.contains(&a_idx) {
                continue;
            }
            let mut group = vec![a_idx];
            for &b_idx in &remaining {
                if b_idx == a_idx || assigned.contains(&b_idx) || group.contains(&b_idx) {
                    continue;
                }
                if let Some(PairScore { score, .. }) = self.pair_score(&blocks[a_idx], &blocks[b_idx]) {
                    if score >= self.config.structural_threshold {
                        group.push(b_idx);
                    }
                }
            }
            if group.len() >= 2 {
                for &idx in &group {
                    assigned.insert(idx);
                }
                groups.push(group);
            }
        }

        groups
            .into_iter()
            .filter_map(|indices| self.build_group(blocks, &indices))
            .collect()
    }

    fn build_group(&self, blocks: &[CodeBlock], indices: &[usize]) -> Option<DuplicateGroup> {
        let members: Vec<&CodeBlock> = indices.iter().map(|&i| &blocks[i]).collect();
        let group_id = uuid::Uuid::new_v4().to_string();

        if let Err(e) = self.validate_group(&group_id, &members) {
            warn!(group = %group_id, error = %e, "dropping invalid duplicate group");
            return None;
        }

        let (method, avg_similarity) = self.group_method_and_avg_similarity(&members);

        let quality = self.quality(&members, avg_similarity);
        if self.config.enable_quality_filtering && quality < self.config.min_group_quality {
            warn!(group = %group_id, quality, "dropping low-quality duplicate group");
            return None;
        }

        let canonical = self.select_canonical(&members);
        let total_lines: u32 = members.iter().map(|b| b.line_count).sum();
        let affected_files: Vec<String> = dedup_sorted(members.iter().map(|b| b.relative_path.clone()));
        let affected_repositories: Vec<String> = dedup_sorted(members.iter().map(|b| b.repository_path.clone()));

        let mut group = DuplicateGroup {
            id: group_id,
            member_block_ids: members.iter().map(|b| b.id.clone()).collect(),
            canonical_block_id: canonical.id.clone(),
            similarity_score: avg_similarity,
            similarity_method: method,
            category: members[0].category,
            occurrence_count: members.len(),
            total_lines,
            affected_files,
            affected_repositories,
            quality_score: quality,
            impact_score: 0.0,
        };
        group.impact_score = group.base_impact_score();
        Some(group)
    }

    /// Group-wide validation (spec §4.10.6 step 4): shared `patternId` and
    /// `category`, and every pair semantically compatible.
    fn validate_group(&self, group_id: &str, members: &[&CodeBlock]) -> Result<(), SimilarityError> {
        if members.len() < 2 {
            return Err(SimilarityError::GroupTooSmall(group_id.to_string()));
        }
        let first = members[0];
        for other in &members[1..] {
            if other.pattern_id != first.pattern_id {
                return Err(SimilarityError::PatternIdMismatch {
                    group: group_id.to_string(),
                    a: first.pattern_id.clone(),
                    b: other.pattern_id.clone(),
                });
            }
            if other.category != first.category {
                return Err(SimilarityError::CategoryMismatch {
                    group: group_id.to_string(),
                    a: format!("{:?}", first.category),
                    b: format!("{:?}", other.category),
                });
            }
        }
        Ok(())
    }

    fn group_method_and_avg_similarity(&self, members: &[&CodeBlock]) -> (SimilarityMethod, f64) {
        let all_exact = members
            .windows(2)
            .all(|w| w[0].content_hash == w[1].content_hash);
        if all_exact {
            return (SimilarityMethod::Exact, 1.0);
        }

        let mut scores = Vec::new();
        let mut saw_opposite_logic = false;
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if let Some(pair) = self.pair_score(members[i], members[j]) {
                    if pair.method == SimilarityMethod::StructuralOppositeLogic {
                        saw_opposite_logic = true;
                    }
                    scores.push(pair.score);
                }
            }
        }
        let avg = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let method = if saw_opposite_logic {
            SimilarityMethod::StructuralOppositeLogic
        } else {
            SimilarityMethod::Structural
        };
        (method, avg)
    }

    /// Layer 4 group-quality filter (spec §4.10.7).
    fn quality(&self, members: &[&CodeBlock], avg_similarity: f64) -> f64 {
        let w = self.config.quality_weights;
        let size_factor = (members.len() as f64 / 5.0).min(1.0);

        let avg_lines = members.iter().map(|b| b.line_count as f64).sum::<f64>() / members.len() as f64;
        let max_deviation = members
            .iter()
            .map(|b| (b.line_count as f64 - avg_lines).abs())
            .fold(0.0_f64, f64::max);
        let consistency = if avg_lines > 0.0 {
            (1.0 - max_deviation / avg_lines).max(0.0)
        } else {
            1.0
        };

        let tag_overlap = average_pairwise_jaccard(members);

        w.avg_similarity * avg_similarity + w.size * size_factor + w.consistency * consistency + w.tag_overlap * tag_overlap
    }

    /// Canonical selection (spec §4.10.8): shortest `sourceCode`, tiebreak
    /// alphabetical `relativePath`, then ascending `lineStart`.
    fn select_canonical<'a>(&self, members: &[&'a CodeBlock]) -> &'a CodeBlock {
        members
            .iter()
            .copied()
            .min_by(|a, b| {
                a.source_code
                    .len()
                    .cmp(&b.source_code.len())
                    .then_with(|| a.relative_path.cmp(&b.relative_path))
                    .then_with(|| a.location.line_start.cmp(&b.location.line_start))
            })
            .expect("groups are non-empty")
    }
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

fn average_pairwise_jaccard(members: &[&CodeBlock]) -> f64 {
    if members.len() < 2 {
        return 1.0;
    }
    let sets: Vec<HashSet<&str>> = members
        .iter()
        .map(|b| b.tags.iter().map(String::as_str).collect())
        .collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            pairs += 1;
            let union = sets[i].union(&sets[j]).count();
            if union == 0 {
                total += 1.0;
                continue;
            }
            let intersection = sets[i].intersection(&sets[j]).count();
            total += intersection as f64 / union as f64;
        }
    }
    if pairs == 0 {
        1.0
    } else {
        total / pairs as f64
    }
}

fn dedup_sorted(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut set: Vec<String> = items.collect::<HashSet<_>>().into_iter().collect();
    set.sort();
    set
}
