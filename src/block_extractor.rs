//! Block Extractor (spec §4.9, component C9).
//!
//! Lifts raw [`PatternMatch`]es from the Pattern Gateway into typed
//! [`CodeBlock`]s: resolves the enclosing function name by a bounded
//! backward scan, assigns a `category` via a static `ruleId -> category`
//! table, and deduplicates by `(repositoryPath, relativePath,
//! functionName)`, keeping the earliest occurrence (spec §4.9). Parses
//! once at the trust boundary, same discipline `config/model.rs` applies
//! to `repositories.json` (spec §9).

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::types::{Category, CodeBlock, PatternMatch, SourceLocation};

#[derive(Debug, Clone)]
pub struct BlockExtractorConfig {
    /// How many lines upward the backward scan for an enclosing function
    /// declaration will look before giving up (spec §4.9).
    pub function_lookback_lines: usize,
}

impl Default for BlockExtractorConfig {
    fn default() -> Self {
        Self {
            function_lookback_lines: 200,
        }
    }
}

/// Static `ruleId -> category` table (spec §4.9). Unknown rule ids fall
/// back to a substring heuristic over the id itself, then `Category::Other`.
static RULE_CATEGORY_TABLE: Lazy<HashMap<&'static str, Category>> = Lazy::new(|| {
    HashMap::from([
        ("utility-function", Category::Utility),
        ("api-handler", Category::ApiHandler),
        ("route-handler", Category::ApiHandler),
        ("database-query", Category::DatabaseOperation),
        ("db-operation", Category::DatabaseOperation),
        ("async-pattern", Category::Async),
        ("promise-chain", Category::Async),
        ("config-access", Category::Configuration),
        ("configuration", Category::Configuration),
        ("logging-statement", Category::Logging),
        ("error-handling", Category::ErrorHandling),
        ("exception-handler", Category::ErrorHandling),
        ("validation-check", Category::Validation),
        ("input-validation", Category::Validation),
    ])
});

fn category_for_rule(rule_id: &str) -> Category {
    if let Some(category) = RULE_CATEGORY_TABLE.get(rule_id) {
        return *category;
    }
    let lower = rule_id.to_lowercase();
    let heuristic = [
        ("api", Category::ApiHandler),
        ("route", Category::ApiHandler),
        ("db", Category::DatabaseOperation),
        ("query", Category::DatabaseOperation),
        ("sql", Category::DatabaseOperation),
        ("async", Category::Async),
        ("await", Category::Async),
        ("promise", Category::Async),
        ("config", Category::Configuration),
        ("log", Category::Logging),
        ("error", Category::ErrorHandling),
        ("exception", Category::ErrorHandling),
        ("valid", Category::Validation),
        ("util", Category::Utility),
        ("helper", Category::Utility),
    ];
    heuristic
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, category)| *category)
        .unwrap_or(Category::Other)
}

/// Function-declaration patterns across the languages the fixtures cover
/// (spec §8 seed tests are JS; other examples in the pack are Python/Rust).
/// Checked in order, most specific first.
static FUNCTION_PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();

fn function_patterns() -> &'static [regex::Regex] {
    FUNCTION_PATTERNS.get_or_init(|| {
        [
            r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)\s*\(",
            r"^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s*)?(?:\([^)]*\)|\w+)\s*=>",
            r"^\s*(?:public|private|protected|static|async)*\s*(\w+)\s*\([^)]*\)\s*\{",
            r"^\s*(?:pub(?:\(\w+\))?\s+)?(?:async\s+)?fn\s+(\w+)",
            r"^\s*def\s+(\w+)\s*\(",
        ]
        .iter()
        .map(|p| regex::Regex::new(p).expect("static function pattern compiles"))
        .collect()
    })
}

fn enclosing_function_name(lines: &[&str], match_line_idx: usize, lookback: usize) -> Option<String> {
    let start = match_line_idx.saturating_sub(lookback);
    for idx in (start..=match_line_idx).rev() {
        let line = lines.get(idx)?;
        for pattern in function_patterns() {
            if let Some(caps) = pattern.captures(line) {
                return caps.get(1).map(|m| m.as_str().to_string());
            }
        }
    }
    None
}

/// Whitespace-normalized SHA-256, first 16 hex chars (spec §3, §4.9). This
/// is a *lighter* normalization than the Similarity Engine's `normalize()`
/// (no identifier/literal substitution) — it only collapses whitespace, so
/// two occurrences differing solely in formatting hash identically.
pub fn content_hash(source: &str) -> String {
    let collapsed: String = source.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(collapsed.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

pub struct BlockExtractor {
    config: BlockExtractorConfig,
}

impl BlockExtractor {
    pub fn new(config: BlockExtractorConfig) -> Self {
        Self { config }
    }

    /// Transform one repository's pattern matches into deduplicated
    /// `CodeBlock`s (spec §4.9). `file_reader` abstracts file IO so tests
    /// don't need a real filesystem.
    pub fn extract(
        &self,
        repository_path: &str,
        language: &str,
        matches: Vec<PatternMatch>,
        file_reader: impl Fn(&Path) -> Option<String>,
    ) -> Vec<CodeBlock> {
        let mut file_cache: HashMap<String, Vec<String>> = HashMap::new();
        let mut seen: HashMap<(String, String), usize> = HashMap::new();
        let mut blocks: Vec<Option<CodeBlock>> = Vec::new();

        for (idx, m) in matches.into_iter().enumerate() {
            let lines = file_cache.entry(m.file_path.clone()).or_insert_with(|| {
                file_reader(Path::new(&m.file_path))
                    .map(|content| content.lines().map(str::to_string).collect())
                    .unwrap_or_default()
            });
            let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            let match_line_idx = (m.line_start as usize).saturating_sub(1);
            let function_name = enclosing_function_name(&line_refs, match_line_idx, self.config.function_lookback_lines);

            let relative_path = m.file_path.clone();
            let key = (relative_path.clone(), function_name.clone().unwrap_or_default());

            let location = SourceLocation {
                file_path: m.file_path.clone(),
                line_start: m.line_start,
                line_end: m.line_end,
                column_start: None,
                column_end: None,
            };
            let mut tags = vec![];
            if let Some(name) = &function_name {
                tags.push(format!("function:{name}"));
            }

            let block = CodeBlock {
                id: uuid::Uuid::new_v4().to_string(),
                pattern_id: m.rule_id.clone(),
                category: category_for_rule(&m.rule_id),
                location: location.clone(),
                relative_path,
                source_code: m.matched_text.clone(),
                language: language.to_string(),
                repository_path: repository_path.to_string(),
                line_count: location.line_count(),
                tags,
                content_hash: content_hash(&m.matched_text),
                ast_hash: m.ast_node_type.clone(),
                complexity_score: None,
            };

            // Only dedup when a function name was resolved; matches with no
            // enclosing function are each kept (spec is silent on this edge
            // case, and collapsing all of them under one empty-name key
            // would wrongly merge unrelated top-level matches).
            if function_name.is_some() {
                match seen.get(&key) {
                    Some(&existing_idx) => {
                        let existing_line = blocks[existing_idx]
                            .as_ref()
                            .expect("seen index always points at a populated slot")
                            .location
                            .line_start;
                        if block.location.line_start < existing_line {
                            blocks[existing_idx] = Some(block);
                        }
                        continue;
                    }
                    None => {
                        seen.insert(key, idx);
                    }
                }
            }
            blocks.push(Some(block));
        }

        blocks.into_iter().flatten().collect()
    }
}
