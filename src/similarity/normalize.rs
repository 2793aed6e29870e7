//! Normalization pipeline (spec §4.10.1) and the small extraction helpers
//! the Layer-2 sub-checks depend on (comparison operators, HTTP status
//! codes, method chains). Mirrors `block_extractor::content_hash`'s
//! whitespace-only pass but goes further: comments stripped, literals
//! replaced, a semantic-operator whitelist preserved, and remaining
//! identifiers bucketed into `var`/`CONST`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Preserved identifiers (spec §4.10.1 step 4) — math/string/HTTP-response
/// ops, array/object/async methods, and global objects. Kept verbatim
/// rather than folded into `var`/`CONST` because they carry semantic
/// weight the Levenshtein comparison should see.
static WHITELIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "max", "min", "abs", "floor", "ceil", "round", "trim", "toLowerCase", "toUpperCase", "replace", "status",
        "json", "send", "redirect", "map", "filter", "reduce", "forEach", "find", "some", "every", "slice", "splice",
        "push", "pop", "shift", "unshift", "join", "split", "includes", "indexOf", "get", "set", "has", "delete",
        "keys", "values", "entries", "then", "catch", "finally", "async", "await", "reverse", "sort", "concat",
        "Math", "Object", "Array", "String", "Number", "Boolean", "console", "process", "JSON", "Date", "Promise",
    ]
    .into_iter()
    .collect()
});

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"//[^\n]*").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|`(?:[^`\\]|\\.)*`"#).unwrap());
static NUMERIC_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap());
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").unwrap());
static OPERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"===|!==|==|!=|<=|>=|&&|\|\||=>|[-+*/%<>=!&|^~?:]").unwrap());

/// `res.status(N)` / `response.status(N)` — HTTP status detector (spec
/// §4.10.3). Applied to the *raw* source, before literal normalization,
/// per the Open Question resolution in §9.
static HTTP_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:res(?:ponse)?)\s*\.\s*status\s*\(\s*(\d{3})\s*\)").unwrap());

/// The ordered chain of `.method(...)` calls on the longest receiver chain
/// found in the source (spec §4.10.3 "method-chain detector").
static METHOD_CHAIN_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([A-Za-z_$][A-Za-z0-9_$]*)\s*\(").unwrap());

const RESERVED_PLACEHOLDER_PREFIX: &str = "\u{0}WL";

/// Reserved tokens the normalized form may already contain; `var`/`CONST`
/// classification must not re-bucket them (keeps `normalize` idempotent).
const RESERVED_TOKENS: [&str; 3] = ["var", "CONST", "NUM"];

fn strip_comments(code: &str) -> String {
    let no_block = BLOCK_COMMENT.replace_all(code, "");
    LINE_COMMENT.replace_all(&no_block, "").into_owned()
}

fn collapse_whitespace(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replaces string and numeric literals with placeholder tokens.
fn replace_literals(code: &str) -> String {
    let no_strings = STRING_LITERAL.replace_all(code, "'STR'");
    NUMERIC_LITERAL.replace_all(&no_strings, "NUM").into_owned()
}

/// Protects whitelisted identifiers behind a reserved placeholder so the
/// later `var`/`CONST` pass cannot touch them, then restores them.
fn protect_whitelist(code: &str) -> (String, Vec<&'static str>) {
    let mut restored = Vec::new();
    let replaced = IDENTIFIER.replace_all(code, |caps: &regex::Captures| {
        let word = &caps[0];
        if let Some(&canonical) = WHITELIST.get(word) {
            restored.push(canonical);
            format!("{RESERVED_PLACEHOLDER_PREFIX}{}\u{0}", restored.len() - 1)
        } else {
            word.to_string()
        }
    });
    (replaced.into_owned(), restored)
}

fn restore_whitelist(code: &str, restored: &[&'static str]) -> String {
    let mut out = code.to_string();
    for (idx, word) in restored.iter().enumerate() {
        out = out.replace(&format!("{RESERVED_PLACEHOLDER_PREFIX}{idx}\u{0}"), word);
    }
    out
}

/// True for the `WL{idx}` shape `protect_whitelist` leaves behind once the
/// `IDENTIFIER` regex has matched past its non-identifier `\u{0}`
/// delimiters (the delimiters are never part of the match, so this checks
/// the undelimited `WL{idx}` text actually seen here, not
/// `RESERVED_PLACEHOLDER_PREFIX`).
fn is_whitelist_placeholder(word: &str) -> bool {
    word.strip_prefix("WL")
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn classify_remaining_identifiers(code: &str) -> String {
    IDENTIFIER
        .replace_all(code, |caps: &regex::Captures| {
            let word = &caps[0];
            if RESERVED_TOKENS.contains(&word) || is_whitelist_placeholder(word) {
                word.to_string()
            } else if word.chars().any(|c| c.is_lowercase()) {
                "var".to_string()
            } else {
                "CONST".to_string()
            }
        })
        .into_owned()
}

fn space_separate_operators(code: &str) -> String {
    let spaced = OPERATOR.replace_all(code, " $0 ");
    collapse_whitespace(&spaced)
}

/// `normalize(code) -> string` (spec §4.10.1). Idempotent: every
/// substitution target (`var`, `CONST`, `NUM`, `'STR'`, whitelisted
/// identifiers, space-separated operators) is already in its final form
/// on a second pass, so `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(code: &str) -> String {
    let stripped = strip_comments(code);
    let literals_replaced = replace_literals(&stripped);
    let (protected, restored) = protect_whitelist(&literals_replaced);
    let classified = classify_remaining_identifiers(&protected);
    let restored_code = restore_whitelist(&classified, &restored);
    space_separate_operators(&collapse_whitespace(&restored_code))
}

/// Comparison/negation operator set used by the opposite-logic detector
/// (spec §4.10.3). Extracted from raw source, not the normalized form,
/// since normalization space-separates operators but does not remove any.
pub fn comparison_operators(code: &str) -> HashSet<&'static str> {
    let mut set = HashSet::new();
    if code.contains("===") {
        set.insert("===");
    }
    if code.contains("!==") {
        set.insert("!==");
    }
    // Avoid double-counting `==`/`!=` substrings inside `===`/`!==`.
    let without_strict = code.replace("===", "").replace("!==", "");
    if without_strict.contains("==") {
        set.insert("==");
    }
    if without_strict.contains("!=") {
        set.insert("!=");
    }
    if has_standalone_negation(code) {
        set.insert("!");
    }
    set
}

fn has_standalone_negation(code: &str) -> bool {
    let bytes = code.as_bytes();
    for (idx, &b) in bytes.iter().enumerate() {
        if b != b'!' {
            continue;
        }
        let next_is_eq = bytes.get(idx + 1) == Some(&b'=');
        let prev_is_bang_or_eq = idx > 0 && (bytes[idx - 1] == b'!' || bytes[idx - 1] == b'=');
        if !next_is_eq && !prev_is_bang_or_eq {
            return true;
        }
    }
    false
}

/// True if one side uses `===`/`==`/standalone-`!` where the other uses
/// its negated counterpart (spec §4.10.3).
pub fn has_opposite_logic(a: &str, b: &str) -> bool {
    let ops_a = comparison_operators(a);
    let ops_b = comparison_operators(b);
    let pairs: [(&str, &str); 2] = [("===", "!=="), ("==", "!=")];
    for (pos, neg) in pairs {
        if (ops_a.contains(pos) && ops_b.contains(neg)) || (ops_a.contains(neg) && ops_b.contains(pos)) {
            return true;
        }
    }
    ops_a.contains("!") != ops_b.contains("!")
}

/// Extracts the raw `{===,!==,==,!=,!}` tokens and rewrites each side to a
/// common neutral form so "otherwise identical" (spec §4.10.3) can be
/// tested with a plain string comparison on the normalized forms.
pub fn neutralize_comparisons(normalized: &str) -> String {
    normalized
        .replace("!==", "CMP")
        .replace("===", "CMP")
        .replace("!=", "CMP")
        .replace("==", "CMP")
        .replace('!', "")
}

/// HTTP status codes appearing in `res.status(N)` / `response.status(N)`
/// (spec §4.10.3), extracted from raw source *before* literal
/// normalization replaces the `N` with `NUM` (spec §9 open-question
/// resolution).
pub fn extract_http_status_codes(code: &str) -> HashSet<u16> {
    HTTP_STATUS
        .captures_iter(code)
        .filter_map(|c| c[1].parse::<u16>().ok())
        .collect()
}

/// The longest `.method(...)` call chain found in the source (spec
/// §4.10.3). Consecutive `.name(` matches are treated as one chain;
/// non-adjacent ones reset it. "Longest" picks the chain with the most
/// calls when several appear in the same block.
pub fn extract_method_chain(code: &str) -> Vec<String> {
    let mut chains: Vec<Vec<String>> = vec![Vec::new()];
    let mut last_end = None;

    for caps in METHOD_CHAIN_CALL.captures_iter(code) {
        let whole = caps.get(0).unwrap();
        let name = caps[1].to_string();
        let contiguous = last_end.map(|end| {
            code[end..whole.start()]
                .chars()
                .all(|c| c == ')' || c.is_whitespace())
        });
        if contiguous == Some(true) {
            chains.last_mut().unwrap().push(name);
        } else {
            chains.push(vec![name]);
        }
        last_end = Some(whole.end());
    }

    chains.into_iter().max_by_key(|c| c.len()).unwrap_or_default()
}

/// Chain-similarity per spec §4.10.3: identical -> 1.0; exactly one empty
/// -> 0.5; strict-prefix -> `len(shorter)/len(longer)`; same length,
/// differing members -> fraction of matching positions; else -> 0.0.
pub fn chain_similarity(a: &[String], b: &[String]) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() != b.is_empty() {
        return 0.5;
    }
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if longer.starts_with(shorter.as_slice()) {
        return shorter.len() as f64 / longer.len() as f64;
    }
    if a.len() == b.len() {
        let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
        return matches as f64 / a.len() as f64;
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_literals() {
        let a = normalize("JSON.stringify(data, null, 2)");
        let b = normalize("JSON.stringify(data,null,2)");
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("if(!user){return res.status(401).send('Unauthorized');}");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_preserves_whitelisted_methods() {
        let n = normalize("users.filter(u=>u.active).map(u=>u.name)");
        assert!(n.contains("filter"));
        assert!(n.contains("map"));
    }

    #[test]
    fn normalize_buckets_plain_identifiers_as_var() {
        let n = normalize("const total = price + tax;");
        assert!(n.contains("var"));
    }

    #[test]
    fn opposite_logic_detects_strict_equality_flip() {
        assert!(has_opposite_logic(
            "return process.env.NODE_ENV === 'production';",
            "return process.env.NODE_ENV !== 'production';"
        ));
        assert!(!has_opposite_logic(
            "return process.env.NODE_ENV === 'production';",
            "return process.env.NODE_ENV === 'staging';"
        ));
    }

    #[test]
    fn neutralize_comparisons_equates_flipped_operators() {
        let a = neutralize_comparisons(&normalize("return x === y;"));
        let b = neutralize_comparisons(&normalize("return x !== y;"));
        assert_eq!(a, b);
    }

    #[test]
    fn extract_http_status_reads_raw_source() {
        let codes = extract_http_status_codes("res.status(200).json({ok:true});");
        assert!(codes.contains(&200));
    }

    #[test]
    fn method_chain_extends_with_reverse() {
        let a = extract_method_chain("users.filter(u=>u.active).map(u=>u.name);");
        let b = extract_method_chain("users.filter(u=>u.active).map(u=>u.name).reverse();");
        assert_eq!(a, vec!["filter", "map"]);
        assert_eq!(b, vec!["filter", "map", "reverse"]);
        assert!((chain_similarity(&a, &b) - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn chain_similarity_identical_is_one() {
        let a = vec!["filter".to_string(), "map".to_string()];
        assert_eq!(chain_similarity(&a, &a), 1.0);
    }
}
