//! Pattern Gateway (spec §4.8, component C8).
//!
//! Invokes the external AST pattern matcher as a subprocess via
//! `tokio::process::Command` — the same non-shell-interpolated spawn
//! discipline `git_tracker.rs` uses for git (spec §9 "never use shell
//! interpolation on repository paths"). Applies a hard timeout and a
//! bounded output buffer; truncation is a soft failure (spec §4.8). If the
//! matcher binary is missing, degrades to an empty match set rather than
//! failing the scan (spec §7 "Absence of binary -> non-retryable fallback
//! to empty matches").

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

use crate::error::PatternGatewayError;
use crate::types::PatternMatch;

#[derive(Debug, Clone)]
pub struct PatternGatewayConfig {
    pub matcher_bin: PathBuf,
    pub rules_dir: PathBuf,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl PatternGatewayConfig {
    pub fn from_env() -> Self {
        Self {
            matcher_bin: std::env::var("AST_MATCHER_BIN")
                .unwrap_or_else(|_| "ast-matcher".to_string())
                .into(),
            rules_dir: std::env::var("AST_MATCHER_RULES_DIR")
                .unwrap_or_else(|_| "rules".to_string())
                .into(),
            timeout: Duration::from_secs(
                std::env::var("AST_MATCHER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            ),
            max_output_bytes: std::env::var("AST_MATCHER_MAX_OUTPUT_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(32 * 1024 * 1024),
        }
    }
}

/// Normalized output of one invocation (spec §4.8).
#[derive(Debug, Clone)]
pub struct GatewayOutput {
    pub matches: Vec<PatternMatch>,
    pub truncated: bool,
}

pub struct PatternGateway {
    config: PatternGatewayConfig,
}

impl PatternGateway {
    pub fn new(config: PatternGatewayConfig) -> Self {
        Self { config }
    }

    /// `scan --json --rules <rulesDir> <repoPath>` (spec §6). Missing
    /// binary degrades to an empty match set with a warning, matching the
    /// "pipeline degrades gracefully to zero blocks" contract.
    pub async fn invoke(&self, repo_path: &Path) -> Result<GatewayOutput, PatternGatewayError> {
        let spawned = Command::new(&self.config.matcher_bin)
            .arg("scan")
            .arg("--json")
            .arg("--rules")
            .arg(&self.config.rules_dir)
            .arg(repo_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    matcher = %self.config.matcher_bin.display(),
                    "pattern matcher binary not found, falling back to empty match set"
                );
                return Ok(GatewayOutput {
                    matches: Vec::new(),
                    truncated: false,
                });
            }
            Err(e) => return Err(PatternGatewayError::Spawn(e)),
        };

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let cap = self.config.max_output_bytes as u64 + 1;
        let mut buf = Vec::with_capacity(self.config.max_output_bytes.min(1 << 20));

        let read = tokio::time::timeout(self.config.timeout, (&mut stdout).take(cap).read_to_end(&mut buf)).await;
        match read {
            Err(_) => {
                let _ = child.kill().await;
                return Err(PatternGatewayError::Timeout(self.config.timeout));
            }
            Ok(Err(e)) => return Err(PatternGatewayError::Spawn(e)),
            Ok(Ok(_)) => {}
        }

        let status = tokio::time::timeout(self.config.timeout, child.wait())
            .await
            .map_err(|_| PatternGatewayError::Timeout(self.config.timeout))?
            .map_err(PatternGatewayError::Spawn)?;

        let truncated = buf.len() > self.config.max_output_bytes;
        if truncated {
            buf.truncate(self.config.max_output_bytes);
        }

        if !status.success() && buf.is_empty() {
            let mut stderr_buf = Vec::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_end(&mut stderr_buf).await;
            }
            return Err(PatternGatewayError::NonZeroExit {
                status: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
            });
        }

        let matches = Self::parse_matches(&buf, truncated)?;
        Ok(GatewayOutput { matches, truncated })
    }

    /// Parses the matcher's stdout as a JSON array. A truncated buffer is
    /// salvaged by trimming back to the last complete element rather than
    /// failing the whole scan (spec §4.8 "returns partial results").
    fn parse_matches(buf: &[u8], truncated: bool) -> Result<Vec<PatternMatch>, PatternGatewayError> {
        let text = String::from_utf8_lossy(buf);
        match serde_json::from_str::<Vec<PatternMatch>>(&text) {
            Ok(matches) => Ok(matches),
            Err(e) if truncated => match text.rfind('}') {
                Some(idx) => {
                    let salvaged = format!("{}]", &text[..=idx]);
                    serde_json::from_str(&salvaged).map_err(|_| PatternGatewayError::InvalidOutput(e))
                }
                None => Err(PatternGatewayError::InvalidOutput(e)),
            },
            Err(e) => Err(PatternGatewayError::InvalidOutput(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PatternGatewayConfig {
        PatternGatewayConfig {
            matcher_bin: "definitely-not-installed-ast-matcher".into(),
            rules_dir: "rules".into(),
            timeout: Duration::from_secs(5),
            max_output_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn missing_binary_degrades_to_empty_matches() {
        let gateway = PatternGateway::new(config());
        let out = gateway.invoke(Path::new(".")).await.unwrap();
        assert!(out.matches.is_empty());
        assert!(!out.truncated);
    }

    #[test]
    fn parse_matches_rejects_malformed_output_when_not_truncated() {
        let err = PatternGateway::parse_matches(b"not json", false).unwrap_err();
        assert!(matches!(err, PatternGatewayError::InvalidOutput(_)));
    }

    #[test]
    fn parse_matches_salvages_truncated_array() {
        let complete = serde_json::json!([{
            "ruleId": "r1",
            "filePath": "a.js",
            "lineStart": 1,
            "lineEnd": 2,
            "matchedText": "x",
        }]);
        let mut text = serde_json::to_string(&complete).unwrap();
        text.pop(); // drop the trailing ']'
        text.push_str(r#",{"ruleId":"r2","filePath":"#); // dangling partial element
        let matches = PatternGateway::parse_matches(text.as_bytes(), true).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id, "r1");
    }
}
