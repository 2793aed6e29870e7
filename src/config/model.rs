//! Typed config document model (spec §3, §4.2, §6).
//!
//! Parsed once at the trust boundary (spec §9 "Dynamic JSON <-> typed
//! models") — nothing downstream of `RegistryDocument::load` touches an
//! untyped `serde_json::Value`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, ValidationIssue};

/// How urgently a repository should be prioritized by the Selector (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Ordinal used for "critical > high > medium > low" sort (spec §4.3).
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Medium => 1,
            Priority::Low => 0,
        }
    }
}

/// Nightly cadence for a repository (spec §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanFrequency {
    Daily,
    Weekly,
    Monthly,
    OnDemand,
}

/// A single trailing scan-history entry (spec §3, ring buffer length 10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanHistoryEntry {
    pub scan_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_seconds: f64,
    pub groups_found: usize,
    pub from_cache: bool,
}

/// A single scannable repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub path: PathBuf,
    pub priority: Priority,
    pub scan_frequency: ScanFrequency,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub last_scanned_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub scan_history: Vec<ScanHistoryEntry>,
}

const MAX_SCAN_HISTORY: usize = 10;

impl Repository {
    /// Append to the trailing scan-history ring buffer (spec §4.2).
    pub fn push_history(&mut self, entry: ScanHistoryEntry) {
        self.scan_history.push(entry);
        if self.scan_history.len() > MAX_SCAN_HISTORY {
            let overflow = self.scan_history.len() - MAX_SCAN_HISTORY;
            self.scan_history.drain(0..overflow);
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

fn default_true() -> bool {
    true
}

/// Whether a repository-group scan compares files within one repo or
/// unions blocks across several (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Intra,
    Inter,
}

/// A named collection of repositories scanned together (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryGroup {
    pub name: String,
    pub repositories: Vec<String>,
    pub scan_type: ScanType,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Top-level `scanConfig` block (spec §4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: String,
    pub max_repositories_per_night: usize,
    pub max_concurrent_scans: usize,
    pub scan_timeout: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub run_on_startup: bool,
}

/// Top-level `cacheConfig` block (spec §4.2, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_true")]
    pub invalidate_on_change: bool,
    #[serde(default = "default_true")]
    pub track_git_commits: bool,
    #[serde(default)]
    pub track_uncommitted_changes: bool,
}

fn default_ttl_seconds() -> u64 {
    30 * 24 * 3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_ttl_seconds(),
            invalidate_on_change: true,
            track_git_commits: true,
            track_uncommitted_changes: false,
        }
    }
}

/// The full `repositories.json` document (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistryDocument {
    pub scan_config: ScanConfig,
    #[serde(default)]
    pub cache_config: CacheConfig,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub repository_groups: Vec<RepositoryGroup>,
}

impl RegistryDocument {
    /// Validate the document as a whole, collecting *every* offending
    /// field rather than stopping at the first (spec §4.2: "Validation
    /// fails with a typed error enumerating offending fields").
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if self.scan_config.max_repositories_per_night == 0 {
            issues.push(ValidationIssue {
                field: "scanConfig.maxRepositoriesPerNight".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.scan_config.max_concurrent_scans == 0 {
            issues.push(ValidationIssue {
                field: "scanConfig.maxConcurrentScans".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.scan_config.scan_timeout == 0 {
            issues.push(ValidationIssue {
                field: "scanConfig.scanTimeout".into(),
                message: "must be greater than zero".into(),
            });
        }
        if crate::scheduler::CronSchedule::parse(&self.scan_config.schedule).is_err() {
            issues.push(ValidationIssue {
                field: "scanConfig.schedule".into(),
                message: format!("not a valid cron expression: {}", self.scan_config.schedule),
            });
        }

        let mut seen_names = std::collections::HashSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                issues.push(ValidationIssue {
                    field: "repositories[].name".into(),
                    message: "name must not be empty".into(),
                });
                continue;
            }
            if !seen_names.insert(repo.name.clone()) {
                issues.push(ValidationIssue {
                    field: format!("repositories[{}].name", repo.name),
                    message: "duplicate repository name".into(),
                });
            }
        }

        let known_names: std::collections::HashSet<&str> =
            self.repositories.iter().map(|r| r.name.as_str()).collect();
        for group in &self.repository_groups {
            if group.repositories.len() < 2 && group.scan_type == ScanType::Inter {
                issues.push(ValidationIssue {
                    field: format!("repositoryGroups[{}].repositories", group.name),
                    message: "inter-project groups require at least two repositories".into(),
                });
            }
            for member in &group.repositories {
                if !known_names.contains(member.as_str()) {
                    issues.push(ValidationIssue {
                        field: format!("repositoryGroups[{}].repositories", group.name),
                        message: format!("references unknown repository '{member}'"),
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(issues))
        }
    }

    /// Expand `~` in every repository path to the invoking user's home
    /// directory (spec §4.2, §6). Performed once at load time so every
    /// downstream consumer sees a canonical absolute path.
    pub fn expand_paths(&mut self) {
        for repo in &mut self.repositories {
            let raw = repo.path.to_string_lossy();
            let expanded = shellexpand::tilde(&raw);
            repo.path = PathBuf::from(expanded.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(schedule: &str) -> RegistryDocument {
        RegistryDocument {
            scan_config: ScanConfig {
                enabled: true,
                schedule: schedule.to_string(),
                max_repositories_per_night: 5,
                max_concurrent_scans: 2,
                scan_timeout: 600,
                retry_attempts: 3,
                retry_delay_ms: 1000,
                run_on_startup: false,
            },
            cache_config: CacheConfig::default(),
            repositories: vec![],
            repository_groups: vec![],
        }
    }

    #[test]
    fn rejects_invalid_cron() {
        let d = doc("not a cron");
        let err = d.validate().unwrap_err();
        match err {
            ConfigError::Validation(issues) => {
                assert!(issues.iter().any(|i| i.field == "scanConfig.schedule"));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut d = doc("0 0 * * *");
        d.scan_config.max_concurrent_scans = 0;
        let err = d.validate().unwrap_err();
        match err {
            ConfigError::Validation(issues) => assert_eq!(issues.len(), 1),
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn rejects_duplicate_repository_names() {
        let mut d = doc("0 0 * * *");
        let repo = Repository {
            name: "svc-a".into(),
            path: PathBuf::from("/tmp/svc-a"),
            priority: Priority::Medium,
            scan_frequency: ScanFrequency::Daily,
            enabled: true,
            tags: vec![],
            exclude_patterns: vec![],
            last_scanned_at: None,
            scan_history: vec![],
        };
        d.repositories.push(repo.clone());
        d.repositories.push(repo);
        let err = d.validate().unwrap_err();
        match err {
            ConfigError::Validation(issues) => {
                assert!(issues.iter().any(|i| i.message.contains("duplicate")));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn rejects_dangling_group_reference() {
        let mut d = doc("0 0 * * *");
        d.repository_groups.push(RepositoryGroup {
            name: "g1".into(),
            repositories: vec!["ghost".into(), "ghost2".into()],
            scan_type: ScanType::Inter,
            enabled: true,
        });
        let err = d.validate().unwrap_err();
        match err {
            ConfigError::Validation(issues) => assert_eq!(issues.len(), 2),
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn expands_tilde_paths() {
        let mut d = doc("0 0 * * *");
        d.repositories.push(Repository {
            name: "a".into(),
            path: PathBuf::from("~/code/a"),
            priority: Priority::Low,
            scan_frequency: ScanFrequency::OnDemand,
            enabled: true,
            tags: vec![],
            exclude_patterns: vec![],
            last_scanned_at: None,
            scan_history: vec![],
        });
        d.expand_paths();
        assert!(!d.repositories[0].path.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn history_ring_buffer_caps_at_ten() {
        let mut repo = Repository {
            name: "a".into(),
            path: PathBuf::from("/tmp/a"),
            priority: Priority::Low,
            scan_frequency: ScanFrequency::Daily,
            enabled: true,
            tags: vec![],
            exclude_patterns: vec![],
            last_scanned_at: None,
            scan_history: vec![],
        };
        for i in 0..15 {
            repo.push_history(ScanHistoryEntry {
                scan_id: format!("scan-{i}"),
                started_at: chrono::Utc::now(),
                duration_seconds: 1.0,
                groups_found: 0,
                from_cache: false,
            });
        }
        assert_eq!(repo.scan_history.len(), MAX_SCAN_HISTORY);
        assert_eq!(repo.scan_history.first().unwrap().scan_id, "scan-5");
        assert_eq!(repo.scan_history.last().unwrap().scan_id, "scan-14");
    }
}
