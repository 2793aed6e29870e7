//! Config Registry (spec §4.2, component C2).
//!
//! Owns the `RegistryDocument` in memory behind a single-writer lock,
//! matching the daemon's "mutations serialized under a single writer,
//! readers see a consistent snapshot" shape used for its SQLite pool
//! (`db/core.rs`) generalized here to an in-memory document with an
//! atomic write-temp-then-rename persistence step (spec §6 "Persisted
//! state").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::model::{Priority, RegistryDocument, Repository, RepositoryGroup, ScanFrequency, ScanHistoryEntry};
use crate::error::{ConfigError, RegistryError};

/// Typed, validated, mutable registry of repositories and groups.
///
/// Readers take a read lock and see a consistent snapshot; every mutation
/// (`update_last_scanned`, `append_history`, `reload`) takes the write lock
/// for the duration of the change and then persists atomically.
pub struct ConfigRegistry {
    path: PathBuf,
    document: RwLock<RegistryDocument>,
}

impl ConfigRegistry {
    /// Load and validate `path`. An invalid document is never partially
    /// applied (spec §4.2): validation runs before the document is stored.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut document = Self::read_document(&path)?;
        document.expand_paths();
        document.validate()?;

        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    fn read_document(path: &Path) -> Result<RegistryDocument, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let document: RegistryDocument = serde_json::from_str(&raw)?;
        Ok(document)
    }

    /// Re-read and re-validate the document from disk, replacing the
    /// in-memory snapshot only if the new document is valid.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let mut fresh = Self::read_document(&self.path)?;
        fresh.expand_paths();
        fresh.validate()?;
        *self.document.write().await = fresh;
        info!(path = %self.path.display(), "config registry reloaded");
        Ok(())
    }

    /// All enabled repositories (spec §4.2 `getEnabled`).
    pub async fn get_enabled(&self) -> Vec<Repository> {
        self.document
            .read()
            .await
            .repositories
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect()
    }

    /// Repositories at a given priority (spec §4.2 `getByPriority`).
    pub async fn get_by_priority(&self, priority: Priority) -> Vec<Repository> {
        self.document
            .read()
            .await
            .repositories
            .iter()
            .filter(|r| r.priority == priority)
            .cloned()
            .collect()
    }

    /// Repositories at a given cadence (spec §4.2 `getByFrequency`).
    pub async fn get_by_frequency(&self, frequency: ScanFrequency) -> Vec<Repository> {
        self.document
            .read()
            .await
            .repositories
            .iter()
            .filter(|r| r.scan_frequency == frequency)
            .cloned()
            .collect()
    }

    /// Repositories carrying a given tag (spec §4.2 `getByTag`).
    pub async fn get_by_tag(&self, tag: &str) -> Vec<Repository> {
        self.document
            .read()
            .await
            .repositories
            .iter()
            .filter(|r| r.has_tag(tag))
            .cloned()
            .collect()
    }

    pub async fn get_repository(&self, name: &str) -> Result<Repository, RegistryError> {
        self.document
            .read()
            .await
            .repositories
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| RegistryError::RepositoryNotFound(name.to_string()))
    }

    pub async fn get_group(&self, name: &str) -> Result<RepositoryGroup, RegistryError> {
        self.document
            .read()
            .await
            .repository_groups
            .iter()
            .find(|g| g.name == name)
            .cloned()
            .ok_or_else(|| RegistryError::GroupNotFound(name.to_string()))
    }

    pub async fn all_repositories(&self) -> Vec<Repository> {
        self.document.read().await.repositories.clone()
    }

    pub async fn all_groups(&self) -> Vec<RepositoryGroup> {
        self.document.read().await.repository_groups.clone()
    }

    pub async fn scan_config(&self) -> crate::config::model::ScanConfig {
        self.document.read().await.scan_config.clone()
    }

    pub async fn cache_config(&self) -> crate::config::model::CacheConfig {
        self.document.read().await.cache_config.clone()
    }

    /// Record the timestamp of the most recent scan for `name` (spec §4.2
    /// `updateLastScanned`).
    pub async fn update_last_scanned(
        &self,
        name: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), RegistryError> {
        {
            let mut doc = self.document.write().await;
            let repo = doc
                .repositories
                .iter_mut()
                .find(|r| r.name == name)
                .ok_or_else(|| RegistryError::RepositoryNotFound(name.to_string()))?;
            repo.last_scanned_at = Some(at);
        }
        self.persist().await;
        Ok(())
    }

    /// Append to the trailing scan history ring buffer (spec §4.2
    /// `appendHistory`).
    pub async fn append_history(
        &self,
        name: &str,
        entry: ScanHistoryEntry,
    ) -> Result<(), RegistryError> {
        {
            let mut doc = self.document.write().await;
            let repo = doc
                .repositories
                .iter_mut()
                .find(|r| r.name == name)
                .ok_or_else(|| RegistryError::RepositoryNotFound(name.to_string()))?;
            repo.push_history(entry);
        }
        self.persist().await;
        Ok(())
    }

    /// Write-temp-then-rename so a crash mid-write never leaves a
    /// truncated document on disk (spec §6 "Persisted state").
    async fn persist(&self) {
        let doc = self.document.read().await.clone();
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let serialized = serde_json::to_vec_pretty(&doc).expect("registry document always serializes");
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, serialized)?;
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to persist registry document"),
            Err(e) => warn!(error = %e, "registry persist task panicked"),
        }
    }
}

pub type SharedRegistry = Arc<ConfigRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{CacheConfig, ScanConfig};
    use std::path::PathBuf;

    fn write_fixture(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("repositories.json");
        let doc = RegistryDocument {
            scan_config: ScanConfig {
                enabled: true,
                schedule: "0 2 * * *".into(),
                max_repositories_per_night: 5,
                max_concurrent_scans: 2,
                scan_timeout: 600,
                retry_attempts: 3,
                retry_delay_ms: 500,
                run_on_startup: false,
            },
            cache_config: CacheConfig::default(),
            repositories: vec![Repository {
                name: "svc-a".into(),
                path: dir.path().to_path_buf(),
                priority: Priority::High,
                scan_frequency: ScanFrequency::Daily,
                enabled: true,
                tags: vec!["backend".into()],
                exclude_patterns: vec![],
                last_scanned_at: None,
                scan_history: vec![],
            }],
            repository_groups: vec![],
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn loads_and_queries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_fixture(&dir);
        let registry = ConfigRegistry::load(path).await.unwrap();

        assert_eq!(registry.get_enabled().await.len(), 1);
        assert_eq!(registry.get_by_priority(Priority::High).await.len(), 1);
        assert_eq!(registry.get_by_tag("backend").await.len(), 1);
        assert_eq!(registry.get_by_tag("frontend").await.len(), 0);
    }

    #[tokio::test]
    async fn update_last_scanned_persists_and_reloads() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_fixture(&dir);
        let registry = ConfigRegistry::load(path).await.unwrap();

        let now = chrono::Utc::now();
        registry.update_last_scanned("svc-a", now).await.unwrap();

        let repo = registry.get_repository("svc-a").await.unwrap();
        assert_eq!(repo.last_scanned_at, Some(now));

        registry.reload().await.unwrap();
        let repo = registry.get_repository("svc-a").await.unwrap();
        assert_eq!(repo.last_scanned_at, Some(now));
    }

    #[tokio::test]
    async fn unknown_repository_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_fixture(&dir);
        let registry = ConfigRegistry::load(path).await.unwrap();
        let err = registry
            .update_last_scanned("ghost", chrono::Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RepositoryNotFound(_)));
    }

    #[tokio::test]
    async fn invalid_document_fails_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("repositories.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(ConfigRegistry::load(path).await.is_err());
    }
}
