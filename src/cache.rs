//! Scan Cache (spec §4.7, component C7).
//!
//! Multi-tier KV store adapted from the daemon's `CacheLayer` in
//! `cache_layer.rs`: an in-memory LRU tier plus an optional Redis tier via
//! `deadpool-redis`, a background expiry sweep, and `CacheStats`. Narrowed
//! here from a generic typed cache to the spec's single `ScanResult`
//! document keyed by `(repositoryPath, commitHash)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::CacheConfig as RegistryCacheConfig;
use crate::error::CacheError;
use crate::types::ScanResult;

/// Backend connection settings the `repositories.json` schema deliberately
/// omits (spec §6 lists only `enabled`/`ttlSeconds`/`invalidateOnChange`/
/// `trackGitCommits`/`trackUncommittedChanges`). Pulled from the
/// environment the same way the daemon's own cache config picks up
/// `REDIS_URL` (spec SPEC_FULL §10.3).
#[derive(Debug, Clone)]
pub struct CacheBackendConfig {
    pub max_memory_items: usize,
    pub enable_redis: bool,
    pub redis_url: Option<String>,
    pub redis_prefix: String,
}

impl CacheBackendConfig {
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL").ok();
        Self {
            max_memory_items: std::env::var("CACHE_MAX_MEMORY_ITEMS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            enable_redis: redis_url.is_some(),
            redis_url,
            redis_prefix: std::env::var("CACHE_REDIS_PREFIX").unwrap_or_else(|_| "duplisweep:".to_string()),
        }
    }
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        Self {
            max_memory_items: 1000,
            enable_redis: false,
            redis_url: None,
            redis_prefix: "duplisweep:".to_string(),
        }
    }
}

/// Stored record: the result plus bookkeeping needed for invalidation and
/// `listRecent` (spec §3 CacheEntry, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub repository_path: String,
    pub commit_hash: String,
    pub stored_at: chrono::DateTime<chrono::Utc>,
    pub ttl_seconds: u64,
    pub result: ScanResult,
}

impl CacheEntry {
    fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age.num_seconds() as u64 > self.ttl_seconds
    }
}

/// `sha256(canonicalRepoPath) || commitHash` (spec §4.7).
pub fn cache_key(repository_path: &str, commit_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository_path.as_bytes());
    let path_hash = hex::encode(hasher.finalize());
    format!("{path_hash}{commit_hash}")
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
}

struct InMemoryStore {
    entries: HashMap<String, CacheEntry>,
    /// repositoryPath -> set of keys, so `invalidate(repoPath)` can drop
    /// every stored commit for that path without a full scan.
    by_repo: HashMap<String, Vec<String>>,
}

/// Pluggable scan-result cache (spec §4.7). An in-process map backs tests
/// and single-node deployments; a Redis tier is layered on top when
/// configured, mirroring `CacheLayer`'s "memory first, Redis as a distributed
/// second tier" shape.
pub struct ScanCache {
    config: RegistryCacheConfig,
    backend: CacheBackendConfig,
    memory: Arc<RwLock<InMemoryStore>>,
    redis_pool: Option<deadpool_redis::Pool>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
}

impl ScanCache {
    pub fn new(config: RegistryCacheConfig, backend: CacheBackendConfig) -> Result<Arc<Self>, CacheError> {
        let redis_pool = if backend.enable_redis {
            match &backend.redis_url {
                Some(url) => {
                    let redis_cfg = deadpool_redis::Config::from_url(url);
                    let pool = redis_cfg
                        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                        .map_err(|e| CacheError::Backend(e.to_string()))?;
                    Some(pool)
                }
                None => None,
            }
        } else {
            None
        };

        let cache = Arc::new(Self {
            config,
            backend,
            memory: Arc::new(RwLock::new(InMemoryStore {
                entries: HashMap::new(),
                by_repo: HashMap::new(),
            })),
            redis_pool,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        });
        cache.clone().spawn_cleanup_task();
        Ok(cache)
    }

    fn spawn_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                self.sweep_expired().await;
            }
        });
    }

    async fn sweep_expired(&self) {
        let now = chrono::Utc::now();
        let mut store = self.memory.write().await;
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(entry) = store.entries.remove(&key) {
                if let Some(keys) = store.by_repo.get_mut(&entry.repository_path) {
                    keys.retain(|k| k != &key);
                }
            }
        }
    }

    /// `get(repoPath, commitHash)` (spec §4.7): returns the result iff the
    /// stored commit equals the queried commit and the entry has not
    /// expired.
    pub async fn get(&self, repository_path: &str, commit_hash: &str) -> Result<Option<ScanResult>, CacheError> {
        let key = cache_key(repository_path, commit_hash);

        if let Some(entry) = self.get_memory(&key).await {
            if entry.commit_hash == commit_hash && !entry.is_expired(chrono::Utc::now()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.result));
            }
        }

        if let Some(entry) = self.get_redis(&key).await? {
            if entry.commit_hash == commit_hash && !entry.is_expired(chrono::Utc::now()) {
                self.put_memory(entry.clone()).await;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.result));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn get_memory(&self, key: &str) -> Option<CacheEntry> {
        self.memory.read().await.entries.get(key).cloned()
    }

    async fn get_redis(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(pool) = &self.redis_pool else {
            return Ok(None);
        };
        let mut conn = match pool.get().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "redis pool unavailable, treating as miss");
                return Ok(None);
            }
        };
        let raw: Option<String> = conn
            .get(format!("{}{}", self.backend.redis_prefix, key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_memory(&self, entry: CacheEntry) {
        let mut store = self.memory.write().await;
        if store.entries.len() >= self.backend.max_memory_items && !store.entries.contains_key(&entry.key) {
            if let Some(oldest_key) = store.entries.keys().next().cloned() {
                if let Some(old) = store.entries.remove(&oldest_key) {
                    if let Some(keys) = store.by_repo.get_mut(&old.repository_path) {
                        keys.retain(|k| k != &oldest_key);
                    }
                }
            }
        }
        store
            .by_repo
            .entry(entry.repository_path.clone())
            .or_default()
            .push(entry.key.clone());
        store.entries.insert(entry.key.clone(), entry);
    }

    /// `put(repoPath, commitHash, result)` (spec §4.7).
    pub async fn put(&self, repository_path: &str, commit_hash: &str, result: ScanResult) -> Result<(), CacheError> {
        let key = cache_key(repository_path, commit_hash);
        let entry = CacheEntry {
            key: key.clone(),
            repository_path: repository_path.to_string(),
            commit_hash: commit_hash.to_string(),
            stored_at: chrono::Utc::now(),
            ttl_seconds: self.config.ttl_seconds,
            result,
        };

        self.put_memory(entry.clone()).await;

        if let Some(pool) = &self.redis_pool {
            if let Ok(mut conn) = pool.get().await {
                let serialized = serde_json::to_string(&entry)?;
                let redis_key = format!("{}{}", self.backend.redis_prefix, key);
                let _: Result<(), _> = conn
                    .set_ex(redis_key, serialized, entry.ttl_seconds.max(1))
                    .await;
            }
        }

        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drop all stored commits for `repository_path` (spec §4.7
    /// `invalidate(repoPath)`).
    pub async fn invalidate(&self, repository_path: &str) {
        let mut store = self.memory.write().await;
        if let Some(keys) = store.by_repo.remove(repository_path) {
            let count = keys.len();
            for key in keys {
                store.entries.remove(&key);
            }
            self.invalidations.fetch_add(count as u64, Ordering::Relaxed);
            debug!(repository_path, count, "invalidated cache entries");
        }
    }

    /// The `cacheConfig` this cache was constructed with (spec §4.2),
    /// exposed so callers can apply policy (e.g. the `trackUncommittedChanges`
    /// dirty-worktree bypass in spec §4.7) without duplicating it here.
    pub fn config(&self) -> &RegistryCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobKind;
    use crate::types::ScanMetrics;

    fn sample_result(scan_id: &str) -> ScanResult {
        ScanResult {
            scan_id: scan_id.to_string(),
            kind: JobKind::Intra,
            started_at: chrono::Utc::now(),
            duration_seconds: 1.0,
            repositories: vec!["svc-a".into()],
            code_block_ids: vec![],
            group_ids: vec![],
            suggestion_ids: vec![],
            metrics: ScanMetrics {
                total_blocks: 0,
                total_groups: 0,
                exact_duplicates: 0,
                total_suggestions: 0,
                quick_wins: 0,
                duplication_percent: 0.0,
            },
            from_cache: false,
            executive_summary: String::new(),
        }
    }

    fn config() -> RegistryCacheConfig {
        RegistryCacheConfig {
            enabled: true,
            ttl_seconds: 30 * 24 * 60 * 60,
            invalidate_on_change: true,
            track_git_commits: true,
            track_uncommitted_changes: true,
        }
    }

    #[tokio::test]
    async fn miss_then_hit_on_same_commit() {
        let cache = ScanCache::new(config(), CacheBackendConfig::default()).unwrap();
        assert!(cache.get("/repo/a", "c1").await.unwrap().is_none());

        cache.put("/repo/a", "c1", sample_result("scan-1")).await.unwrap();
        let hit = cache.get("/repo/a", "c1").await.unwrap();
        assert_eq!(hit.unwrap().scan_id, "scan-1");
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn different_commit_is_a_miss() {
        let cache = ScanCache::new(config(), CacheBackendConfig::default()).unwrap();
        cache.put("/repo/a", "c1", sample_result("scan-1")).await.unwrap();
        assert!(cache.get("/repo/a", "c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_all_commits_for_path() {
        let cache = ScanCache::new(config(), CacheBackendConfig::default()).unwrap();
        cache.put("/repo/a", "c1", sample_result("scan-1")).await.unwrap();
        cache.invalidate("/repo/a").await;
        assert!(cache.get("/repo/a", "c1").await.unwrap().is_none());
    }

    #[test]
    fn cache_key_is_path_and_commit_scoped() {
        let k1 = cache_key("/repo/a", "c1");
        let k2 = cache_key("/repo/a", "c2");
        let k3 = cache_key("/repo/b", "c1");
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }
}
