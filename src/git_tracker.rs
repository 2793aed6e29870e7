//! Git Tracker (spec §4.6, component C6).
//!
//! Wraps the git CLI via `tokio::process::Command` (never shell
//! interpolation — spec §9), the async counterpart of the daemon's
//! `RepoManager` in `repo_manager.rs`, which drives the same commands
//! (`rev-parse HEAD`, `status --porcelain`, `rev-parse --abbrev-ref HEAD`)
//! synchronously via `std::process::Command`. Narrowed here to the six
//! read-only operations spec §4.6/§6 names; `RepoManager`'s clone/update
//! mutation responsibilities are out of scope for this engine.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::error::GitError;

/// Thin wrapper over the git CLI, scoped to one repository path per call
/// (no persistent handle needed — git itself is the source of truth).
#[derive(Debug, Clone, Default)]
pub struct GitTracker;

impl GitTracker {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, repo_path: &Path, args: &[&str]) -> Result<std::process::Output, GitError> {
        Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(GitError::Spawn)
    }

    fn is_not_a_repo(repo_path: &Path, stderr: &str) -> bool {
        !repo_path.join(".git").exists()
            || stderr.contains("not a git repository")
    }

    /// `getHeadCommit(path) -> hash | NotAGitRepository` (spec §4.6).
    pub async fn get_head_commit(&self, repo_path: &Path) -> Result<String, GitError> {
        if !repo_path.join(".git").exists() {
            return Err(GitError::NotAGitRepository(repo_path.to_path_buf()));
        }

        let output = self.run(repo_path, &["rev-parse", "HEAD"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if Self::is_not_a_repo(repo_path, &stderr) {
                return Err(GitError::NotAGitRepository(repo_path.to_path_buf()));
            }
            return Err(GitError::CommandFailed(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `hasChangedSince(path, oldHash) -> bool` (spec §4.6).
    pub async fn has_changed_since(&self, repo_path: &Path, old_hash: &str) -> Result<bool, GitError> {
        let current = self.get_head_commit(repo_path).await?;
        Ok(current != old_hash)
    }

    /// `hasUncommittedChanges(path) -> bool` (spec §4.6).
    pub async fn has_uncommitted_changes(&self, repo_path: &Path) -> Result<bool, GitError> {
        let output = self.run(repo_path, &["status", "--porcelain"]).await?;
        if !output.status.success() {
            return Err(GitError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(!output.stdout.is_empty())
    }

    /// `getBranchName` (spec §4.6).
    pub async fn get_branch_name(&self, repo_path: &Path) -> Result<String, GitError> {
        let output = self
            .run(repo_path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        if !output.status.success() {
            return Err(GitError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `getRemoteUrl` (spec §4.6).
    pub async fn get_remote_url(&self, repo_path: &Path) -> Result<Option<String>, GitError> {
        let output = self
            .run(repo_path, &["config", "--get", "remote.origin.url"])
            .await?;
        if !output.status.success() {
            debug!(path = %repo_path.display(), "no remote.origin.url configured");
            return Ok(None);
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if url.is_empty() { None } else { Some(url) })
    }

    /// `getCommitCount` (spec §4.6).
    pub async fn get_commit_count(&self, repo_path: &Path) -> Result<u64, GitError> {
        let output = self.run(repo_path, &["rev-list", "--count", "HEAD"]).await?;
        if !output.status.success() {
            return Err(GitError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| GitError::CommandFailed("non-numeric rev-list count".into()))
    }
}

/// Convenience bundle used by the orchestrator when it needs several facts
/// about a repository at once.
#[derive(Debug, Clone)]
pub struct RepoGitState {
    pub path: PathBuf,
    pub commit_hash: String,
    pub branch: String,
    pub has_uncommitted_changes: bool,
}

impl GitTracker {
    pub async fn resolve_state(&self, repo_path: &Path) -> Result<RepoGitState, GitError> {
        let commit_hash = self.get_head_commit(repo_path).await?;
        let has_uncommitted_changes = self.has_uncommitted_changes(repo_path).await?;
        let branch = self.get_branch_name(repo_path).await?;
        Ok(RepoGitState {
            path: repo_path.to_path_buf(),
            commit_hash,
            branch,
            has_uncommitted_changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command as TokioCommand;

    async fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let dir = dir.to_path_buf();
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            async move {
                TokioCommand::new("git")
                    .arg("-C")
                    .arg(&dir)
                    .args(&args)
                    .output()
                    .await
                    .unwrap()
            }
        };
        run(&["init", "-q"]).await;
        run(&["config", "user.email", "test@example.com"]).await;
        run(&["config", "user.name", "Test"]).await;
        std::fs::write(dir.join("a.txt"), "hello").unwrap();
        run(&["add", "."]).await;
        run(&["commit", "-q", "-m", "init"]).await;
    }

    #[tokio::test]
    async fn missing_dot_git_is_not_a_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        let tracker = GitTracker::new();
        let err = tracker.get_head_commit(dir.path()).await.unwrap_err();
        assert!(matches!(err, GitError::NotAGitRepository(_)));
    }

    #[tokio::test]
    async fn resolves_commit_branch_and_clean_worktree() {
        let dir = tempfile::TempDir::new().unwrap();
        init_repo(dir.path()).await;
        let tracker = GitTracker::new();

        let hash = tracker.get_head_commit(dir.path()).await.unwrap();
        assert_eq!(hash.len(), 40);

        let dirty = tracker.has_uncommitted_changes(dir.path()).await.unwrap();
        assert!(!dirty);

        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        let dirty = tracker.has_uncommitted_changes(dir.path()).await.unwrap();
        assert!(dirty);
    }

    #[tokio::test]
    async fn has_changed_since_detects_new_commit() {
        let dir = tempfile::TempDir::new().unwrap();
        init_repo(dir.path()).await;
        let tracker = GitTracker::new();
        let original = tracker.get_head_commit(dir.path()).await.unwrap();

        assert!(!tracker.has_changed_since(dir.path(), &original).await.unwrap());

        std::fs::write(dir.path().join("b.txt"), "more").unwrap();
        TokioCommand::new("git")
            .arg("-C")
            .arg(dir.path())
            .args(["add", "."])
            .output()
            .await
            .unwrap();
        TokioCommand::new("git")
            .arg("-C")
            .arg(dir.path())
            .args(["commit", "-q", "-m", "second"])
            .output()
            .await
            .unwrap();

        assert!(tracker.has_changed_since(dir.path(), &original).await.unwrap());
    }
}
