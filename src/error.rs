//! Typed error taxonomy for the engine (spec §7).
//!
//! Library code returns these typed errors; binaries and orchestration glue
//! use `anyhow::Result` with `.context(...)` on top, matching the split the
//! teacher crate uses between `db/core.rs`'s `DbError` and `repo_manager.rs`'s
//! `anyhow`-based binaries.

use thiserror::Error;

/// Configuration load/validation failures. Fatal at load time; no jobs run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config document at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config document as JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config validation failed: {0:?}")]
    Validation(Vec<ValidationIssue>),
}

/// One offending field in a config document, named explicitly so the caller
/// can report all problems at once rather than failing on the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Registry-level errors: unknown repository/group names, duplicate names.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("repository group not found: {0}")]
    GroupNotFound(String),

    #[error("duplicate repository name: {0}")]
    DuplicateName(String),

    #[error("repository group {group} references unknown repository {repository}")]
    DanglingGroupReference { group: String, repository: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while resolving a repository's git state (C6).
///
/// `NotAGitRepository` is deliberately *not* fatal: the orchestrator
/// degrades gracefully (skips the cache) rather than failing the job.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("{0} is not a git repository")]
    NotAGitRepository(std::path::PathBuf),

    #[error("git command failed: {0}")]
    CommandFailed(String),

    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Pattern Gateway errors (C8). Absence of the matcher binary is handled
/// upstream as a fallback, not surfaced as this error.
#[derive(Error, Debug)]
pub enum PatternGatewayError {
    #[error("pattern matcher exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("pattern matcher timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to parse pattern matcher output: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error("failed to spawn pattern matcher: {0}")]
    Spawn(std::io::Error),
}

/// Scan Cache errors (C7). Always logged and treated as a miss; never
/// propagated as a scan failure (spec §7).
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("failed to (de)serialize cache entry: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by the Similarity Engine while validating a candidate
/// group (spec §4.10.6). These drop the offending group with a warning
/// event; they are never a job failure.
#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("group {0} has fewer than two members")]
    GroupTooSmall(String),

    #[error("group {group} has inconsistent pattern ids: {a} vs {b}")]
    PatternIdMismatch {
        group: String,
        a: String,
        b: String,
    },

    #[error("group {group} has inconsistent categories: {a} vs {b}")]
    CategoryMismatch {
        group: String,
        a: String,
        b: String,
    },

    #[error("canonical block {canonical} is not a member of group {group}")]
    CanonicalNotMember { group: String, canonical: String },
}

/// Job-queue-level errors (spec §4.4, §7). `Timeout` and `CancelError` are
/// both retryable/terminal per the job's own retry policy, not the queue's.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("job {0} timed out")]
    Timeout(String),

    #[error("job {0} was canceled")]
    Canceled(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    PatternGateway(#[from] PatternGatewayError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
