//! `ScanJob` (spec §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a job scans a single repository or runs the cross-repository
/// inter-project pass over a `RepositoryGroup` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Intra,
    Inter,
}

/// Lifecycle state of a [`ScanJob`] (spec §3: "queued → running → (completed
/// | failed). Failed → (retry → queued after backoff) until attempts =
/// maxAttempts").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

/// Stage + percent + message progress snapshot (spec §3 `progress?`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub stage: String,
    pub percent: u8,
    pub message: String,
}

impl JobProgress {
    pub fn new(stage: impl Into<String>, percent: u8, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// A unit of scan work (spec §3 ScanJob). `id` is monotonic-with-timestamp
/// so job history files sort naturally on disk (spec §4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: String,
    pub kind: JobKind,
    /// Repository name (`Intra`) or group name (`Inter`).
    pub target: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub progress: Option<JobProgress>,
}

impl ScanJob {
    pub fn new(id: impl Into<String>, kind: JobKind, target: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            target: target.into(),
            state: JobState::Queued,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
            progress: None,
        }
    }

    /// Monotonic id combining a millisecond timestamp with the target name,
    /// so two jobs enqueued in the same tick for different repos never
    /// collide (spec §3 "monotonic with timestamp").
    pub fn next_id(target: &str, now: DateTime<Utc>) -> String {
        format!("{}-{}", now.timestamp_millis(), target)
    }

    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Running;
        self.attempts += 1;
        self.started_at = Some(now);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.ended_at = Some(now);
        self.error = None;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.ended_at = Some(now);
        self.error = Some(error.into());
    }

    pub fn mark_canceled(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Canceled;
        self.ended_at = Some(now);
    }

    /// Reset to `Queued` for a retry attempt (spec §4.4 "retry → queued
    /// after backoff").
    pub fn requeue(&mut self) {
        self.state = JobState::Queued;
        self.started_at = None;
        self.ended_at = None;
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// `retryDelayMs × 2^(attempts-1)` (spec §4.4).
    pub fn backoff(&self, retry_delay_ms: u64) -> std::time::Duration {
        let exp = self.attempts.saturating_sub(1);
        let millis = retry_delay_ms.saturating_mul(2u64.saturating_pow(exp));
        std::time::Duration::from_millis(millis)
    }
}
