//! Job Queue (spec §4.4, component C4).

pub mod job;
pub mod worker_pool;

pub use job::{JobKind, JobProgress, JobState, ScanJob};
pub use worker_pool::{JobExecutor, WorkerPool, WorkerPoolConfig};
