//! Incremental cache refresh: staleness, batching, throughput estimation, the
//! job engine, and the registry that exposes running jobs to pollers.

pub mod batch;
pub mod engine;
pub mod estimator;
pub mod job;
pub mod registry;
pub mod staleness;

pub use engine::{JobOutcome, RefreshEngine, RefreshRequest};
pub use job::{JobId, JobSnapshot, JobState, JobStatus};
pub use registry::{JobCounts, JobRegistry, RegistryError};
pub use staleness::StalenessPolicy;
