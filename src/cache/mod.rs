//! Caching and request orchestration core.

pub mod coalescer;
pub mod error;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use coalescer::{FetchOrigin, RequestCoalescer};
pub use error::CacheError;
pub use health::{HealthState, HealthStats, HealthTracker};
pub use metrics::{DomainCounters, DomainUsage, MetricsRecorder, PerformanceStatus, UsageMetrics};
pub use orchestrator::{CacheManager, CacheStats, DomainCache, DomainStats, HealthReport};
pub use retry::RetryPolicy;
pub use scheduler::{RefreshReport, RefreshScheduler, RunReason, SchedulerHandle, SchedulerState};
pub use store::TtlStore;
pub use types::{CacheConfig, CacheEntry, DomainPolicy, Lookup, Scope};
