//! Campaign send engine for mailops-rs.
//!
//! - **Dispatcher**: batch send loop with checkpointing
//! - **Control**: pause/resume/cancel signalling at batch boundaries
//! - **Recovery**: crash-tolerant startup reconciliation
//! - **Scheduler**: daily quota reset and channel cleanup
//! - **Retry**: bounded exponential backoff for transient send failures

pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use control::{ControlRegistry, ControlSignal};
pub use dispatcher::{CampaignRun, Dispatcher};
pub use engine::SendEngine;
pub use retry::RetryConfig;
pub use scheduler::{Maintenance, MaintenanceExecutor, SchedulerConfig, run_scheduler};
pub use store::{AttemptLog, AttemptRecord, DbAttemptLog, DbJobStore, DbSenderPool, JobStore, SenderPool};
