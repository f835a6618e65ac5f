//! Runtime job queues and worker orchestration.
#![forbid(unsafe_code)]

mod diagnostics;
mod pool;
mod upload;

pub use diagnostics::{Counter, Diagnostics, DiagnosticsSnapshot};
pub use pool::{PoolTask, Priority, PriorityPool, resolve_worker_threads};
pub use upload::{UploadJob, UploadQueue, UploadSender};
