//! Bulk job orchestration.
//!
//! - `registry`: job status per `(connection, profile)` and the interruptible delay.
//! - `worker`: the sequential per-recipient loop.
//! - `verify`: delayed delivery checks run as tracked background tasks.

pub mod registry;
pub mod verify;
pub mod worker;

pub use registry::{JobHandle, JobRegistry, RegistryError};
pub use verify::{verify_delivery, VerificationTasks};
pub use worker::{run_bulk_job, start_bulk_job, BulkJob, EventSender, JobContext, SetupError};
