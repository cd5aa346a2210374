//! Controller reconciling `ScanRequest` resources into Jobs and CronJobs.
//!
//! A `ScanRequest` without a schedule becomes a single `<name>-job` Job; one
//! with a schedule becomes a `<name>-cronjob` CronJob. The request's status
//! records which workload was declared.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod ownership;
pub mod reconciler;
pub mod status;
pub mod workload;

pub use config::OperatorConfig;
pub use crd::{ScanMode, ScanRequest, ScanRequestSpec, ScanRequestStatus};
pub use error::ReconcileError;
pub use reconciler::{Identity, Reconciler, Requeue};
