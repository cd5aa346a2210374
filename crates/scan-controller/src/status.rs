//! Projection of a reconciliation outcome onto `ScanRequest.status`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
	api::{Api, Patch, PatchParams},
	ResourceExt,
};
use tracing::instrument;

use crate::{
	crd::{ScanRequest, ScanRequestStatus},
	workload::WorkloadKind,
};

/// What happened when a child workload was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// The workload did not exist and was created.
	Created,
	/// The workload already existed and was left alone.
	Unchanged,
	/// The workload was created or updated through server-side apply.
	Applied,
}

/// A child workload as it exists in the cluster after declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
	pub kind: WorkloadKind,
	pub name: String,
	pub outcome: Outcome,
	/// `metadata.creationTimestamp` reported by the API server, if any.
	pub created_at: Option<Time>,
}

/// Compute the status a `ScanRequest` should have after `declaration`.
///
/// `lastRun` only moves forward when a one-off Job is actually created. An
/// existing Job keeps the recorded time, or backfills it from the Job itself
/// when the status write that should have recorded it never landed.
pub fn project(
	current: Option<&ScanRequestStatus>,
	declaration: &Declaration,
	now: Time,
) -> ScanRequestStatus {
	let recorded = current.and_then(|s| s.last_run.clone());

	let last_run = match (declaration.kind, declaration.outcome) {
		(WorkloadKind::Job, Outcome::Created) => Some(now),
		(WorkloadKind::Job, _) => recorded
			.or_else(|| declaration.created_at.clone())
			.or(Some(now)),
		(WorkloadKind::CronJob, _) => recorded,
	};

	ScanRequestStatus {
		job_name: Some(declaration.name.clone()),
		last_run,
	}
}

/// Write `status` to the status subresource unless it is already there.
///
/// The patch carries the resourceVersion the request was read at, so a
/// concurrent writer makes this fail with 409 instead of being overwritten.
/// Returns whether a write was issued.
#[instrument(skip_all, fields(name = %scan_request.name_any(), job_name = ?status.job_name))]
pub async fn persist(
	api: &Api<ScanRequest>,
	scan_request: &ScanRequest,
	status: &ScanRequestStatus,
) -> Result<bool, kube::Error> {
	if scan_request.status.as_ref() == Some(status) {
		tracing::debug!("status already up to date");
		return Ok(false);
	}

	let patch = status_patch(scan_request.resource_version(), status);
	api.patch_status(
		&scan_request.name_any(),
		&PatchParams::default(),
		&Patch::Merge(&patch),
	)
	.await?;

	tracing::debug!("status updated");
	Ok(true)
}

fn status_patch(resource_version: Option<String>, status: &ScanRequestStatus) -> serde_json::Value {
	match resource_version {
		Some(resource_version) => serde_json::json!({
			"metadata": { "resourceVersion": resource_version },
			"status": status,
		}),
		None => serde_json::json!({ "status": status }),
	}
}

#[cfg(test)]
mod tests {
	use jiff::Timestamp;

	use super::*;

	fn time(seconds: i64) -> Time {
		Time(Timestamp::from_second(seconds).unwrap())
	}

	fn declaration(kind: WorkloadKind, outcome: Outcome, created_at: Option<Time>) -> Declaration {
		let name = crate::workload::child_name("probe", kind);
		Declaration {
			kind,
			name,
			outcome,
			created_at,
		}
	}

	#[test]
	fn test_created_job_sets_last_run() {
		let status = project(
			None,
			&declaration(WorkloadKind::Job, Outcome::Created, None),
			time(100),
		);
		assert_eq!(status.job_name.as_deref(), Some("probe-job"));
		assert_eq!(status.last_run, Some(time(100)));
	}

	#[test]
	fn test_created_job_advances_last_run() {
		let current = ScanRequestStatus {
			job_name: Some("probe-job".to_string()),
			last_run: Some(time(50)),
		};
		let status = project(
			Some(&current),
			&declaration(WorkloadKind::Job, Outcome::Created, Some(time(99))),
			time(100),
		);
		assert_eq!(status.last_run, Some(time(100)));
	}

	#[test]
	fn test_existing_job_keeps_recorded_last_run() {
		let current = ScanRequestStatus {
			job_name: Some("probe-job".to_string()),
			last_run: Some(time(50)),
		};
		let status = project(
			Some(&current),
			&declaration(WorkloadKind::Job, Outcome::Unchanged, Some(time(49))),
			time(100),
		);
		assert_eq!(status, current);
	}

	#[test]
	fn test_existing_job_backfills_from_creation_timestamp() {
		let status = project(
			Some(&ScanRequestStatus::default()),
			&declaration(WorkloadKind::Job, Outcome::Unchanged, Some(time(49))),
			time(100),
		);
		assert_eq!(status.last_run, Some(time(49)));
	}

	#[test]
	fn test_existing_job_without_timestamp_falls_back_to_now() {
		let status = project(
			None,
			&declaration(WorkloadKind::Job, Outcome::Unchanged, None),
			time(100),
		);
		assert_eq!(status.last_run, Some(time(100)));
	}

	#[test]
	fn test_cron_job_never_sets_last_run() {
		let status = project(
			None,
			&declaration(WorkloadKind::CronJob, Outcome::Applied, Some(time(10))),
			time(100),
		);
		assert_eq!(status.job_name.as_deref(), Some("probe-cronjob"));
		assert_eq!(status.last_run, None);
	}

	#[test]
	fn test_cron_job_keeps_previous_last_run() {
		let current = ScanRequestStatus {
			job_name: Some("probe-job".to_string()),
			last_run: Some(time(50)),
		};
		let status = project(
			Some(&current),
			&declaration(WorkloadKind::CronJob, Outcome::Applied, None),
			time(100),
		);
		assert_eq!(status.job_name.as_deref(), Some("probe-cronjob"));
		assert_eq!(status.last_run, Some(time(50)));
	}

	#[test]
	fn test_status_patch_pins_resource_version() {
		let status = ScanRequestStatus {
			job_name: Some("nightly-cronjob".to_string()),
			last_run: None,
		};
		assert_eq!(
			status_patch(Some("42".to_string()), &status),
			serde_json::json!({
				"metadata": { "resourceVersion": "42" },
				"status": { "jobName": "nightly-cronjob" },
			})
		);
		assert_eq!(
			status_patch(None, &status),
			serde_json::json!({ "status": { "jobName": "nightly-cronjob" } })
		);
	}
}
