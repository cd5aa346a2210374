//! Desired shape of the Job or CronJob backing a `ScanRequest`.

use std::{collections::BTreeMap, fmt};

use k8s_openapi::{
	api::{
		batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec},
		core::v1::{Container, PodSpec, PodTemplateSpec},
	},
	apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{Resource, ResourceExt};
use thiserror::Error;

use crate::crd::{ScanMode, ScanRequest};

/// Name of the single container in every scan pod.
pub const CONTAINER_NAME: &str = "scan";

/// Label pointing from a child workload back to its `ScanRequest`.
pub const SCAN_REQUEST_LABEL: &str = "scan.example.com/scan-request";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

const RESTART_POLICY_NEVER: &str = "Never";

/// Kind of child workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
	Job,
	CronJob,
}

impl WorkloadKind {
	fn suffix(self) -> &'static str {
		match self {
			WorkloadKind::Job => "-job",
			WorkloadKind::CronJob => "-cronjob",
		}
	}
}

impl fmt::Display for WorkloadKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WorkloadKind::Job => f.write_str("Job"),
			WorkloadKind::CronJob => f.write_str("CronJob"),
		}
	}
}

/// Deterministic name of the child workload of the given kind.
pub fn child_name(scan_request: &str, kind: WorkloadKind) -> String {
	format!("{scan_request}{}", kind.suffix())
}

/// Errors that can occur while building a child workload.
#[derive(Debug, Error)]
pub enum BuildError {
	#[error("ScanRequest has no {0}, cannot reference it as owner")]
	MissingOwnerKey(&'static str),
}

/// Parameters shared by every workload the controller builds.
#[derive(Debug, Clone)]
pub struct WorkloadTemplate {
	/// Image of the scan container.
	pub image: String,
	/// Value of the managed-by label.
	pub managed_by: String,
}

/// A workload ready to be declared to the cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildWorkload {
	OneOffJob(Job),
	RecurringJob(CronJob),
}

impl ChildWorkload {
	pub fn kind(&self) -> WorkloadKind {
		match self {
			ChildWorkload::OneOffJob(_) => WorkloadKind::Job,
			ChildWorkload::RecurringJob(_) => WorkloadKind::CronJob,
		}
	}

	pub fn name(&self) -> String {
		match self {
			ChildWorkload::OneOffJob(job) => job.name_any(),
			ChildWorkload::RecurringJob(cron_job) => cron_job.name_any(),
		}
	}
}

impl WorkloadTemplate {
	/// Build the child workload matching the request's mode.
	pub fn build(&self, scan_request: &ScanRequest) -> Result<ChildWorkload, BuildError> {
		let pod = self.pod_template(scan_request);

		match scan_request.spec.mode() {
			ScanMode::OneOff => Ok(ChildWorkload::OneOffJob(Job {
				metadata: self.child_metadata(scan_request, WorkloadKind::Job)?,
				spec: Some(JobSpec {
					template: pod,
					..JobSpec::default()
				}),
				..Job::default()
			})),
			ScanMode::Recurring(schedule) => Ok(ChildWorkload::RecurringJob(CronJob {
				metadata: self.child_metadata(scan_request, WorkloadKind::CronJob)?,
				spec: Some(CronJobSpec {
					schedule: schedule.to_string(),
					job_template: JobTemplateSpec {
						metadata: None,
						spec: Some(JobSpec {
							template: pod,
							..JobSpec::default()
						}),
					},
					..CronJobSpec::default()
				}),
				..CronJob::default()
			})),
		}
	}

	fn pod_template(&self, scan_request: &ScanRequest) -> PodTemplateSpec {
		let command = &scan_request.spec.command;

		PodTemplateSpec {
			metadata: Some(ObjectMeta {
				labels: Some(self.labels(scan_request)),
				..ObjectMeta::default()
			}),
			spec: Some(PodSpec {
				containers: vec![Container {
					name: CONTAINER_NAME.to_string(),
					image: Some(self.image.clone()),
					command: (!command.is_empty()).then(|| command.clone()),
					..Container::default()
				}],
				restart_policy: Some(RESTART_POLICY_NEVER.to_string()),
				..PodSpec::default()
			}),
		}
	}

	fn child_metadata(
		&self,
		scan_request: &ScanRequest,
		kind: WorkloadKind,
	) -> Result<ObjectMeta, BuildError> {
		let namespace = scan_request
			.namespace()
			.ok_or(BuildError::MissingOwnerKey("namespace"))?;
		let owner = scan_request
			.controller_owner_ref(&())
			.ok_or(BuildError::MissingOwnerKey("uid"))?;

		Ok(ObjectMeta {
			name: Some(child_name(&scan_request.name_any(), kind)),
			namespace: Some(namespace),
			labels: Some(self.labels(scan_request)),
			owner_references: Some(vec![owner]),
			..ObjectMeta::default()
		})
	}

	fn labels(&self, scan_request: &ScanRequest) -> BTreeMap<String, String> {
		BTreeMap::from([
			(MANAGED_BY_LABEL.to_string(), self.managed_by.clone()),
			(SCAN_REQUEST_LABEL.to_string(), scan_request.name_any()),
		])
	}
}
