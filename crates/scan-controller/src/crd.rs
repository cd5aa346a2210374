//! The `ScanRequest` custom resource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group serving `ScanRequest`.
pub const GROUP: &str = "scan.example.com";

/// Desired state of a scan: what to run, and optionally when.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
	group = "scan.example.com",
	version = "v1",
	kind = "ScanRequest",
	plural = "scanrequests",
	shortname = "scanreq",
	namespaced,
	status = "ScanRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequestSpec {
	/// Command line executed inside the scan container.
	#[serde(default)]
	pub command: Vec<String>,

	/// Cron expression. Absent or empty means the scan runs once.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub schedule: Option<String>,
}

/// Outcome of the last reconciliation.
///
/// This records what the controller declared, not whether the scan succeeded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequestStatus {
	/// Name of the Job or CronJob most recently declared for this request.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub job_name: Option<String>,

	/// When the one-off Job was created. Never set for scheduled scans.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_run: Option<Time>,
}

/// How a scan request is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode<'a> {
	/// A single run-to-completion Job.
	OneOff,
	/// A CronJob driven by the given schedule, passed through verbatim.
	Recurring(&'a str),
}

impl ScanRequestSpec {
	/// Classify the request by its schedule.
	///
	/// Blank schedules are treated as absent; anything else is handed to the
	/// platform untouched, which is where malformed expressions get rejected.
	pub fn mode(&self) -> ScanMode<'_> {
		match self.schedule.as_deref() {
			Some(schedule) if !schedule.trim().is_empty() => ScanMode::Recurring(schedule),
			_ => ScanMode::OneOff,
		}
	}
}

impl ScanMode<'_> {
	pub fn as_str(&self) -> &'static str {
		match self {
			ScanMode::OneOff => "one-off",
			ScanMode::Recurring(_) => "recurring",
		}
	}
}
