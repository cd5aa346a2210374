//! Failures surfaced by a reconciliation.

use thiserror::Error;

use crate::{reconciler::Identity, workload::WorkloadKind};

/// Errors that can occur while reconciling a `ScanRequest`.
///
/// None of these are handled inside the reconciler; they are returned to the
/// controller, whose error policy decides when to try again.
#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("fetching ScanRequest {identity}")]
	Fetch {
		identity: Identity,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("declaring {kind} {name}")]
	Declare {
		kind: WorkloadKind,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("updating status of ScanRequest {identity}")]
	StatusUpdate {
		identity: Identity,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("building workload for ScanRequest {identity}")]
	Build {
		identity: Identity,
		#[source]
		source: crate::workload::BuildError,
	},

	#[error("reconciliation of ScanRequest {0} was cancelled")]
	Cancelled(Identity),
}

impl ReconcileError {
	fn kube_source(&self) -> Option<&kube::Error> {
		match self {
			ReconcileError::Fetch { source, .. }
			| ReconcileError::Declare { source, .. }
			| ReconcileError::StatusUpdate { source, .. } => Some(&**source),
			ReconcileError::Build { .. } | ReconcileError::Cancelled(_) => None,
		}
	}

	/// The API server rejected a write made against a stale resourceVersion.
	pub fn is_conflict(&self) -> bool {
		matches!(self.kube_source(), Some(kube::Error::Api(err)) if err.code == 409)
	}

	/// Whether trying the same reconciliation again can succeed.
	///
	/// Only a malformed `ScanRequest` is permanent; store failures, conflicts
	/// and cancellation all clear up on their own.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, ReconcileError::Build { .. })
	}
}
