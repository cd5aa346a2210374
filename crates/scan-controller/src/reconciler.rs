//! Convergence of a single `ScanRequest` towards its Job or CronJob.

use std::{fmt, time::Duration};

use jiff::Timestamp;
use k8s_openapi::{
	api::batch::v1::{CronJob, Job},
	apimachinery::pkg::apis::meta::v1::Time,
};
use kube::{
	api::{Api, DeleteParams, Patch, PatchParams, PostParams, Preconditions},
	runtime::controller::Action,
	Client, ResourceExt,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
	config::OperatorConfig,
	crd::ScanRequest,
	error::ReconcileError,
	status::{self, Declaration, Outcome},
	workload::{child_name, ChildWorkload, WorkloadKind, WorkloadTemplate},
};

/// Namespace and name of a `ScanRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
	pub namespace: String,
	pub name: String,
}

impl Identity {
	pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			name: name.into(),
		}
	}

	/// Identity of an object delivered by a watch.
	pub fn of(scan_request: &ScanRequest) -> Self {
		Self::new(
			scan_request.namespace().unwrap_or_default(),
			scan_request.name_any(),
		)
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.namespace, self.name)
	}
}

/// When the controller should reconcile the same identity again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
	/// Wait for the next watch event.
	None,
	/// Reconcile again after the given delay.
	After(Duration),
	/// Reconcile again right away.
	Immediate,
}

impl From<Requeue> for Action {
	fn from(requeue: Requeue) -> Self {
		match requeue {
			Requeue::None => Action::await_change(),
			Requeue::After(delay) => Action::requeue(delay),
			Requeue::Immediate => Action::requeue(Duration::ZERO),
		}
	}
}

/// Converges `ScanRequest`s towards their child workloads.
///
/// Holds no per-request state: everything is read from the API server on
/// each call, so one instance can serve any number of identities concurrently.
#[derive(Clone)]
pub struct Reconciler {
	client: Client,
	template: WorkloadTemplate,
	field_manager: String,
}

impl fmt::Debug for Reconciler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Reconciler")
			.field("template", &self.template)
			.field("field_manager", &self.field_manager)
			.finish_non_exhaustive()
	}
}

impl Reconciler {
	pub fn new(client: Client, config: &OperatorConfig) -> Self {
		Self {
			client,
			template: config.workload_template(),
			field_manager: config.field_manager.clone(),
		}
	}

	/// Reconcile the `ScanRequest` named by `identity`.
	///
	/// A request that no longer exists is treated as deleted and succeeds
	/// without touching anything; its children are left to the garbage collector.
	/// Cancelling `cancel` abandons the in-flight round-trip and returns
	/// [`ReconcileError::Cancelled`].
	#[instrument(skip(self, cancel), fields(namespace = %identity.namespace, name = %identity.name))]
	pub async fn reconcile(
		&self,
		identity: &Identity,
		cancel: &CancellationToken,
	) -> Result<Requeue, ReconcileError> {
		tokio::select! {
			biased;
			() = cancel.cancelled() => Err(ReconcileError::Cancelled(identity.clone())),
			result = self.converge(identity) => result,
		}
	}

	async fn converge(&self, identity: &Identity) -> Result<Requeue, ReconcileError> {
		let api: Api<ScanRequest> = Api::namespaced(self.client.clone(), &identity.namespace);

		let scan_request = api
			.get_opt(&identity.name)
			.await
			.map_err(|e| ReconcileError::Fetch {
				identity: identity.clone(),
				source: Box::new(e),
			})?;

		let Some(scan_request) = scan_request else {
			tracing::info!("ScanRequest not found, assuming it was deleted");
			return Ok(Requeue::None);
		};

		let mode = scan_request.spec.mode();
		tracing::info!(mode = mode.as_str(), "reconciling ScanRequest");

		let workload = self
			.template
			.build(&scan_request)
			.map_err(|source| ReconcileError::Build {
				identity: identity.clone(),
				source,
			})?;

		let declaration = self.declare(&identity.namespace, workload).await?;
		if declaration.kind == WorkloadKind::Job {
			self.retire_cron_job(&scan_request, &identity.namespace).await?;
		}

		let status = status::project(
			scan_request.status.as_ref(),
			&declaration,
			Time(Timestamp::now()),
		);
		status::persist(&api, &scan_request, &status)
			.await
			.map_err(|e| ReconcileError::StatusUpdate {
				identity: identity.clone(),
				source: Box::new(e),
			})?;

		tracing::info!(job_name = %declaration.name, outcome = ?declaration.outcome, "reconciled ScanRequest");
		Ok(Requeue::None)
	}

	/// Make sure the child workload exists in the cluster.
	async fn declare(
		&self,
		namespace: &str,
		workload: ChildWorkload,
	) -> Result<Declaration, ReconcileError> {
		let kind = workload.kind();
		let name = workload.name();

		let result = match workload {
			ChildWorkload::OneOffJob(job) => self.create_job(namespace, &name, job).await,
			ChildWorkload::RecurringJob(cron_job) => {
				self.apply_cron_job(namespace, &name, cron_job).await
			}
		};

		result.map_err(|e| ReconcileError::Declare {
			kind,
			name,
			source: Box::new(e),
		})
	}

	/// Create the one-off Job unless it already exists.
	///
	/// An existing Job is never patched: its pod template is immutable, and
	/// re-running it is not what a repeated reconciliation means.
	#[instrument(skip(self, job))]
	async fn create_job(
		&self,
		namespace: &str,
		name: &str,
		job: Job,
	) -> Result<Declaration, kube::Error> {
		let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);

		let declared = |outcome, created_at| Declaration {
			kind: WorkloadKind::Job,
			name: name.to_string(),
			outcome,
			created_at,
		};

		if let Some(existing) = api.get_opt(name).await? {
			tracing::debug!("Job already declared");
			return Ok(declared(
				Outcome::Unchanged,
				existing.metadata.creation_timestamp,
			));
		}

		let params = PostParams {
			field_manager: Some(self.field_manager.clone()),
			..PostParams::default()
		};
		match api.create(&params, &job).await {
			Ok(created) => {
				tracing::info!("created Job");
				Ok(declared(Outcome::Created, created.metadata.creation_timestamp))
			}
			Err(kube::Error::Api(ref err)) if err.code == 409 => {
				// Created by someone else between our get and create
				tracing::debug!("Job appeared concurrently");
				Ok(declared(Outcome::Unchanged, None))
			}
			Err(e) => Err(e),
		}
	}

	/// Delete the CronJob left behind by an earlier schedule.
	///
	/// Only a CronJob controlled by this very `ScanRequest` is touched. The uid
	/// precondition keeps a same-named replacement from being deleted.
	#[instrument(skip_all, fields(name = %scan_request.name_any()))]
	async fn retire_cron_job(
		&self,
		scan_request: &ScanRequest,
		namespace: &str,
	) -> Result<(), ReconcileError> {
		let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
		let name = child_name(&scan_request.name_any(), WorkloadKind::CronJob);
		let failed = |name: &str, e: kube::Error| ReconcileError::Declare {
			kind: WorkloadKind::CronJob,
			name: name.to_string(),
			source: Box::new(e),
		};

		let Some(existing) = api.get_opt(&name).await.map_err(|e| failed(&name, e))? else {
			return Ok(());
		};

		let owned = scan_request.uid().is_some_and(|uid| {
			existing
				.owner_references()
				.iter()
				.any(|owner| owner.controller == Some(true) && owner.uid == uid)
		});
		if !owned {
			tracing::debug!(cron_job = %name, "CronJob is not controlled by this ScanRequest, leaving it");
			return Ok(());
		}

		let params = DeleteParams {
			preconditions: Some(Preconditions {
				uid: existing.uid(),
				resource_version: None,
			}),
			..DeleteParams::background()
		};
		match api.delete(&name, &params).await {
			Ok(_) => {
				tracing::info!(cron_job = %name, "deleted CronJob of former schedule");
				Ok(())
			}
			Err(kube::Error::Api(ref err)) if err.code == 404 => Ok(()),
			Err(e) => Err(failed(&name, e)),
		}
	}

	/// Server-side apply the CronJob, creating it or updating it in place.
	#[instrument(skip(self, cron_job))]
	async fn apply_cron_job(
		&self,
		namespace: &str,
		name: &str,
		cron_job: CronJob,
	) -> Result<Declaration, kube::Error> {
		let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);

		let params = PatchParams::apply(&self.field_manager).force();
		let applied = api.patch(name, &params, &Patch::Apply(&cron_job)).await?;
		tracing::info!("applied CronJob");

		Ok(Declaration {
			kind: WorkloadKind::CronJob,
			name: name.to_string(),
			outcome: Outcome::Applied,
			created_at: applied.metadata.creation_timestamp,
		})
	}
}
