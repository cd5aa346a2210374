//! Glue between the [`Reconciler`] and the kube-runtime controller loop.

use std::sync::Arc;

use futures::StreamExt;
use kube::{runtime::controller::Action, Client};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
	backoff::Backoff,
	config::OperatorConfig,
	crd::ScanRequest,
	error::ReconcileError,
	ownership,
	reconciler::{Identity, Reconciler},
};

/// State shared by every reconciliation the controller runs.
#[derive(Debug)]
pub struct Context {
	reconciler: Reconciler,
	backoff: Backoff,
	shutdown: CancellationToken,
}

impl Context {
	pub fn new(client: Client, config: &OperatorConfig, shutdown: CancellationToken) -> Self {
		Self {
			reconciler: Reconciler::new(client, config),
			backoff: Backoff::new(config.backoff),
			shutdown,
		}
	}
}

/// Reconcile a `ScanRequest` delivered by the controller.
///
/// Only the identity of `scan_request` is used; the reconciler reads the
/// current object itself.
pub async fn reconcile(
	scan_request: Arc<ScanRequest>,
	ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
	let identity = Identity::of(&scan_request);
	let requeue = ctx.reconciler.reconcile(&identity, &ctx.shutdown).await?;
	ctx.backoff.reset(&identity);
	Ok(requeue.into())
}

/// Decide when to retry after [`reconcile`] failed.
pub fn error_policy(
	scan_request: Arc<ScanRequest>,
	error: &ReconcileError,
	ctx: Arc<Context>,
) -> Action {
	let identity = Identity::of(&scan_request);

	// Shutdown in progress, not a failure of this identity
	if matches!(error, ReconcileError::Cancelled(_)) {
		tracing::debug!(%identity, "reconciliation cancelled");
		return Action::await_change();
	}

	if !error.is_retryable() {
		tracing::error!(%identity, error = %error, "reconciliation failed permanently");
		return Action::await_change();
	}

	let delay = ctx.backoff.next_delay(&identity);
	tracing::warn!(
		%identity,
		error = %error,
		conflict = error.is_conflict(),
		retry_in = ?delay,
		"reconciliation failed"
	);
	Action::requeue(delay)
}

/// Run the controller until `shutdown` is cancelled.
#[instrument(skip_all, fields(namespace = config.namespace.as_deref().unwrap_or("*")))]
pub async fn run(client: Client, config: OperatorConfig, shutdown: CancellationToken) {
	let context = Arc::new(Context::new(client.clone(), &config, shutdown.clone()));

	tracing::info!("starting ScanRequest controller");

	ownership::controller(client, config.namespace.as_deref())
		.graceful_shutdown_on(async move { shutdown.cancelled().await })
		.run(reconcile, error_policy, context)
		.for_each(|result| async move {
			match result {
				Ok((object, action)) => tracing::debug!(%object, ?action, "reconciled"),
				Err(e) => tracing::warn!(error = %e, "reconcile failed"),
			}
		})
		.await;

	tracing::info!("controller terminated");
}
