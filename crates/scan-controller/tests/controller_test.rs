//! Tests for the controller-facing reconcile and error policy functions.

use std::{sync::Arc, time::Duration};

use k8s_mock::HttpMockK8sServer;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::controller::Action;
use scan_controller::{
	config::BackoffConfig,
	controller::{error_policy, reconcile, Context},
	Identity, OperatorConfig, ReconcileError, ScanRequest, ScanRequestSpec,
};
use tokio_util::sync::CancellationToken;

fn probe() -> ScanRequest {
	let mut sr = ScanRequest::new(
		"probe",
		ScanRequestSpec {
			command: vec!["true".to_string()],
			schedule: None,
		},
	);
	sr.metadata.namespace = Some("scans".to_string());
	sr
}

fn config() -> OperatorConfig {
	OperatorConfig {
		backoff: BackoffConfig {
			base_seconds: 3,
			max_seconds: 10,
		},
		..OperatorConfig::default()
	}
}

#[tokio::test]
async fn test_reconcile_awaits_change_on_success() {
	let server = HttpMockK8sServer::builder().build().start().await;
	server.insert(&probe());
	let ctx = Arc::new(Context::new(
		server.client().await,
		&config(),
		CancellationToken::new(),
	));

	// The watched copy may be stale; the reconciler reads its own
	let action = reconcile(Arc::new(probe()), ctx).await.unwrap();

	assert_eq!(action, Action::await_change());
	assert!(server.get::<Job>("scans", "probe-job").is_some());
}

#[tokio::test]
async fn test_error_policy_backs_off_and_resets() {
	let server = HttpMockK8sServer::builder().build().start().await;
	server.insert(&probe());
	let ctx = Arc::new(Context::new(
		server.client().await,
		&config(),
		CancellationToken::new(),
	));
	server.fail_next("GET", "/scanrequests/probe", 500, 3);

	let mut delays = Vec::new();
	for _ in 0..3 {
		let err = reconcile(Arc::new(probe()), ctx.clone()).await.unwrap_err();
		delays.push(error_policy(Arc::new(probe()), &err, ctx.clone()));
	}
	assert_eq!(
		delays,
		vec![
			Action::requeue(Duration::from_secs(3)),
			Action::requeue(Duration::from_secs(6)),
			Action::requeue(Duration::from_secs(10)),
		]
	);

	// A success forgets earlier failures
	reconcile(Arc::new(probe()), ctx.clone()).await.unwrap();
	server.fail_next("GET", "/scanrequests/probe", 500, 1);
	let err = reconcile(Arc::new(probe()), ctx.clone()).await.unwrap_err();
	assert_eq!(
		error_policy(Arc::new(probe()), &err, ctx),
		Action::requeue(Duration::from_secs(3))
	);
}

#[tokio::test]
async fn test_shutdown_cancels_reconcile() {
	let server = HttpMockK8sServer::builder().build().start().await;
	server.insert(&probe());
	let shutdown = CancellationToken::new();
	let ctx = Arc::new(Context::new(server.client().await, &config(), shutdown.clone()));
	shutdown.cancel();

	let err = reconcile(Arc::new(probe()), ctx).await.unwrap_err();

	assert!(matches!(err, ReconcileError::Cancelled(_)));
	assert!(server.get::<Job>("scans", "probe-job").is_none());
}

#[tokio::test]
async fn test_cancellation_does_not_back_off() {
	let server = HttpMockK8sServer::builder().build().start().await;
	server.insert(&probe());
	let ctx = Arc::new(Context::new(
		server.client().await,
		&config(),
		CancellationToken::new(),
	));

	let cancelled = ReconcileError::Cancelled(Identity::new("scans", "probe"));
	for _ in 0..3 {
		assert_eq!(
			error_policy(Arc::new(probe()), &cancelled, ctx.clone()),
			Action::await_change()
		);
	}

	// The first real failure still waits only the base delay
	server.fail_next("GET", "/scanrequests/probe", 500, 1);
	let err = reconcile(Arc::new(probe()), ctx.clone()).await.unwrap_err();
	assert_eq!(
		error_policy(Arc::new(probe()), &err, ctx),
		Action::requeue(Duration::from_secs(3))
	);
}
