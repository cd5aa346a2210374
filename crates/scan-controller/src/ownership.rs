//! Which resource changes trigger a reconciliation.

use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::{
	runtime::{watcher, Controller},
	Api, Client, Resource,
};

use crate::crd::ScanRequest;

/// A resource type the controller watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watched {
	ScanRequest,
	Job,
	CronJob,
}

/// Why a change to a watched resource triggers reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
	/// Any change to the resource reconciles that resource.
	Primary,
	/// A change reconciles the `ScanRequest` named in its controller owner reference.
	OwnedByScanRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
	pub watched: Watched,
	pub trigger: Trigger,
}

/// Watches wired into the controller.
pub const OWNERSHIP: &[Registration] = &[
	Registration {
		watched: Watched::ScanRequest,
		trigger: Trigger::Primary,
	},
	Registration {
		watched: Watched::Job,
		trigger: Trigger::OwnedByScanRequest,
	},
	Registration {
		watched: Watched::CronJob,
		trigger: Trigger::OwnedByScanRequest,
	},
];

/// Api scoped to one namespace, or to the whole cluster.
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
	K: Resource<Scope = kube::core::NamespaceResourceScope>,
	<K as Resource>::DynamicType: Default,
{
	match namespace {
		Some(ns) => Api::namespaced(client, ns),
		None => Api::all(client),
	}
}

/// Build a controller with one watch per [`OWNERSHIP`] entry.
pub fn controller(client: Client, namespace: Option<&str>) -> Controller<ScanRequest> {
	let primary = scoped_api::<ScanRequest>(client.clone(), namespace);
	let controller = Controller::new(primary, watcher::Config::default());

	OWNERSHIP
		.iter()
		.fold(controller, |controller, registration| {
			match (registration.trigger, registration.watched) {
				(Trigger::OwnedByScanRequest, Watched::Job) => controller.owns(
					scoped_api::<Job>(client.clone(), namespace),
					watcher::Config::default(),
				),
				(Trigger::OwnedByScanRequest, Watched::CronJob) => controller.owns(
					scoped_api::<CronJob>(client.clone(), namespace),
					watcher::Config::default(),
				),
				// The primary watch is set up by `Controller::new`
				(Trigger::Primary, _) | (_, Watched::ScanRequest) => controller,
			}
		})
}
