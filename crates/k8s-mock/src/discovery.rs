//! Resource types known to the mock server.

use std::collections::HashMap;

/// Pre-configured resource catalog, used to derive API paths from manifests.
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: HashMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: HashMap::from([
				(
					"batch/v1".to_string(),
					vec![
						MockApiResource::namespaced("jobs", "Job"),
						MockApiResource::namespaced("cronjobs", "CronJob"),
					],
				),
				(
					"scan.example.com/v1".to_string(),
					vec![MockApiResource::namespaced("scanrequests", "ScanRequest")],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Look up a resource by apiVersion and kind.
	pub fn lookup(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		let resources = if api_version.contains('/') {
			self.group_resources.get(api_version)?
		} else {
			&self.core_resources
		};
		resources.iter().find(|r| r.kind == kind)
	}
}

/// A mock API resource definition.
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: false,
		}
	}
}
