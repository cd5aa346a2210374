//! HTTP-based mock Kubernetes server using wiremock.
//!
//! Objects live in memory and are created, read, patched and deleted through the same
//! REST paths a real API server exposes, so a regular `kube::Client` can be
//! pointed at it. Every write bumps `metadata.resourceVersion`, and writes that
//! carry a stale resourceVersion are rejected with 409 like on a real cluster.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex, RwLock,
	},
	time::Duration,
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster,
	NamedContext,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::MockDiscovery,
	helpers::{merge_json, namespace_of, parse_resource_path, status_response},
};

/// Objects keyed by (collection path, name).
type Resources = HashMap<(String, String), serde_json::Value>;

/// A failure the server returns instead of handling matching requests.
#[derive(Debug, Clone)]
pub struct Fault {
	/// HTTP method to match, e.g. `PATCH`.
	pub method: String,
	/// Suffix the request path must end with, e.g. `/status`.
	pub path_suffix: String,
	/// Status code to answer with.
	pub code: u16,
	/// How many more requests fail before the fault clears.
	pub remaining: usize,
}

/// A delay applied to the response of the next matching request.
#[derive(Debug, Clone)]
struct Delay {
	method: String,
	path_suffix: String,
	delay: Duration,
}

/// A request the server received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
	pub method: String,
	pub path: String,
}

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<serde_json::Value>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	state: Arc<State>,
}

struct State {
	resources: RwLock<Resources>,
	faults: Mutex<Vec<Fault>>,
	delays: Mutex<Vec<Delay>>,
	revision: AtomicU64,
}

impl State {
	fn next_revision(&self) -> String {
		(self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
	}

	/// Fill in the fields the API server sets on creation.
	fn stamp_created(&self, mut object: serde_json::Value, namespace: Option<&str>) -> serde_json::Value {
		let revision = self.next_revision();
		if let Some(metadata) = object
			.as_object_mut()
			.map(|o| o.entry("metadata").or_insert_with(|| serde_json::json!({})))
			.and_then(|m| m.as_object_mut())
		{
			metadata
				.entry("uid")
				.or_insert_with(|| format!("00000000-0000-4000-8000-{:0>12}", revision).into());
			metadata
				.entry("creationTimestamp")
				.or_insert_with(|| now_rfc3339().into());
			if let Some(namespace) = namespace {
				metadata.insert("namespace".to_string(), namespace.into());
			}
			metadata.insert("resourceVersion".to_string(), revision.into());
		}
		object
	}

	fn stamp_updated(&self, mut object: serde_json::Value) -> serde_json::Value {
		if let Some(metadata) = object.get_mut("metadata").and_then(|m| m.as_object_mut()) {
			metadata.insert("resourceVersion".to_string(), self.next_revision().into());
		}
		object
	}

	fn take_fault(&self, method: &str, path: &str) -> Option<ResponseTemplate> {
		let mut faults = self.faults.lock().unwrap();
		let index = faults
			.iter()
			.position(|f| f.method == method && path.ends_with(&f.path_suffix))?;

		let fault = &mut faults[index];
		let code = fault.code;
		fault.remaining -= 1;
		if fault.remaining == 0 {
			faults.remove(index);
		}

		let reason = match code {
			404 => "NotFound",
			409 => "Conflict",
			503 => "ServiceUnavailable",
			_ => "InternalError",
		};
		debug!(method, path, code, "Injected fault");
		Some(status_response(code, reason, "injected fault"))
	}

	fn take_delay(&self, method: &str, path: &str) -> Option<Duration> {
		let mut delays = self.delays.lock().unwrap();
		let index = delays
			.iter()
			.position(|d| d.method == method && path.ends_with(&d.path_suffix))?;
		Some(delays.remove(index).delay)
	}
}

fn now_rfc3339() -> String {
	let now = jiff::Timestamp::now();
	jiff::Timestamp::from_second(now.as_second())
		.unwrap_or(now)
		.to_string()
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = MockDiscovery::default();

		debug!(uri = %server.uri(), "Started mock K8s server");

		let state = Arc::new(State {
			resources: RwLock::new(HashMap::new()),
			faults: Mutex::new(Vec::new()),
			delays: Mutex::new(Vec::new()),
			revision: AtomicU64::new(0),
		});

		for manifest in self.resources {
			if let Some((api_path, name)) = api_path_for_manifest(&manifest, &discovery) {
				trace!(api_path = %api_path, name = %name, "Registered resource");
				let object = state.stamp_created(manifest, namespace_of(&api_path));
				state
					.resources
					.write()
					.unwrap()
					.insert((api_path, name), object);
			}
		}

		mount_resources(&server, &state).await;

		RunningHttpMockK8sServer { server, state }
	}
}

/// Derive the API path for a manifest using discovery data.
fn api_path_for_manifest(
	manifest: &serde_json::Value,
	discovery: &MockDiscovery,
) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.get("metadata")?.get("name")?.as_str()?.to_string();
	let namespace = manifest
		.get("metadata")
		.and_then(|m| m.get("namespace"))
		.and_then(|n| n.as_str())
		.unwrap_or("default");

	let resource = discovery.lookup(api_version, kind)?;
	let prefix = if api_version.contains('/') { "apis" } else { "api" };

	let path = if resource.namespaced {
		format!(
			"/{}/{}/namespaces/{}/{}",
			prefix, api_version, namespace, resource.name
		)
	} else {
		format!("/{}/{}/{}", prefix, api_version, resource.name)
	};

	Some((path, name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// A kube client talking to this server.
	pub async fn client(&self) -> kube::Client {
		let config =
			kube::Config::from_custom_kubeconfig(self.kubeconfig(), &KubeConfigOptions::default())
				.await
				.expect("mock kubeconfig should be valid");
		kube::Client::try_from(config).expect("client for mock server should build")
	}

	/// Store `object`, replacing any object with the same name.
	///
	/// This bypasses resourceVersion checks, like a write by another client.
	pub fn insert<K>(&self, object: &K)
	where
		K: kube::Resource<DynamicType = ()> + Serialize,
	{
		let namespace = object.meta().namespace.as_deref();
		let api_path = K::url_path(&(), namespace);
		let name = object.meta().name.clone().unwrap_or_default();
		let value = serde_json::to_value(object).expect("resource should serialize");

		let mut resources = self.state.resources.write().unwrap();
		let stored = match resources.remove(&(api_path.clone(), name.clone())) {
			Some(existing) => {
				let mut value = value;
				// Keep server-assigned identity across replacement
				for key in ["uid", "creationTimestamp"] {
					if let Some(v) = existing.pointer(&format!("/metadata/{key}")) {
						value["metadata"][key] = v.clone();
					}
				}
				self.state.stamp_updated(value)
			}
			None => self.state.stamp_created(value, namespace),
		};
		resources.insert((api_path, name), stored);
	}

	/// Fetch a stored object.
	pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
	where
		K: kube::Resource<DynamicType = ()> + DeserializeOwned,
	{
		let api_path = K::url_path(&(), Some(namespace));
		let value = self
			.state
			.resources
			.read()
			.unwrap()
			.get(&(api_path, name.to_string()))
			.cloned()?;
		Some(serde_json::from_value(value).expect("stored resource should deserialize"))
	}

	/// All stored objects of one type in a namespace.
	pub fn list<K>(&self, namespace: &str) -> Vec<K>
	where
		K: kube::Resource<DynamicType = ()> + DeserializeOwned,
	{
		let api_path = K::url_path(&(), Some(namespace));
		self.state
			.resources
			.read()
			.unwrap()
			.iter()
			.filter(|((path, _), _)| *path == api_path)
			.map(|(_, v)| serde_json::from_value(v.clone()).expect("stored resource should deserialize"))
			.collect()
	}

	/// Remove a stored object, as if it was deleted by another client.
	pub fn remove<K>(&self, namespace: &str, name: &str)
	where
		K: kube::Resource<DynamicType = ()>,
	{
		let api_path = K::url_path(&(), Some(namespace));
		self.state
			.resources
			.write()
			.unwrap()
			.remove(&(api_path, name.to_string()));
	}

	/// Fail the next `times` requests with `method` whose path ends with `path_suffix`.
	pub fn fail_next(&self, method: &str, path_suffix: &str, code: u16, times: usize) {
		if times == 0 {
			return;
		}
		self.state.faults.lock().unwrap().push(Fault {
			method: method.to_string(),
			path_suffix: path_suffix.to_string(),
			code,
			remaining: times,
		});
	}

	/// Hold back the response to the next `method` request whose path ends
	/// with `path_suffix` for `delay`.
	pub fn delay_next(&self, method: &str, path_suffix: &str, delay: Duration) {
		self.state.delays.lock().unwrap().push(Delay {
			method: method.to_string(),
			path_suffix: path_suffix.to_string(),
			delay,
		});
	}

	/// Every request received so far, in order.
	pub async fn requests(&self) -> Vec<RecordedRequest> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.map(|req| RecordedRequest {
				method: req.method.to_string(),
				path: req.url.path().to_string(),
			})
			.collect()
	}

	/// Requests received so far that were not reads.
	pub async fn writes(&self) -> Vec<RecordedRequest> {
		self.requests()
			.await
			.into_iter()
			.filter(|r| r.method != "GET")
			.collect()
	}
}

type Handler = fn(&State, &Request) -> ResponseTemplate;

/// Answer `req` with `handler`, unless a fault or delay was scheduled for it.
fn respond(state: &State, verb: &str, req: &Request, handler: Handler) -> ResponseTemplate {
	let path = req.url.path();
	let delay = state.take_delay(verb, path);
	let response = state
		.take_fault(verb, path)
		.unwrap_or_else(|| handler(state, req));
	match delay {
		Some(delay) => response.set_delay(delay),
		None => response,
	}
}

async fn mount_resources(server: &MockServer, state: &Arc<State>) {
	let handlers: [(&'static str, Handler); 4] = [
		("GET", handle_get),
		("POST", handle_post),
		("PATCH", handle_patch),
		("DELETE", handle_delete),
	];

	for (verb, handler) in handlers {
		let state = Arc::clone(state);
		Mock::given(method(verb))
			.and(path_regex(r"^/api(s)?/.*"))
			.respond_with(move |req: &Request| respond(&state, verb, req, handler))
			.mount(server)
			.await;
	}
}

/// PATCH - merge the request body into the stored resource.
///
/// Server-side apply creates the resource when it does not exist yet.
fn handle_patch(state: &State, req: &Request) -> ResponseTemplate {
	let path_str = req.url.path();
	let (resource_path, is_status) = match path_str.strip_suffix("/status") {
		Some(resource_path) => (resource_path, true),
		None => (path_str, false),
	};
	let (api_path, name) = parse_resource_path(resource_path);

	let is_apply = req
		.headers
		.get("content-type")
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v.contains("apply-patch"));

	let mut patch: serde_json::Value =
		serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);

	let mut resources = state.resources.write().unwrap();
	let key = (api_path, name);

	let Some(existing) = resources.get(&key).cloned() else {
		if is_apply && !is_status {
			let created = state.stamp_created(patch, namespace_of(&key.0));
			resources.insert(key, created.clone());
			return ResponseTemplate::new(201).set_body_json(created);
		}
		return status_response(404, "NotFound", "not found");
	};

	// Optimistic concurrency: a pinned resourceVersion must match
	let pinned = patch
		.pointer("/metadata/resourceVersion")
		.and_then(|v| v.as_str())
		.map(str::to_string);
	let current = existing
		.pointer("/metadata/resourceVersion")
		.and_then(|v| v.as_str());
	if let Some(pinned) = pinned {
		if Some(pinned.as_str()) != current {
			return status_response(
				409,
				"Conflict",
				"the object has been modified; please apply your changes to the latest version and try again",
			);
		}
	}

	let merged = if is_status {
		let status = patch
			.get_mut("status")
			.map(serde_json::Value::take)
			.unwrap_or(serde_json::Value::Null);
		merge_json(existing, serde_json::json!({ "status": status }))
	} else {
		if let Some(metadata) = patch.get_mut("metadata").and_then(|m| m.as_object_mut()) {
			metadata.remove("resourceVersion");
		}
		merge_json(existing, patch)
	};

	let updated = state.stamp_updated(merged);
	resources.insert(key, updated.clone());
	ResponseTemplate::new(200).set_body_json(updated)
}

/// POST - reject duplicates, persist otherwise.
fn handle_post(state: &State, req: &Request) -> ResponseTemplate {
	let path_str = req.url.path();
	let body: serde_json::Value =
		serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);

	let name = body
		.pointer("/metadata/name")
		.and_then(|v| v.as_str())
		.unwrap_or("")
		.to_string();
	if name.is_empty() {
		return status_response(422, "Invalid", "metadata.name: Required value");
	}

	let mut resources = state.resources.write().unwrap();
	let key = (path_str.to_string(), name);
	if resources.contains_key(&key) {
		return status_response(409, "AlreadyExists", "already exists");
	}

	let created = state.stamp_created(body, namespace_of(path_str));
	resources.insert(key, created.clone());
	ResponseTemplate::new(201).set_body_json(created)
}

/// GET - a single resource, or a LIST of a collection.
fn handle_get(state: &State, req: &Request) -> ResponseTemplate {
	let path_str = req.url.path();
	let resources = state.resources.read().unwrap();
	let (api_path, name) = parse_resource_path(path_str);

	if let Some(resource) = resources.get(&(api_path, name)) {
		return ResponseTemplate::new(200).set_body_json(resource.clone());
	}

	let items: Vec<_> = resources
		.iter()
		.filter(|((res_api_path, _), _)| res_api_path == path_str)
		.map(|(_, v)| v.clone())
		.collect();

	if !items.is_empty() {
		return ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "List",
			"apiVersion": "v1",
			"metadata": {"resourceVersion": state.revision.load(Ordering::SeqCst).to_string()},
			"items": items
		}));
	}

	status_response(404, "NotFound", "not found")
}

/// DELETE - remove the resource, honoring a uid precondition.
///
/// Objects are removed right away; there are no finalizers and no garbage
/// collection of dependents.
fn handle_delete(state: &State, req: &Request) -> ResponseTemplate {
	let key = parse_resource_path(req.url.path());
	let options: serde_json::Value =
		serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);

	let mut resources = state.resources.write().unwrap();
	let Some(existing) = resources.get(&key) else {
		return status_response(404, "NotFound", "not found");
	};

	if let Some(uid) = options
		.pointer("/preconditions/uid")
		.and_then(|v| v.as_str())
	{
		if existing.pointer("/metadata/uid").and_then(|v| v.as_str()) != Some(uid) {
			return status_response(
				409,
				"Conflict",
				"Precondition failed: UID in precondition does not match the UID in record",
			);
		}
	}

	let removed = resources.remove(&key).unwrap_or_default();
	debug!(path = %key.0, name = %key.1, "Deleted resource");
	ResponseTemplate::new(200).set_body_json(removed)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_api_path_for_manifest() {
		let discovery = MockDiscovery::default();
		let manifest = serde_json::json!({
			"apiVersion": "scan.example.com/v1",
			"kind": "ScanRequest",
			"metadata": { "name": "probe", "namespace": "scans" }
		});
		assert_eq!(
			api_path_for_manifest(&manifest, &discovery),
			Some((
				"/apis/scan.example.com/v1/namespaces/scans/scanrequests".to_string(),
				"probe".to_string()
			))
		);

		let namespace = serde_json::json!({
			"apiVersion": "v1",
			"kind": "Namespace",
			"metadata": { "name": "scans" }
		});
		assert_eq!(
			api_path_for_manifest(&namespace, &discovery),
			Some(("/api/v1/namespaces".to_string(), "scans".to_string()))
		);
	}

	#[tokio::test]
	async fn test_seeded_resources_are_stamped() {
		let server = HttpMockK8sServer::builder()
			.resources(vec![serde_json::json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": { "name": "settings", "namespace": "scans" }
			})])
			.build()
			.start()
			.await;

		let cm: k8s_openapi::api::core::v1::ConfigMap = server.get("scans", "settings").unwrap();
		assert!(cm.metadata.uid.is_some());
		assert!(cm.metadata.creation_timestamp.is_some());
		assert_eq!(cm.metadata.resource_version.as_deref(), Some("1"));
	}

	#[tokio::test]
	async fn test_delete_honors_uid_precondition() {
		use k8s_openapi::api::core::v1::ConfigMap;
		use kube::api::{Api, DeleteParams, Preconditions};

		let server = HttpMockK8sServer::builder()
			.resources(vec![serde_json::json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": { "name": "settings", "namespace": "scans" }
			})])
			.build()
			.start()
			.await;
		let api: Api<ConfigMap> = Api::namespaced(server.client().await, "scans");

		let mismatched = DeleteParams {
			preconditions: Some(Preconditions {
				uid: Some("someone-else".to_string()),
				resource_version: None,
			}),
			..DeleteParams::default()
		};
		let err = api.delete("settings", &mismatched).await.unwrap_err();
		assert!(matches!(err, kube::Error::Api(ref e) if e.code == 409));
		assert!(server.get::<ConfigMap>("scans", "settings").is_some());

		api.delete("settings", &DeleteParams::default()).await.unwrap();
		assert!(server.get::<ConfigMap>("scans", "settings").is_none());

		let err = api.delete("settings", &DeleteParams::default()).await.unwrap_err();
		assert!(matches!(err, kube::Error::Api(ref e) if e.code == 404));
	}
}
