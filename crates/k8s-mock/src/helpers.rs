//! Helper functions for mock Kubernetes testing.

use wiremock::ResponseTemplate;

/// Apply a JSON merge patch (RFC 7386) to `base`.
///
/// Objects are merged key by key, `null` removes a key, anything else replaces.
pub fn merge_json(base: serde_json::Value, patch: serde_json::Value) -> serde_json::Value {
	match (base, patch) {
		(serde_json::Value::Object(mut base_map), serde_json::Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				if patch_value.is_null() {
					base_map.remove(&key);
					continue;
				}
				let base_value = base_map.remove(&key).unwrap_or(serde_json::Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			serde_json::Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}

/// A `Status` failure response, as the API server sends it.
pub fn status_response(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

/// Parse a Kubernetes API path into (api_path, resource_name).
///
/// Examples:
/// - `/apis/batch/v1/namespaces/default/jobs/my-job` -> (`/apis/batch/v1/namespaces/default/jobs`, `my-job`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
pub fn parse_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	if let Some(last_slash) = path.rfind('/') {
		let api_path = &path[..last_slash];
		let name = &path[last_slash + 1..];
		(api_path.to_string(), name.to_string())
	} else {
		(path.to_string(), String::new())
	}
}

/// Namespace segment of a namespaced API path.
pub fn namespace_of(path: &str) -> Option<&str> {
	let (_, rest) = path.split_once("/namespaces/")?;
	let (namespace, _) = rest.split_once('/')?;
	Some(namespace)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_json_removes_nulls() {
		let merged = merge_json(
			serde_json::json!({"a": 1, "b": {"c": 2, "d": 3}}),
			serde_json::json!({"b": {"c": null, "e": 4}}),
		);
		assert_eq!(merged, serde_json::json!({"a": 1, "b": {"d": 3, "e": 4}}));
	}

	#[test]
	fn test_parse_resource_path() {
		assert_eq!(
			parse_resource_path("/apis/batch/v1/namespaces/default/jobs/probe-job"),
			(
				"/apis/batch/v1/namespaces/default/jobs".to_string(),
				"probe-job".to_string()
			)
		);
	}

	#[test]
	fn test_namespace_of() {
		assert_eq!(
			namespace_of("/apis/batch/v1/namespaces/scans/jobs"),
			Some("scans")
		);
		assert_eq!(namespace_of("/api/v1/namespaces"), None);
	}
}
