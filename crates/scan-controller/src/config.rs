//! Operator configuration file support.
//!
//! The file is YAML with camelCase keys; every key is optional.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::workload::WorkloadTemplate;

/// Image used for scan containers unless configured otherwise.
pub const DEFAULT_IMAGE: &str = "alpine";

/// Field manager name used for server-side apply and the managed-by label.
pub const DEFAULT_FIELD_MANAGER: &str = "scan-operator";

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
	/// Image of the scan container.
	pub image: String,

	/// Field manager for server-side apply.
	pub field_manager: String,

	/// Only watch ScanRequests in this namespace. All namespaces if unset.
	pub namespace: Option<String>,

	/// Retry timing after a failed reconciliation.
	pub backoff: BackoffConfig,
}

/// Exponential backoff bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
	pub base_seconds: u64,
	pub max_seconds: u64,
}

impl Default for OperatorConfig {
	fn default() -> Self {
		Self {
			image: DEFAULT_IMAGE.to_string(),
			field_manager: DEFAULT_FIELD_MANAGER.to_string(),
			namespace: None,
			backoff: BackoffConfig::default(),
		}
	}
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			base_seconds: 5,
			max_seconds: 300,
		}
	}
}

impl BackoffConfig {
	pub fn base(&self) -> Duration {
		Duration::from_secs(self.base_seconds)
	}

	pub fn max(&self) -> Duration {
		Duration::from_secs(self.max_seconds.max(self.base_seconds))
	}
}

impl OperatorConfig {
	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		let config: OperatorConfig = serde_yaml_with_quirks::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))?;
		Ok(config)
	}

	/// Template for the workloads built from this config.
	pub fn workload_template(&self) -> WorkloadTemplate {
		WorkloadTemplate {
			image: self.image.clone(),
			managed_by: self.field_manager.clone(),
		}
	}
}
