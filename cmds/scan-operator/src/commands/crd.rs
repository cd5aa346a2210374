//! Crd command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use kube::CustomResourceExt;
use scan_controller::ScanRequest;

#[derive(Args)]
pub struct CrdArgs {}

/// Print the ScanRequest CustomResourceDefinition as YAML.
pub fn run<W: Write>(_args: CrdArgs, mut writer: W) -> Result<()> {
	let yaml =
		serde_yaml::to_string(&ScanRequest::crd()).context("serializing CustomResourceDefinition")?;
	writer
		.write_all(yaml.as_bytes())
		.context("writing CustomResourceDefinition")?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_crd_yaml() {
		let mut output = Vec::new();
		run(CrdArgs {}, &mut output).unwrap();

		let yaml = String::from_utf8(output).unwrap();
		assert!(yaml.contains("kind: CustomResourceDefinition"));
		assert!(yaml.contains("name: scanrequests.scan.example.com"));
		assert!(yaml.contains("kind: ScanRequest"));
	}
}
