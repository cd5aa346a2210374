//! Run command handler.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use scan_controller::{controller, OperatorConfig};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::telemetry::{self, LogFormat};

#[derive(Args)]
pub struct RunArgs {
	/// Path to the operator config file (YAML)
	#[arg(short = 'c', long)]
	pub config: Option<PathBuf>,

	/// Only watch ScanRequests in this namespace (default: all namespaces)
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// Image for scan containers, overrides the config file
	#[arg(long)]
	pub image: Option<String>,

	/// Log level (possible values: error, warn, info, debug, trace)
	#[arg(long)]
	pub log_level: Option<Level>,

	/// Log output format
	#[arg(long, value_enum, default_value_t = LogFormat::Auto)]
	pub log_format: LogFormat,
}

/// Merge the config file with command line overrides.
fn resolve_config(args: &RunArgs) -> Result<OperatorConfig> {
	let mut config = match &args.config {
		Some(path) => OperatorConfig::load_from_file(path)?,
		None => OperatorConfig::default(),
	};

	if let Some(namespace) = &args.namespace {
		config.namespace = Some(namespace.clone());
	}
	if let Some(image) = &args.image {
		config.image = image.clone();
	}

	Ok(config)
}

pub fn run(args: RunArgs) -> Result<()> {
	let config = resolve_config(&args)?;

	// Create a tokio runtime for async operations
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run_async(args, config))
}

async fn run_async(args: RunArgs, config: OperatorConfig) -> Result<()> {
	let _telemetry = telemetry::init(args.log_level, args.log_format)?;

	let client = kube::Client::try_default()
		.await
		.context("connecting to the Kubernetes API server")?;

	let shutdown = CancellationToken::new();
	tokio::spawn(cancel_on_signal(shutdown.clone()));

	controller::run(client, config, shutdown).await;
	Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
					_ = sigterm.recv() => tracing::info!("Received SIGTERM"),
				}
			}
			Err(e) => {
				tracing::warn!(error = %e, "failed to register SIGTERM handler");
				let _ = tokio::signal::ctrl_c().await;
			}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}

	tracing::info!("Shutting down");
	shutdown.cancel();
}

#[cfg(test)]
mod tests {
	use std::fs;

	use tempfile::TempDir;

	use super::*;

	fn args(config: Option<PathBuf>) -> RunArgs {
		RunArgs {
			config,
			namespace: None,
			image: None,
			log_level: None,
			log_format: LogFormat::Auto,
		}
	}

	#[test]
	fn test_resolve_config_defaults() {
		let config = resolve_config(&args(None)).unwrap();
		assert_eq!(config, OperatorConfig::default());
	}

	#[test]
	fn test_flags_override_file() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("operator.yaml");
		fs::write(&path, "image: from-file\nnamespace: file-ns\nfieldManager: scans").unwrap();

		let config = resolve_config(&RunArgs {
			namespace: Some("flag-ns".to_string()),
			..args(Some(path.clone()))
		})
		.unwrap();
		assert_eq!(config.namespace.as_deref(), Some("flag-ns"));
		assert_eq!(config.image, "from-file");
		assert_eq!(config.field_manager, "scans");

		let config = resolve_config(&RunArgs {
			image: Some("from-flag".to_string()),
			..args(Some(path))
		})
		.unwrap();
		assert_eq!(config.image, "from-flag");
		assert_eq!(config.namespace.as_deref(), Some("file-ns"));
	}

	#[test]
	fn test_missing_config_file_fails() {
		let temp = TempDir::new().unwrap();
		assert!(resolve_config(&args(Some(temp.path().join("missing.yaml")))).is_err());
	}
}
