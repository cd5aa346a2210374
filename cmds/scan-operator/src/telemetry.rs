//! Logging and trace export for the operator process.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::ValueEnum;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "scan-operator";

/// Environment variable for service name (not exported by opentelemetry_sdk).
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Dependencies that are too chatty at the operator's own level.
const QUIET_TARGETS: &[&str] = &["hyper_util=warn", "tower=warn", "h2=warn"];

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	/// Pretty when stderr is a terminal, JSON otherwise.
	#[default]
	Auto,
	Pretty,
	Json,
}

/// Flushes exported spans when dropped.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("Failed to shutdown tracer provider: {e}");
			}
		}
	}
}

/// Build the log filter.
///
/// An explicit level wins over `RUST_LOG`, which wins over `info`.
fn filter(log_level: Option<Level>) -> EnvFilter {
	let filter = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};

	QUIET_TARGETS
		.iter()
		.filter_map(|directive| directive.parse().ok())
		.fold(filter, EnvFilter::add_directive)
}

/// Install the global subscriber.
///
/// Spans are additionally exported over OTLP when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` or `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is set;
/// the exporter is configured through the standard `OTEL_*` variables.
pub fn init(log_level: Option<Level>, format: LogFormat) -> Result<TelemetryGuard> {
	let pretty = match format {
		LogFormat::Auto => std::io::stderr().is_terminal(),
		LogFormat::Pretty => true,
		LogFormat::Json => false,
	};

	let fmt_layer = if pretty {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.pretty()
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.json()
			.with_current_span(true)
			.boxed()
	};

	let tracer_provider = otel_export_enabled()
		.then(tracer_provider)
		.transpose()?;

	let otel_layer = tracer_provider.as_ref().map(|provider| {
		tracing_opentelemetry::layer()
			.with_error_records_to_exceptions(true)
			.with_tracer(provider.tracer(SERVICE_NAME))
	});

	tracing_subscriber::registry()
		.with(filter(log_level))
		.with(fmt_layer)
		.with(otel_layer)
		.try_init()
		.context("installing tracing subscriber")?;

	Ok(TelemetryGuard { tracer_provider })
}

fn otel_export_enabled() -> bool {
	std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
		|| std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_ok()
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	let mut resource = Resource::builder();
	if std::env::var(OTEL_SERVICE_NAME).is_err() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let exporter = match std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL)
		.as_deref()
		.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?,
		_ => opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?,
	};

	let provider = SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build();
	opentelemetry::global::set_tracer_provider(provider.clone());

	Ok(provider)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_explicit_level_overrides_default() {
		let filter = filter(Some(Level::DEBUG)).to_string();
		assert!(filter.contains("debug"));
		assert!(filter.contains("hyper_util=warn"));
	}
}
