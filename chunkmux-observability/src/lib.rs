pub mod tracing;

pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};

/// Log to stdout, adding OTLP export when `OTEL_EXPORTER_OTLP_ENDPOINT` is
/// set. Falls back to plain logging if the exporter cannot be built.
pub fn init_observability(service_name: &str, json: bool) {
    let config = TracingConfig {
        json,
        ..TracingConfig::from_env(service_name)
    };
    if let Err(e) = init_tracing(config) {
        init_minimal_logging();
        ::tracing::warn!("OpenTelemetry disabled: {}", e);
    }
}

/// fmt output filtered by `RUST_LOG`, nothing else.
pub fn init_minimal_logging() {
    use tracing_subscriber::prelude::*;

    let _ = tracing_subscriber::registry()
        .with(tracing::env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
