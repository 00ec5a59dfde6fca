use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialises a `tracing_subscriber::registry` the same way across every
/// zeitwork binary: an `EnvFilter` read from `RUST_LOG` (defaulting to
/// `info`) plus a `fmt` layer. Component binaries are short-lived daemons
/// with no HTTP surface of their own, so no OpenTelemetry exporter is wired
/// up here (unlike the edge-proxy-facing `gateway`, which is out of core
/// scope for this workspace).
pub fn init(default_filter: &str) {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .init();
}
