//! Initializes the process-wide `tracing` subscriber (spec.md §2 row N).
//!
//! Every connection and request is logged through ordinary `tracing::{debug,
//! info,warn,error}` calls at their call sites (`proxy::frontend`,
//! `proxy::passthrough`, `transport::tls`, ...) rather than through a
//! dedicated logging façade — matching agentgateway's pervasive direct-macro
//! style rather than its `telemetry/log.rs` structured-request-log layer,
//! which depends on OpenTelemetry machinery this crate doesn't pull in.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Installs the global subscriber. `filter` is an `EnvFilter` directive
/// string (e.g. `"info"`, `"mockproxy=debug,info"`); `RUST_LOG` overrides it
/// when set, per `EnvFilter`'s usual precedence.
pub fn init(filter: &str) -> anyhow::Result<()> {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_span_events(FmtSpan::CLOSE)
		.try_init()
		.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
