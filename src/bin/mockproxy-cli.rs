//! Thin binary wrapper around the `mockproxy` library (spec.md §1, **(NEW)**
//! ambient CLI): load YAML config, start the server, drain on Ctrl-C.
//! Grounded on agentgateway's `crates/agentgateway`/`crates/agentgateway-app`
//! library/binary split.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mockproxy::events::Bus;
use mockproxy::rules::RuleStore;
use mockproxy::{Config, Server};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "mockproxy-cli")]
#[command(about = "A programmable HTTP/HTTPS/WebSocket mocking proxy")]
struct Cli {
	/// Path to a YAML config file.
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// How long to wait for in-flight connections to drain on shutdown.
	#[arg(long, default_value_t = 5)]
	drain_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let config = match &cli.config {
		Some(path) => Config::load_file(path).await?,
		None => Config::from_raw(mockproxy::config::RawConfig::default())?,
	};

	mockproxy::telemetry::log::init(&config.logging_filter)?;
	tracing::info!(listen = %config.listen_addr, "mockproxy starting");

	let rules = Arc::new(RuleStore::default());
	let bus = Bus::new();
	let server = Arc::new(Server::new(config, rules, bus)?);

	let shutdown = CancellationToken::new();
	let shutdown_for_signal = shutdown.clone();
	tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("shutdown signal received, draining connections");
		shutdown_for_signal.cancel();
	});

	server.run(shutdown, Duration::from_secs(cli.drain_seconds)).await?;
	Ok(())
}
