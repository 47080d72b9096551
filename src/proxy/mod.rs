//! The connection frontend and orchestrator (spec.md §2 row C/F/G/H, §4.1,
//! §4.4-§4.6): the single listening surface that classifies, optionally
//! intercepts TLS, parses HTTP, matches rules, and dispatches handlers.

pub mod dispatch;
pub mod frontend;
pub mod passthrough;
pub mod request;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::ca::CertificateAuthority;
use crate::config::Config;
use crate::events::Bus;
use crate::rules::RuleStore;
use crate::telemetry::metrics::Metrics;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Ca(#[from] crate::ca::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Bound on how long the socket classifier and TLS/SOCKS handshakes wait
/// for the peer's first bytes before giving up (spec.md §4.1, §5).
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);
/// Header block this large without a terminating blank line is treated as
/// an overflow (spec.md §4.10, §8 scenario 4).
pub const MAX_HEADER_BLOCK: usize = 16 * 1024;

/// The mocking proxy: owns the rule table, certificate authority, and event
/// bus, and drives the listening sockets (spec.md §6 "Listening surface").
pub struct Server {
	pub config: Config,
	pub rules: Arc<RuleStore>,
	pub bus: Arc<Bus>,
	pub ca: Option<Arc<CertificateAuthority>>,
	pub metrics: Arc<Metrics>,
}

impl Server {
	pub fn new(config: Config, rules: Arc<RuleStore>, bus: Arc<Bus>) -> Result<Self, Error> {
		let ca = config.ca.as_ref().map(CertificateAuthority::load).transpose()?.map(Arc::new);
		Ok(Self { config, rules, bus, ca, metrics: Arc::new(Metrics::new()) })
	}

	/// Runs the listeners until `shutdown` is cancelled, then drains
	/// in-flight connections up to `drain_deadline` before returning
	/// (spec.md §6 "Exit conditions").
	pub async fn run(self: Arc<Self>, shutdown: CancellationToken, drain_deadline: Duration) -> Result<(), Error> {
		let listener = TcpListener::bind(self.config.listen_addr).await?;
		tracing::info!(addr = %self.config.listen_addr, "listening");

		let socks_listener = match self.config.socks_addr {
			Some(addr) => Some(TcpListener::bind(addr).await?),
			None => None,
		};
		if let Some(addr) = self.config.socks_addr {
			tracing::info!(addr = %addr, "listening (socks)");
		}

		let tracker = tokio_util::task::TaskTracker::new();

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				accepted = listener.accept() => {
					let Ok((stream, peer)) = accepted else { continue };
					let server = self.clone();
					let token = shutdown.clone();
					tracker.spawn(async move {
						frontend::handle_connection(server, stream, peer, false, token).await;
					});
				},
				accepted = accept_optional(&socks_listener) => {
					let Ok((stream, peer)) = accepted else { continue };
					let server = self.clone();
					let token = shutdown.clone();
					tracker.spawn(async move {
						frontend::handle_connection(server, stream, peer, true, token).await;
					});
				},
			}
		}

		tracker.close();
		tokio::select! {
			_ = tracker.wait() => {},
			_ = tokio::time::sleep(drain_deadline) => {
				tracing::warn!("drain deadline elapsed; remaining connections will be reset");
			},
		}
		Ok(())
	}
}

async fn accept_optional(listener: &Option<TcpListener>) -> std::io::Result<(tokio::net::TcpStream, SocketAddr)> {
	match listener {
		Some(l) => l.accept().await,
		None => std::future::pending().await,
	}
}
