//! Connection-level plumbing: the socket classifier (§4.1), the TLS
//! interceptor (§4.6), and shared connection metadata.

pub mod classifier;
pub mod fingerprint;
pub mod tls;

use std::net::SocketAddr;

/// Per-connection metadata threaded through to every request built on it.
/// `observed_peer` is the address the client actually connected to, which
/// may differ from `local_addr` once a CONNECT tunnel or SOCKS front has
/// re-pointed the logical destination (spec.md §3).
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
	pub remote_addr: SocketAddr,
	pub local_addr: SocketAddr,
	pub observed_peer: SocketAddr,
	pub tags: Vec<String>,
}

impl ConnectionInfo {
	pub fn new(remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
		Self {
			remote_addr,
			local_addr,
			observed_peer: local_addr,
			tags: Vec::new(),
		}
	}
}

/// TLS handshake metadata attached to requests served over an intercepted
/// connection (spec.md §4.6).
#[derive(Debug, Clone, Default)]
pub struct TlsInfo {
	pub sni: Option<String>,
	pub alpn: Vec<String>,
	pub ja3: String,
	pub ja4: String,
}
