//! DNS resolution honoring a per-request override map (spec.md §4.5 step 2:
//! "Resolves DNS honoring `lookupOptions.servers`"). Custom servers are
//! modeled here as a direct hostname→IP override map — a full pluggable
//! resolver is out of scope for the core (spec.md §1 Non-goals).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("could not resolve {host}")]
	NotFound { host: String },
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Resolves `host` to a socket address, preferring `overrides` and falling
/// back to the system resolver (spec.md §4.5: "falling back to the system
/// resolver if custom servers fail").
pub async fn resolve(host: &str, port: u16, overrides: &HashMap<String, IpAddr>) -> Result<SocketAddr, Error> {
	if let Some(ip) = overrides.get(host) {
		return Ok(SocketAddr::new(*ip, port));
	}
	if let Ok(ip) = host.parse::<IpAddr>() {
		return Ok(SocketAddr::new(ip, port));
	}
	lookup_host((host, port))
		.await?
		.next()
		.ok_or_else(|| Error::NotFound { host: host.to_string() })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn override_takes_precedence_over_system_resolution() {
		let mut overrides = HashMap::new();
		overrides.insert("example.com".to_string(), "10.0.0.5".parse().unwrap());
		let addr = resolve("example.com", 443, &overrides).await.unwrap();
		assert_eq!(addr, "10.0.0.5:443".parse().unwrap());
	}

	#[tokio::test]
	async fn literal_ip_resolves_without_lookup() {
		let addr = resolve("127.0.0.1", 80, &HashMap::new()).await.unwrap();
		assert_eq!(addr, "127.0.0.1:80".parse().unwrap());
	}
}
