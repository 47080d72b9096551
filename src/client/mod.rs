//! The upstream client used by pass-through handlers (spec.md §4.5): resolves
//! the destination, optionally tunnels through a chained proxy, optionally
//! terminates TLS, and hands back a boxed duplex stream for the proxy module
//! to speak HTTP/1 or HTTP/2 over.

pub mod dns;
pub mod tls;

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::rules::handler::PassThroughConfig;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Dns(#[from] dns::Error),
	#[error(transparent)]
	Tls(#[from] tls::Error),
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error("proxy tunnel rejected the CONNECT: {0}")]
	TunnelRejected(String),
	#[error("pass-through configured to simulate a connection failure")]
	SimulatedFailure,
}

/// A boxed duplex byte stream, hiding whether the underlying connection is
/// plaintext or TLS-terminated, or passed through a chained proxy's tunnel.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}
pub type BoxedStream = Box<dyn DuplexStream>;

/// Opens a connection to `host:port`, honoring `opts`'s proxy chaining,
/// DNS override and no-proxy list, then layers TLS on top if `use_tls` is
/// set (spec.md §4.5 steps 1-4).
pub async fn connect(host: &str, port: u16, use_tls: bool, opts: &PassThroughConfig) -> Result<BoxedStream, Error> {
	if opts.simulate_connection_errors {
		return Err(Error::SimulatedFailure);
	}

	let tcp = match chained_proxy_for(host, port, opts) {
		Some(proxy_addr) => {
			let mut stream = connect_tcp_direct(proxy_addr, &opts.dns_override).await?;
			connect_tunnel(&mut stream, &format!("{host}:{port}")).await?;
			stream
		},
		None => connect_tcp_direct(&format!("{host}:{port}"), &opts.dns_override).await?,
	};

	if use_tls {
		let tls = tls::handshake(tcp, host, &opts.trusted_cas, opts.tls_server_cert_override.as_deref()).await?;
		Ok(Box::new(tls))
	} else {
		Ok(Box::new(tcp))
	}
}

/// Returns the `host:port` of the chained proxy to use, or `None` if
/// `host` falls under `no_proxy` or no chain is configured (spec.md §4.5
/// step 3).
fn chained_proxy_for<'a>(host: &str, _port: u16, opts: &'a PassThroughConfig) -> Option<&'a str> {
	let proxy = opts.proxy_chain.as_deref()?;
	if is_no_proxy(host, &opts.no_proxy) { None } else { Some(proxy) }
}

/// Suffix-matches `host` against a `no_proxy` list entry: `example.com`
/// matches both `example.com` and any subdomain of it, mirroring the
/// conventional `NO_PROXY` semantics.
pub fn is_no_proxy(host: &str, no_proxy: &[String]) -> bool {
	no_proxy.iter().any(|suffix| {
		let suffix = suffix.trim_start_matches('.');
		host == suffix || host.ends_with(&format!(".{suffix}"))
	})
}

async fn connect_tcp_direct(addr: &str, dns_override: &std::collections::HashMap<String, std::net::IpAddr>) -> Result<TcpStream, Error> {
	let (host, port) = addr.rsplit_once(':').expect("addr is always host:port");
	let port: u16 = port.parse().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad port"))?;
	let resolved = dns::resolve(host, port, dns_override).await?;
	Ok(TcpStream::connect(resolved).await?)
}

/// Issues an HTTP `CONNECT` to establish a tunnel through a chained proxy
/// (spec.md §4.5 step 3). Grounded on
/// `crates/agentgateway/src/client/connect_tunnel.rs`.
async fn connect_tunnel(conn: &mut TcpStream, dest: &str) -> Result<(), Error> {
	let request = format!("CONNECT {dest} HTTP/1.1\r\nHost: {dest}\r\n\r\n");
	conn.write_all(request.as_bytes()).await?;

	let mut buf = [0u8; 8192];
	let mut pos = 0;
	loop {
		let n = conn.read(&mut buf[pos..]).await?;
		if n == 0 {
			return Err(Error::TunnelRejected("unexpected eof".to_string()));
		}
		pos += n;
		let received = &buf[..pos];
		if received.starts_with(b"HTTP/1.1 200") || received.starts_with(b"HTTP/1.0 200") {
			if received.ends_with(b"\r\n\r\n") {
				return Ok(());
			}
			if pos == buf.len() {
				return Err(Error::TunnelRejected("headers too long".to_string()));
			}
		} else if received.starts_with(b"HTTP/1.1 407") {
			return Err(Error::TunnelRejected("proxy required authentication".to_string()));
		} else {
			return Err(Error::TunnelRejected(String::from_utf8_lossy(received).trim().to_string()));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_proxy_matches_exact_host_and_subdomains() {
		let list = vec!["internal.example.com".to_string()];
		assert!(is_no_proxy("internal.example.com", &list));
		assert!(is_no_proxy("api.internal.example.com", &list));
		assert!(!is_no_proxy("example.com", &list));
		assert!(!is_no_proxy("notinternal.example.com", &list));
	}

	#[test]
	fn chained_proxy_is_skipped_for_no_proxy_hosts() {
		let mut opts = PassThroughConfig::default();
		opts.proxy_chain = Some("proxy.local:8080".to_string());
		opts.no_proxy = vec!["example.com".to_string()];
		assert_eq!(chained_proxy_for("example.com", 443, &opts), None);
		assert_eq!(chained_proxy_for("other.com", 443, &opts), Some("proxy.local:8080"));
	}

	#[tokio::test]
	async fn simulate_connection_errors_short_circuits() {
		let mut opts = PassThroughConfig::default();
		opts.simulate_connection_errors = true;
		let err = connect("example.com", 443, true, &opts).await;
		assert!(matches!(err, Err(Error::SimulatedFailure)));
	}

	#[tokio::test]
	async fn tunnel_rejects_non_200_response() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (mut sock, _) = listener.accept().await.unwrap();
			let mut buf = [0u8; 1024];
			let _ = sock.read(&mut buf).await.unwrap();
			sock.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await.unwrap();
		});
		let mut stream = TcpStream::connect(addr).await.unwrap();
		let err = connect_tunnel(&mut stream, "upstream.example:443").await;
		assert!(matches!(err, Err(Error::TunnelRejected(_))));
	}
}
