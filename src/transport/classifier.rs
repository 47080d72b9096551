//! The socket classifier (spec.md §4.1): peek the first bytes off a raw TCP
//! connection (or a decrypted TLS stream) and decide which frontend should
//! own it, without consuming the peeked bytes.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

/// The classifier's dispatch decision, per the spec.md §4.1 table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
	TlsHandshake,
	Socks,
	Http1,
	Unknown,
}

const HTTP_METHOD_PREFIXES: &[&[u8]] = &[
	b"GET ", b"POST", b"HEAD", b"PUT ", b"CONNECT", b"OPTIONS", b"DELETE", b"PATCH", b"TRACE",
];

/// Peeks at least one byte (without consuming it) and classifies the
/// connection. Returns `Unknown` if the handshake deadline elapses before
/// any data arrives; callers are expected to close such connections.
pub async fn classify(stream: &TcpStream, handshake_deadline: Duration) -> io::Result<Kind> {
	let mut buf = [0u8; 16];
	let n = match tokio::time::timeout(handshake_deadline, peek_at_least_one(stream, &mut buf))
		.await
	{
		Ok(result) => result?,
		Err(_elapsed) => return Ok(Kind::Unknown),
	};
	Ok(classify_bytes(&buf[..n]))
}

async fn peek_at_least_one(stream: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
	loop {
		let n = stream.peek(buf).await?;
		if n > 0 {
			return Ok(n);
		}
	}
}

/// Classifies already-peeked bytes. Split out from [`classify`] so socket-
/// level tests don't need a live connection.
pub fn classify_bytes(buf: &[u8]) -> Kind {
	if buf.is_empty() {
		return Kind::Unknown;
	}
	match buf[0] {
		0x16 => Kind::TlsHandshake,
		0x04 | 0x05 => Kind::Socks,
		_ if looks_like_http1(buf) => Kind::Http1,
		_ => Kind::Unknown,
	}
}

fn looks_like_http1(buf: &[u8]) -> bool {
	HTTP_METHOD_PREFIXES
		.iter()
		.any(|prefix| buf.starts_with(prefix) || prefix.starts_with(buf))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tls_handshake_byte_routes_to_tls() {
		assert_eq!(classify_bytes(&[0x16, 0x03, 0x01]), Kind::TlsHandshake);
	}

	#[test]
	fn socks4_and_socks5_version_bytes_route_to_socks() {
		assert_eq!(classify_bytes(&[0x04]), Kind::Socks);
		assert_eq!(classify_bytes(&[0x05]), Kind::Socks);
	}

	#[test]
	fn http_method_prefixes_route_to_http1() {
		for line in ["GET / HTTP/1.1\r\n", "POST / HTTP/1.1\r\n", "CONNECT a:443 HTTP/1.1\r\n"] {
			assert_eq!(classify_bytes(line.as_bytes()), Kind::Http1, "{line}");
		}
	}

	#[test]
	fn garbage_is_unknown() {
		assert_eq!(classify_bytes(b"\x01\x02\x03\x04"), Kind::Unknown);
	}

	#[test]
	fn empty_peek_is_unknown() {
		assert_eq!(classify_bytes(&[]), Kind::Unknown);
	}
}
