//! Transparent TLS interception (spec.md §4.6).
//!
//! The ClientHello is parsed directly out of the peeked TCP bytes instead of
//! through rustls's `Acceptor`, so the decision to intercept or pass a
//! connection through untouched can be made without consuming anything off
//! the socket — passthrough connections are then relayed byte-for-byte by
//! the caller using the same, still-unread, `TcpStream`. The parser is
//! grounded on the peek-then-parse ClientHello readers used by the
//! SNI-sniffing proxies in the retrieval pack (see DESIGN.md).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::PrivatePkcs8KeyDer;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::ca::CertificateAuthority;

use super::TlsInfo;
use super::fingerprint::{self, HelloFields};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("timed out waiting for a complete ClientHello")]
	HandshakeTimeout,
	#[error("malformed ClientHello: {0}")]
	MalformedHello(&'static str),
	#[error("not a TLS ClientHello")]
	NotTls,
	#[error(transparent)]
	Ca(#[from] crate::ca::Error),
	#[error(transparent)]
	ServerConfig(#[from] rustls::Error),
	#[error(transparent)]
	Handshake(#[from] io::Error),
}

impl Error {
	/// Best-effort classification into the spec.md §6 `tls-client-error`
	/// failure causes. Rustls doesn't give callers a structured reason for a
	/// rejected handshake, so this keys off the io error kind it surfaces.
	pub fn failure_cause(&self) -> &'static str {
		match self {
			Error::Handshake(e)
				if matches!(e.kind(), io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof) =>
			{
				"reset"
			},
			Error::Handshake(_) => "cert-rejected",
			_ => "reset",
		}
	}
}

const MAX_HELLO_RECORD: usize = 16 * 1024;
const PEEK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

struct RawHello {
	sni: Option<String>,
	alpn: Vec<Vec<u8>>,
	cipher_suites: Vec<u16>,
}

/// Peeks (without consuming) a full TLS record carrying the ClientHello and
/// parses out SNI, ALPN and the offered cipher suites.
async fn peek_client_hello(stream: &TcpStream, deadline: Duration) -> Result<RawHello, Error> {
	let work = async {
		let mut buf = vec![0u8; 4096];
		loop {
			let n = stream.peek(&mut buf).await?;
			if n < 5 {
				tokio::time::sleep(PEEK_RETRY_INTERVAL).await;
				continue;
			}
			if buf[0] != 0x16 {
				return Err(Error::NotTls);
			}
			let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
			let total = 5 + record_len;
			if total > MAX_HELLO_RECORD {
				return Err(Error::MalformedHello("ClientHello record too large"));
			}
			if n < total {
				if total > buf.len() {
					buf.resize(total, 0);
				}
				tokio::time::sleep(PEEK_RETRY_INTERVAL).await;
				continue;
			}
			return parse_client_hello(&buf[..total]);
		}
	};
	timeout(deadline, work).await.map_err(|_| Error::HandshakeTimeout)?
}

/// Parses a single complete TLS record (record header included) containing a
/// ClientHello handshake message.
fn parse_client_hello(record: &[u8]) -> Result<RawHello, Error> {
	let err = || Error::MalformedHello("truncated ClientHello");
	if record.first() != Some(&0x16) {
		return Err(Error::NotTls);
	}
	let mut pos = 5; // record header: type(1) + version(2) + length(2)
	if pos + 4 > record.len() {
		return Err(err());
	}
	pos += 4; // handshake type(1) + length(3)

	if pos + 2 > record.len() {
		return Err(err());
	}
	pos += 2; // client_version

	if pos + 32 > record.len() {
		return Err(err());
	}
	pos += 32; // client random

	if pos + 1 > record.len() {
		return Err(err());
	}
	let session_id_len = record[pos] as usize;
	pos += 1 + session_id_len;
	if pos > record.len() {
		return Err(err());
	}

	if pos + 2 > record.len() {
		return Err(err());
	}
	let cipher_suites_len = u16::from_be_bytes([record[pos], record[pos + 1]]) as usize;
	pos += 2;
	if pos + cipher_suites_len > record.len() {
		return Err(err());
	}
	let cipher_suites = record[pos..pos + cipher_suites_len]
		.chunks_exact(2)
		.map(|c| u16::from_be_bytes([c[0], c[1]]))
		.collect();
	pos += cipher_suites_len;

	if pos + 1 > record.len() {
		return Err(err());
	}
	let compression_len = record[pos] as usize;
	pos += 1 + compression_len;
	if pos > record.len() {
		return Err(err());
	}

	let mut sni = None;
	let mut alpn = Vec::new();
	if pos + 2 <= record.len() {
		let extensions_len = u16::from_be_bytes([record[pos], record[pos + 1]]) as usize;
		pos += 2;
		let extensions_end = (pos + extensions_len).min(record.len());
		while pos + 4 <= extensions_end {
			let ext_type = u16::from_be_bytes([record[pos], record[pos + 1]]);
			let ext_len = u16::from_be_bytes([record[pos + 2], record[pos + 3]]) as usize;
			pos += 4;
			if pos + ext_len > extensions_end {
				break;
			}
			let ext_body = &record[pos..pos + ext_len];
			match ext_type {
				0 => sni = parse_sni_extension(ext_body),
				16 => alpn = parse_alpn_extension(ext_body),
				_ => {},
			}
			pos += ext_len;
		}
	}

	Ok(RawHello { sni, alpn, cipher_suites })
}

fn parse_sni_extension(body: &[u8]) -> Option<String> {
	if body.len() < 2 {
		return None;
	}
	let list_len = u16::from_be_bytes([body[0], body[1]]) as usize;
	let mut pos = 2;
	let end = (2 + list_len).min(body.len());
	while pos + 3 <= end {
		let name_type = body[pos];
		let name_len = u16::from_be_bytes([body[pos + 1], body[pos + 2]]) as usize;
		pos += 3;
		if pos + name_len > end {
			return None;
		}
		if name_type == 0 {
			return std::str::from_utf8(&body[pos..pos + name_len]).ok().map(str::to_string);
		}
		pos += name_len;
	}
	None
}

fn parse_alpn_extension(body: &[u8]) -> Vec<Vec<u8>> {
	let mut protocols = Vec::new();
	if body.len() < 2 {
		return protocols;
	}
	let list_len = u16::from_be_bytes([body[0], body[1]]) as usize;
	let mut pos = 2;
	let end = (2 + list_len).min(body.len());
	while pos + 1 <= end {
		let len = body[pos] as usize;
		pos += 1;
		if pos + len > end {
			break;
		}
		protocols.push(body[pos..pos + len].to_vec());
		pos += len;
	}
	protocols
}

/// Peeks just far enough to learn the SNI a client is asking for, without
/// consuming any bytes. Used to decide whether a connection falls under the
/// `tlsPassthrough` bypass list before committing to interception.
pub async fn peek_sni(stream: &TcpStream, handshake_deadline: Duration) -> Result<Option<String>, Error> {
	Ok(peek_client_hello(stream, handshake_deadline).await?.sni)
}

/// Completes a TLS handshake with a leaf certificate minted for the SNI the
/// client presented, returning the decrypted stream plus the fingerprinting
/// metadata attached to every request served over it.
pub async fn accept(
	stream: TcpStream,
	ca: &CertificateAuthority,
	handshake_deadline: Duration,
) -> Result<(TlsStream<TcpStream>, TlsInfo), Error> {
	let raw = peek_client_hello(&stream, handshake_deadline).await?;
	let suites: Vec<rustls::CipherSuite> =
		raw.cipher_suites.iter().map(|&c| rustls::CipherSuite::from(c)).collect();
	let fields = HelloFields { cipher_suites: &suites, alpn: &raw.alpn, sni_present: raw.sni.is_some() };
	let ja3 = fingerprint::ja3(&fields);
	let ja4 = fingerprint::ja4(&fields);

	let host = raw.sni.clone().unwrap_or_else(|| "<no-sni>".to_string());
	let entry = ca.certificate_for(&host).await?;
	let server_config = build_server_config(entry)?;

	let acceptor = TlsAcceptor::from(Arc::new(server_config));
	let tls_stream = timeout(handshake_deadline, acceptor.accept(stream))
		.await
		.map_err(|_| Error::HandshakeTimeout)??;

	let info = TlsInfo {
		sni: raw.sni,
		alpn: raw.alpn.iter().map(|a| String::from_utf8_lossy(a).to_string()).collect(),
		ja3,
		ja4,
	};
	Ok((tls_stream, info))
}

fn build_server_config(entry: crate::ca::CacheEntry) -> Result<rustls::ServerConfig, Error> {
	let key_der = entry.key_pair.serialize_der();
	let key = rustls_pki_types::PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der));
	let chain = vec![entry.cert_der, entry.ca_cert_der];
	let mut config = rustls::ServerConfig::builder().with_no_client_auth().with_single_cert(chain, key)?;
	config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
	Ok(config)
}

#[cfg(test)]
#[path = "tls_tests.rs"]
mod tests;
