//! The SOCKS & raw-tunnel front (spec.md §4.11): SOCKSv4/4a/5/5h
//! authentication and destination capture, ahead of the ordinary connection
//! classifier.

pub mod metadata;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("connection closed before a complete SOCKS request was read")]
	UnexpectedEof,
	#[error("unsupported SOCKS version byte {0:#x}")]
	UnsupportedVersion(u8),
	#[error("unsupported SOCKS command {0:#x}")]
	UnsupportedCommand(u8),
	#[error("no acceptable SOCKSv5 auth method offered")]
	NoAcceptableAuthMethod,
	#[error("SOCKS auth metadata was rejected: {0}")]
	InvalidMetadata(#[from] metadata::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Which SOCKSv5 auth methods this front will negotiate (spec.md §4.11:
/// "Auth methods accepted are configurable").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicy {
	pub no_auth: bool,
	pub user_password_metadata: bool,
	pub custom_metadata: bool,
}

impl AuthPolicy {
	pub fn all() -> Self {
		Self { no_auth: true, user_password_metadata: true, custom_metadata: true }
	}

	pub fn from_names(names: &[String]) -> Self {
		if names.is_empty() {
			return Self::all();
		}
		Self {
			no_auth: names.iter().any(|n| n == "no-auth"),
			user_password_metadata: names.iter().any(|n| n == "user-password-metadata"),
			custom_metadata: names.iter().any(|n| n == "custom-metadata"),
		}
	}
}

const SOCKS5_NO_AUTH: u8 = 0x00;
const SOCKS5_USER_PASSWORD: u8 = 0x02;
const SOCKS5_CUSTOM_METADATA: u8 = 0xDA;
const SOCKS5_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Where a SOCKS `CONNECT` pointed: a literal hostname (preferred, and what
/// SOCKSv5h/domain-ATYP carries) or a bare address (spec.md §4.11: "if IP,
/// the URL hostname is later derived from Host header or SNI, with the IP
/// retained as the observed peer").
#[derive(Debug, Clone)]
pub enum Destination {
	Hostname(String, u16),
	Addr(SocketAddr),
}

impl Destination {
	pub fn port(&self) -> u16 {
		match self {
			Destination::Hostname(_, port) => *port,
			Destination::Addr(addr) => addr.port(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct SocksResult {
	pub destination: Destination,
	/// Tags appended to the connection's tag list, prefixed
	/// `socket-metadata:` (spec.md §4.11/§9).
	pub tags: Vec<String>,
}

/// Runs the SOCKS handshake on `stream`, consuming exactly the handshake
/// bytes and leaving the stream positioned at the start of the tunneled
/// payload. The version byte (already peeked by the classifier) is read
/// again here since this front owns full consumption.
pub async fn handshake(stream: &mut TcpStream, auth: &AuthPolicy) -> Result<SocksResult, Error> {
	let version = read_u8(stream).await?;
	match version {
		0x04 => handshake_v4(stream).await,
		0x05 => handshake_v5(stream, auth).await,
		other => Err(Error::UnsupportedVersion(other)),
	}
}

async fn handshake_v4(stream: &mut TcpStream) -> Result<SocksResult, Error> {
	let cmd = read_u8(stream).await?;
	if cmd != CMD_CONNECT {
		return Err(Error::UnsupportedCommand(cmd));
	}
	let port = read_u16(stream).await?;
	let mut ip = [0u8; 4];
	stream.read_exact(&mut ip).await?;
	let _userid = read_null_terminated(stream).await?;

	// SOCKSv4a: 0.0.0.x (x != 0) signals "resolve this domain name instead",
	// which follows immediately after the userid.
	let is_v4a = ip[0] == 0 && ip[1] == 0 && ip[2] == 0 && ip[3] != 0;
	let destination = if is_v4a {
		let domain = read_null_terminated(stream).await?;
		Destination::Hostname(domain, port)
	} else {
		Destination::Addr(SocketAddr::from((Ipv4Addr::from(ip), port)))
	};

	write_v4_reply(stream, true).await?;
	Ok(SocksResult { destination, tags: Vec::new() })
}

async fn write_v4_reply(stream: &mut TcpStream, granted: bool) -> Result<(), Error> {
	let mut reply = [0u8; 8];
	reply[1] = if granted { 0x5A } else { 0x5B };
	stream.write_all(&reply).await?;
	Ok(())
}

async fn handshake_v5(stream: &mut TcpStream, auth: &AuthPolicy) -> Result<SocksResult, Error> {
	let nmethods = read_u8(stream).await?;
	let mut methods = vec![0u8; nmethods as usize];
	stream.read_exact(&mut methods).await?;

	let chosen = select_method(&methods, auth);
	stream.write_all(&[0x05, chosen]).await?;
	if chosen == SOCKS5_NO_ACCEPTABLE {
		return Err(Error::NoAcceptableAuthMethod);
	}

	let tags = match chosen {
		SOCKS5_NO_AUTH => Vec::new(),
		SOCKS5_USER_PASSWORD => negotiate_user_password(stream).await?,
		SOCKS5_CUSTOM_METADATA => negotiate_custom_metadata(stream).await?,
		_ => unreachable!("select_method only returns offered, policy-enabled methods"),
	};

	let destination = read_v5_request(stream).await?;
	write_v5_reply(stream, 0x00).await?;
	Ok(SocksResult { destination, tags })
}

fn select_method(offered: &[u8], auth: &AuthPolicy) -> u8 {
	if auth.custom_metadata && offered.contains(&SOCKS5_CUSTOM_METADATA) {
		return SOCKS5_CUSTOM_METADATA;
	}
	if auth.user_password_metadata && offered.contains(&SOCKS5_USER_PASSWORD) {
		return SOCKS5_USER_PASSWORD;
	}
	if auth.no_auth && offered.contains(&SOCKS5_NO_AUTH) {
		return SOCKS5_NO_AUTH;
	}
	SOCKS5_NO_ACCEPTABLE
}

/// RFC 1929 username/password negotiation, with the password field carrying
/// the metadata payload (spec.md §4.11 "user-password-metadata").
async fn negotiate_user_password(stream: &mut TcpStream) -> Result<Vec<String>, Error> {
	let _sub_version = read_u8(stream).await?;
	let ulen = read_u8(stream).await?;
	let mut uname = vec![0u8; ulen as usize];
	stream.read_exact(&mut uname).await?;
	let plen = read_u8(stream).await?;
	let mut passwd = vec![0u8; plen as usize];
	stream.read_exact(&mut passwd).await?;

	match metadata::decode_tags(&passwd) {
		Ok(tags) => {
			stream.write_all(&[0x01, 0x00]).await?;
			Ok(tags)
		},
		Err(e) => {
			stream.write_all(&[0x01, 0x01]).await?;
			Err(Error::InvalidMetadata(e))
		},
	}
}

/// Custom-metadata negotiation (spec.md §4.11): a length-prefixed payload,
/// accepted with `05 00` or rejected with `05 DA <len> <error-JSON>`.
async fn negotiate_custom_metadata(stream: &mut TcpStream) -> Result<Vec<String>, Error> {
	let len = read_u16(stream).await?;
	let mut payload = vec![0u8; len as usize];
	stream.read_exact(&mut payload).await?;

	match metadata::decode_tags(&payload) {
		Ok(tags) => {
			stream.write_all(&[0x05, 0x00]).await?;
			Ok(tags)
		},
		Err(e) => {
			let body = metadata::error_payload(&e.to_string());
			let mut reply = vec![0x05, SOCKS5_CUSTOM_METADATA, body.len() as u8];
			reply.extend_from_slice(&body);
			stream.write_all(&reply).await?;
			Err(Error::InvalidMetadata(e))
		},
	}
}

async fn read_v5_request(stream: &mut TcpStream) -> Result<Destination, Error> {
	let version = read_u8(stream).await?;
	if version != 0x05 {
		return Err(Error::UnsupportedVersion(version));
	}
	let cmd = read_u8(stream).await?;
	if cmd != CMD_CONNECT {
		return Err(Error::UnsupportedCommand(cmd));
	}
	let _reserved = read_u8(stream).await?;
	let atyp = read_u8(stream).await?;

	match atyp {
		ATYP_IPV4 => {
			let mut ip = [0u8; 4];
			stream.read_exact(&mut ip).await?;
			let port = read_u16(stream).await?;
			Ok(Destination::Addr(SocketAddr::from((Ipv4Addr::from(ip), port))))
		},
		ATYP_IPV6 => {
			let mut ip = [0u8; 16];
			stream.read_exact(&mut ip).await?;
			let port = read_u16(stream).await?;
			Ok(Destination::Addr(SocketAddr::from((Ipv6Addr::from(ip), port))))
		},
		ATYP_DOMAIN => {
			let len = read_u8(stream).await?;
			let mut domain = vec![0u8; len as usize];
			stream.read_exact(&mut domain).await?;
			let port = read_u16(stream).await?;
			Ok(Destination::Hostname(String::from_utf8_lossy(&domain).into_owned(), port))
		},
		other => Err(Error::UnsupportedCommand(other)),
	}
}

async fn write_v5_reply(stream: &mut TcpStream, rep: u8) -> Result<(), Error> {
	// Bind address is not meaningful for a mock proxy; echo an unspecified
	// IPv4 address, as most clients ignore it for CONNECT.
	let reply = [0x05, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
	stream.write_all(&reply).await?;
	Ok(())
}

async fn read_u8(stream: &mut TcpStream) -> Result<u8, Error> {
	let mut buf = [0u8; 1];
	stream.read_exact(&mut buf).await.map_err(|_| Error::UnexpectedEof)?;
	Ok(buf[0])
}

async fn read_u16(stream: &mut TcpStream) -> Result<u16, Error> {
	let mut buf = [0u8; 2];
	stream.read_exact(&mut buf).await.map_err(|_| Error::UnexpectedEof)?;
	Ok(u16::from_be_bytes(buf))
}

async fn read_null_terminated(stream: &mut TcpStream) -> Result<String, Error> {
	let mut out = Vec::new();
	loop {
		let byte = read_u8(stream).await?;
		if byte == 0 {
			return Ok(String::from_utf8_lossy(&out).into_owned());
		}
		out.push(byte);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn pair() -> (TcpStream, TcpStream) {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let client = TcpStream::connect(addr).await.unwrap();
		let (server, _) = listener.accept().await.unwrap();
		(client, server)
	}

	#[tokio::test]
	async fn v4a_handshake_carries_domain_and_no_tags() {
		let (mut client, mut server) = pair().await;
		let mut request = vec![0x04, CMD_CONNECT];
		request.extend_from_slice(&80u16.to_be_bytes());
		request.extend_from_slice(&[0, 0, 0, 1]);
		request.push(0); // empty userid
		request.extend_from_slice(b"example.com\0");

		let client_task = tokio::spawn(async move {
			client.write_all(&request).await.unwrap();
			let mut reply = [0u8; 8];
			client.read_exact(&mut reply).await.unwrap();
			reply
		});

		let result = handshake(&mut server, &AuthPolicy::all()).await.unwrap();
		let reply = client_task.await.unwrap();
		assert_eq!(reply[1], 0x5A);
		assert!(matches!(result.destination, Destination::Hostname(h, 80) if h == "example.com"));
		assert!(result.tags.is_empty());
	}

	#[tokio::test]
	async fn v5_no_auth_domain_connect() {
		let (mut client, mut server) = pair().await;
		let client_task = tokio::spawn(async move {
			client.write_all(&[0x05, 0x01, SOCKS5_NO_AUTH]).await.unwrap();
			let mut method_reply = [0u8; 2];
			client.read_exact(&mut method_reply).await.unwrap();
			assert_eq!(method_reply, [0x05, SOCKS5_NO_AUTH]);

			let mut req = vec![0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 11];
			req.extend_from_slice(b"example.com");
			req.extend_from_slice(&443u16.to_be_bytes());
			client.write_all(&req).await.unwrap();

			let mut reply = [0u8; 10];
			client.read_exact(&mut reply).await.unwrap();
			reply
		});

		let result = handshake(&mut server, &AuthPolicy::all()).await.unwrap();
		let reply = client_task.await.unwrap();
		assert_eq!(reply[1], 0x00);
		assert!(matches!(result.destination, Destination::Hostname(h, 443) if h == "example.com"));
	}

	#[tokio::test]
	async fn v5_custom_metadata_tags_are_decoded_and_prefixed() {
		let (mut client, mut server) = pair().await;
		let payload = br#"{"tags":["t1"]}"#;
		let client_task = tokio::spawn(async move {
			client.write_all(&[0x05, 0x01, SOCKS5_CUSTOM_METADATA]).await.unwrap();
			let mut method_reply = [0u8; 2];
			client.read_exact(&mut method_reply).await.unwrap();
			assert_eq!(method_reply, [0x05, SOCKS5_CUSTOM_METADATA]);

			let mut metadata_frame = (payload.len() as u16).to_be_bytes().to_vec();
			metadata_frame.extend_from_slice(payload);
			client.write_all(&metadata_frame).await.unwrap();

			let mut auth_reply = [0u8; 2];
			client.read_exact(&mut auth_reply).await.unwrap();
			assert_eq!(auth_reply, [0x05, 0x00]);

			let mut req = vec![0x05, CMD_CONNECT, 0x00, ATYP_IPV4];
			req.extend_from_slice(&[127, 0, 0, 1]);
			req.extend_from_slice(&8080u16.to_be_bytes());
			client.write_all(&req).await.unwrap();

			let mut reply = [0u8; 10];
			client.read_exact(&mut reply).await.unwrap();
		});

		let result = handshake(&mut server, &AuthPolicy::all()).await.unwrap();
		client_task.await.unwrap();
		assert_eq!(result.tags, vec!["socket-metadata:t1".to_string()]);
		assert!(matches!(result.destination, Destination::Addr(a) if a.port() == 8080));
	}

	#[tokio::test]
	async fn v5_custom_metadata_invalid_json_resets_with_error_body() {
		let (mut client, mut server) = pair().await;
		let client_task = tokio::spawn(async move {
			client.write_all(&[0x05, 0x01, SOCKS5_CUSTOM_METADATA]).await.unwrap();
			let mut method_reply = [0u8; 2];
			client.read_exact(&mut method_reply).await.unwrap();

			let payload = b"not json";
			let mut frame = (payload.len() as u16).to_be_bytes().to_vec();
			frame.extend_from_slice(payload);
			client.write_all(&frame).await.unwrap();

			let mut header = [0u8; 3];
			client.read_exact(&mut header).await.unwrap();
			assert_eq!(header[0], 0x05);
			assert_eq!(header[1], SOCKS5_CUSTOM_METADATA);
			let mut body = vec![0u8; header[2] as usize];
			client.read_exact(&mut body).await.unwrap();
			assert!(serde_json::from_slice::<serde_json::Value>(&body).is_ok());
		});

		let err = handshake(&mut server, &AuthPolicy::all()).await;
		assert!(matches!(err, Err(Error::InvalidMetadata(_))));
		client_task.await.unwrap();
	}
}
