//! Per-connection orchestration (spec.md §4.1, §4.4-§4.6, §4.11): classify,
//! optionally intercept TLS or run the SOCKS front, and serve HTTP over
//! whatever's left using `hyper`'s auto h1/h2 connection builder.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::client;
use crate::events::{AbortEvent, ClientErrorEvent, Event, TlsClientErrorEvent};
use crate::http::{Protocol, ResponseRecord};
use crate::rules::Selection;
use crate::rules::handler::PassThroughConfig;
use crate::socks;
use crate::transport::classifier::{self, Kind};
use crate::transport::{ConnectionInfo, TlsInfo, tls as tls_transport};
use crate::util::new_request_id;

use super::{HANDSHAKE_DEADLINE, MAX_HEADER_BLOCK, Server};
use super::{dispatch, request};

type BoxBody = Full<Bytes>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
struct Aborted(String);

impl std::fmt::Display for Aborted {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::error::Error for Aborted {}

/// Entry point for one accepted TCP connection, whether it arrived on the
/// ordinary listener or the SOCKS listener.
pub async fn handle_connection(server: Arc<Server>, mut stream: TcpStream, peer: SocketAddr, via_socks: bool, shutdown: CancellationToken) {
	let _connection_guard = crate::telemetry::metrics::ConnectionGuard::new(server.metrics.clone());
	let local_addr = stream.local_addr().unwrap_or(peer);
	let mut conn = ConnectionInfo::new(peer, local_addr);
	let mut destination_hint = None;

	if via_socks {
		match socks::handshake(&mut stream, &server.config.socks_auth).await {
			Ok(result) => {
				conn.tags.extend(result.tags);
				destination_hint = Some(match result.destination {
					socks::Destination::Hostname(host, port) => (host, port),
					socks::Destination::Addr(addr) => {
						conn.observed_peer = addr;
						(addr.ip().to_string(), addr.port())
					},
				});
			},
			Err(e) => {
				tracing::debug!(error = %e, "socks handshake rejected");
				return;
			},
		}
	}

	tokio::select! {
		_ = serve_tunnel(server, stream, conn, destination_hint) => {},
		_ = shutdown.cancelled() => {},
	}
}

/// Classifies (or re-classifies, after a CONNECT or SOCKS handoff) the
/// connection and dispatches to the matching frontend (spec.md §4.1).
fn serve_tunnel(
	server: Arc<Server>,
	stream: TcpStream,
	conn: ConnectionInfo,
	destination_hint: Option<(String, u16)>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
	Box::pin(async move {
		let kind = match classifier::classify(&stream, HANDSHAKE_DEADLINE).await {
			Ok(k) => k,
			Err(_) => return,
		};
		match kind {
			Kind::TlsHandshake => serve_tls(server, stream, conn, destination_hint).await,
			Kind::Http1 => serve_cleartext(server, stream, conn, destination_hint).await,
			Kind::Socks | Kind::Unknown => {
				serve_raw_unknown(server, stream, conn, destination_hint, kind).await;
			},
		}
	})
}

/// "Unknown protocol" (spec.md §4.1): either relayed byte-for-byte to the
/// destination hint when `rawPassthrough` is configured, or rejected with a
/// client-error and reset.
async fn serve_raw_unknown(server: Arc<Server>, mut client_stream: TcpStream, conn: ConnectionInfo, destination_hint: Option<(String, u16)>, kind: Kind) {
	let request_id = new_request_id();

	let Some((host, port)) = destination_hint.filter(|_| server.config.raw_passthrough) else {
		tracing::debug!(?kind, "unsupported protocol; closing");
		server.bus.publish(Event::ClientError(ClientErrorEvent {
			request_id,
			code: "UNKNOWN_PROTOCOL".to_string(),
			tags: conn.tags,
			request: None,
		}));
		return;
	};

	let mut upstream = match client::connect(&host, port, false, &PassThroughConfig::default()).await {
		Ok(upstream) => upstream,
		Err(e) => {
			tracing::debug!(error = %e, %host, port, "raw-passthrough upstream connect failed");
			return;
		},
	};

	server.bus.publish(Event::RawPassthroughOpened { request_id: request_id.clone() });
	if let Err(e) = tokio::io::copy_bidirectional(&mut client_stream, &mut upstream).await {
		tracing::debug!(error = %e, "raw-passthrough relay ended");
	}
	server.bus.publish(Event::RawPassthroughClosed { request_id });
}

async fn serve_tls(server: Arc<Server>, stream: TcpStream, conn: ConnectionInfo, destination_hint: Option<(String, u16)>) {
	let sni = tls_transport::peek_sni(&stream, HANDSHAKE_DEADLINE).await.ok().flatten();
	if let Some(sni) = sni.as_ref().filter(|sni| server.config.tls_should_pass_through(sni)) {
		return serve_tls_passthrough(server, stream, sni.clone(), destination_hint).await;
	}

	let Some(ca) = server.ca.as_ref() else {
		tracing::debug!("TLS connection received but no certificate authority is configured");
		return;
	};

	match tls_transport::accept(stream, ca, HANDSHAKE_DEADLINE).await {
		Ok((tls_stream, tls_info)) => {
			serve_http(server, TokioIo::new(tls_stream), Protocol::Https, conn, Some(tls_info), destination_hint).await;
		},
		Err(e) => {
			let request_id = new_request_id();
			server.bus.publish(Event::TlsClientError(TlsClientErrorEvent {
				request_id,
				failure_cause: e.failure_cause(),
				sni: None,
				ja3: String::new(),
				ja4: String::new(),
			}));
			tracing::debug!(error = %e, "tls interception failed");
		},
	}
}

/// Relays a `tlsPassthrough`-listed connection byte-for-byte to the real
/// upstream without ever touching the TLS bytes (spec.md §4.6, §8
/// "`shouldPassThrough` is exclusive" — a connection that bypasses
/// interception never also goes through the matcher/handler pipeline).
async fn serve_tls_passthrough(server: Arc<Server>, mut client_stream: TcpStream, sni: String, destination_hint: Option<(String, u16)>) {
	let (host, port) = destination_hint.unwrap_or_else(|| (sni.clone(), 443));
	let request_id = new_request_id();

	let mut upstream = match client::connect(&host, port, false, &PassThroughConfig::default()).await {
		Ok(upstream) => upstream,
		Err(e) => {
			tracing::debug!(error = %e, %host, port, "tls-passthrough upstream connect failed");
			return;
		},
	};

	server.bus.publish(Event::TlsPassthroughOpened { request_id: request_id.clone(), sni: Some(sni) });
	if let Err(e) = tokio::io::copy_bidirectional(&mut client_stream, &mut upstream).await {
		tracing::debug!(error = %e, "tls-passthrough relay ended");
	}
	server.bus.publish(Event::TlsPassthroughClosed { request_id });
}

async fn serve_cleartext(server: Arc<Server>, mut stream: TcpStream, conn: ConnectionInfo, destination_hint: Option<(String, u16)>) {
	let mut peek_buf = [0u8; 8];
	let n = stream.peek(&mut peek_buf).await.unwrap_or(0);

	if peek_buf[..n].starts_with(b"CONNECT ") {
		match read_connect_request(&mut stream).await {
			Ok(connect) => {
				if stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await.is_err() {
					return;
				}
				let mut conn = conn;
				conn.tags.extend(connect.tags);
				serve_tunnel(server, stream, conn, Some((connect.host, connect.port))).await;
			},
			Err(e) => {
				tracing::debug!(error = %e, "malformed CONNECT request");
				let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
			},
		}
		return;
	}

	if let Some(salvaged) = check_header_overflow(&stream).await {
		let request_id = new_request_id();
		server.bus.publish(Event::ClientError(ClientErrorEvent {
			request_id,
			code: "HPE_HEADER_OVERFLOW".to_string(),
			tags: conn.tags.clone(),
			request: salvaged,
		}));
		let _ = stream.write_all(b"HTTP/1.1 431 Request Header Fields Too Large\r\nConnection: close\r\n\r\n").await;
		return;
	}

	serve_http(server, TokioIo::new(stream), Protocol::Http, conn, None, destination_hint).await;
}

struct ConnectTarget {
	host: String,
	port: u16,
	tags: Vec<String>,
}

/// Reads and fully consumes a `CONNECT host:port HTTP/1.1` request plus its
/// headers so the stream is left positioned at the start of the tunneled
/// payload (spec.md §4.1/§4.11). Assumes the client waits for the `200`
/// reply before sending tunnel bytes, per ordinary HTTP/1.1 proxy semantics;
/// any bytes that arrive ahead of that are discarded rather than replayed.
async fn read_connect_request(stream: &mut TcpStream) -> anyhow::Result<ConnectTarget> {
	let mut buf = Vec::new();
	let mut chunk = [0u8; 512];
	loop {
		let n = stream.read(&mut chunk).await?;
		if n == 0 {
			anyhow::bail!("connection closed before the CONNECT request completed");
		}
		buf.extend_from_slice(&chunk[..n]);
		if buf.len() > MAX_HEADER_BLOCK {
			anyhow::bail!("CONNECT header block exceeded the size limit");
		}
		if let Some(pos) = find_double_crlf(&buf) {
			buf.truncate(pos);
			break;
		}
	}

	let text = String::from_utf8_lossy(&buf);
	let mut lines = text.split("\r\n");
	let first_line = lines.next().filter(|l| !l.is_empty()).ok_or_else(|| anyhow::anyhow!("empty CONNECT request line"))?;
	let mut parts = first_line.split_whitespace();
	let method = parts.next().ok_or_else(|| anyhow::anyhow!("missing method"))?;
	if !method.eq_ignore_ascii_case("CONNECT") {
		anyhow::bail!("expected CONNECT, got {method}");
	}
	let authority = parts.next().ok_or_else(|| anyhow::anyhow!("missing CONNECT authority"))?;
	let (host, port) = authority.rsplit_once(':').ok_or_else(|| anyhow::anyhow!("CONNECT authority has no port"))?;
	let port: u16 = port.parse()?;

	let mut tags = Vec::new();
	for line in lines {
		if let Some((name, value)) = line.split_once(':') {
			if name.trim().eq_ignore_ascii_case("proxy-authorization") {
				tags.extend(request::decode_proxy_authorization_tags(value.trim()));
			}
		}
	}
	Ok(ConnectTarget { host: host.to_string(), port, tags })
}

/// Best-effort check for a header block that never terminates within
/// [`MAX_HEADER_BLOCK`] bytes (spec.md §4.10/§8 scenario 4): peeks, never
/// consumes, so a well-formed request still reaches `hyper` untouched.
async fn check_header_overflow(stream: &TcpStream) -> Option<crate::http::salvage::SalvagedRequest> {
	let mut buf = vec![0u8; MAX_HEADER_BLOCK + 1];
	let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(500);
	loop {
		let n = stream.peek(&mut buf).await.ok()?;
		if find_double_crlf(&buf[..n]).is_some() {
			return None;
		}
		if n > MAX_HEADER_BLOCK {
			return Some(crate::http::salvage::parse_best_effort(&buf[..n]).unwrap_or(crate::http::salvage::SalvagedRequest {
				method: None,
				url: None,
				version: None,
				headers: Vec::new(),
			}));
		}
		if tokio::time::Instant::now() >= deadline {
			return None;
		}
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
	buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

async fn serve_http<S>(
	server: Arc<Server>,
	io: TokioIo<S>,
	protocol: Protocol,
	conn: ConnectionInfo,
	tls_info: Option<TlsInfo>,
	destination_hint: Option<(String, u16)>,
) where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let service = hyper::service::service_fn(move |req| {
		handle_request(server.clone(), conn.clone(), protocol, tls_info.clone(), destination_hint.clone(), req)
	});

	let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
	if let Err(e) = builder.serve_connection_with_upgrades(io, service).await {
		tracing::debug!(error = %e, "connection ended");
	}
}

async fn handle_request(
	server: Arc<Server>,
	conn: ConnectionInfo,
	protocol: Protocol,
	tls_info: Option<TlsInfo>,
	destination_hint: Option<(String, u16)>,
	mut req: hyper::Request<Incoming>,
) -> Result<hyper::Response<BoxBody>, BoxError> {
	if req.method() == hyper::Method::CONNECT {
		return Ok(text_response(http::StatusCode::NOT_IMPLEMENTED, "nested CONNECT is not supported"));
	}

	let on_upgrade = hyper::upgrade::on(&mut req);

	let mut record = request::build(req, protocol, &conn, tls_info.as_ref(), server.config.max_body_size, &server.bus);
	if let Some((host, port)) = destination_hint {
		record.destination.hostname = host;
		record.destination.port = port;
	}

	server.bus.publish(Event::RequestInitiated { request_id: record.id.clone() });
	server.bus.publish(Event::Request { request_id: record.id.clone() });

	let selection = crate::rules::select(&server.rules, &record).await;
	let rule = match selection {
		Selection::Matched(rule) => {
			server.bus.publish(Event::RuleEvent { request_id: record.id.clone(), rule_id: rule.id.clone() });
			server.metrics.record_rule_hit(&rule.id);
			rule
		},
		Selection::NoneMatched => {
			let resp = ResponseRecord::with_text(http::StatusCode::SERVICE_UNAVAILABLE, "No rules were found matching this request");
			return Ok(finish_response(&server, &record.id, resp).await);
		},
	};

	match dispatch::run(&rule.handler, &record, &server.bus).await {
		dispatch::Outcome::Response(resp) => Ok(finish_response(&server, &record.id, resp).await),
		dispatch::Outcome::Abort { code, reason } => {
			server.bus.publish(Event::Abort(AbortEvent { request_id: record.id.clone(), reason: reason.clone() }));
			Err(Box::new(Aborted(format!("{code}: {reason}"))))
		},
		dispatch::Outcome::Forever => {
			std::future::pending::<()>().await;
			unreachable!("timeoutForever never resolves")
		},
		dispatch::Outcome::Upgrade { response, upstream } => {
			let hyper_response = to_hyper_response(response).await;
			tokio::spawn(async move {
				match on_upgrade.await {
					Ok(upgraded) => {
						let mut client_io = TokioIo::new(upgraded);
						let mut upstream = upstream;
						if let Err(e) = tokio::io::copy_bidirectional(&mut client_io, &mut upstream).await {
							tracing::debug!(error = %e, "protocol-upgrade relay ended");
						}
					},
					Err(e) => tracing::debug!(error = %e, "client did not complete the protocol upgrade"),
				}
			});
			Ok(hyper_response)
		},
	}
}

async fn finish_response(server: &Server, request_id: &crate::util::RequestId, resp: ResponseRecord) -> hyper::Response<BoxBody> {
	server.bus.publish(Event::ResponseInitiated { request_id: request_id.clone(), status: resp.status.as_u16() });
	server.bus.publish(Event::Response { request_id: request_id.clone(), status: resp.status.as_u16() });
	to_hyper_response(resp).await
}

async fn to_hyper_response(resp: ResponseRecord) -> hyper::Response<BoxBody> {
	let completed = resp.body.completed().await;
	let mut builder = hyper::Response::builder().status(resp.status);
	for (name, value) in &resp.headers.raw {
		builder = builder.header(name.as_str(), value.as_str());
	}
	builder.body(Full::new(completed.raw().clone())).unwrap_or_else(|_| {
		hyper::Response::builder()
			.status(http::StatusCode::INTERNAL_SERVER_ERROR)
			.body(Full::new(Bytes::from_static(b"response carried invalid headers")))
			.expect("a hardcoded response always builds")
	})
}

fn text_response(status: http::StatusCode, text: &'static str) -> hyper::Response<BoxBody> {
	hyper::Response::builder()
		.status(status)
		.header("content-type", "text/plain")
		.body(Full::new(Bytes::from_static(text.as_bytes())))
		.expect("a hardcoded response always builds")
}

