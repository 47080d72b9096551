//! Builds a canonical [`RequestRecord`] from a parsed `hyper` request plus
//! the connection metadata the frontend gathered ahead of it (spec.md §3,
//! §4.1, §4.11).

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use hyper::body::Incoming;

use crate::events::Bus;
use crate::http::body::Body;
use crate::http::{Destination, Headers, Protocol, RequestRecord};
use crate::transport::{ConnectionInfo, TlsInfo};
use crate::util::{Timing, new_request_id};

/// Builds a [`RequestRecord`] out of an incoming `hyper::Request`, resolving
/// the logical destination per spec.md §4.5 step 1's precedence (explicit
/// transform is applied later, in [`super::passthrough`]; here it's Host
/// header > URL authority > SNI > observed peer) and tagging
/// `Proxy-Authorization: Basic metadata:<payload>` credentials the same way
/// the SOCKS front tags `user-password-metadata` auth (spec.md §4.11).
pub fn build(
	req: hyper::Request<Incoming>,
	protocol: Protocol,
	conn: &ConnectionInfo,
	tls_info: Option<&TlsInfo>,
	max_body_size: usize,
	bus: &Arc<Bus>,
) -> RequestRecord {
	let method = req.method().clone();
	let version = req.version();
	let uri = req.uri().clone();

	let mut headers = Headers::new();
	for (name, value) in req.headers().iter() {
		headers.push(name.as_str(), value.to_str().unwrap_or(""));
	}

	let host_header = headers.get_first("host").map(|h| h.split(':').next().unwrap_or(h).to_string());
	let sni = tls_info.and_then(|t| t.sni.clone());
	let hostname = uri
		.host()
		.map(str::to_string)
		.or(host_header)
		.or(sni)
		.unwrap_or_else(|| conn.observed_peer.ip().to_string());
	let port = uri.port_u16().unwrap_or(protocol.default_port());

	let scheme = protocol.as_str();
	let path_and_query = uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_else(|| "/".to_string());
	let url = if uri.scheme().is_some() {
		uri.to_string()
	} else {
		format!("{scheme}://{hostname}:{port}{path_and_query}")
	};

	let mut tags = conn.tags.clone();
	if let Some(auth) = headers.get_first("proxy-authorization") {
		tags.extend(decode_proxy_authorization_tags(auth));
	}

	let id = new_request_id();
	let body = req.into_body();
	let streaming = crate::http::body::spawn_tee(body, max_body_size, bus.clone(), id.clone());

	RequestRecord {
		id,
		protocol,
		http_version: version,
		method,
		url,
		path: uri.path().to_string(),
		headers,
		destination: Destination { hostname, port, observed_peer: conn.observed_peer },
		remote_addr: conn.remote_addr,
		tags,
		timing: Timing::start(),
		body: Body::streaming(streaming),
	}
}

/// Decodes the tag payload from `Proxy-Authorization: Basic <base64>` when
/// the embedded username is `metadata`, sharing the JSON/base64url decoding
/// convention with [`crate::socks::metadata`] (spec.md §4.11 closing note).
/// Shared by the in-line HTTP path above and the raw CONNECT pre-scan in
/// [`super::frontend`].
pub fn decode_proxy_authorization_tags(header_value: &str) -> Vec<String> {
	let Some(b64) = header_value.strip_prefix("Basic ") else { return Vec::new() };
	let Ok(decoded) = BASE64_STANDARD.decode(b64.trim()) else { return Vec::new() };
	let Ok(text) = String::from_utf8(decoded) else { return Vec::new() };
	let Some((user, payload)) = text.split_once(':') else { return Vec::new() };
	if user != "metadata" {
		return Vec::new();
	}
	crate::socks::metadata::decode_tags(payload.as_bytes()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn non_metadata_username_yields_no_tags() {
		let credentials = BASE64_STANDARD.encode(b"alice:whatever");
		assert!(decode_proxy_authorization_tags(&format!("Basic {credentials}")).is_empty());
	}

	#[test]
	fn metadata_username_decodes_json_tags() {
		let credentials = BASE64_STANDARD.encode(br#"metadata:{"tags":["t1"]}"#);
		let tags = decode_proxy_authorization_tags(&format!("Basic {credentials}"));
		assert_eq!(tags, vec!["socket-metadata:t1".to_string()]);
	}
}
