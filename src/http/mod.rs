//! The canonical request/response records (spec.md §3) and the supporting
//! body, URL-normalization, compression and salvage-parsing submodules.

pub mod body;
pub mod compression;
pub mod salvage;
pub mod url;

use std::net::SocketAddr;

use indexmap::IndexMap;
use serde::Serialize;

use crate::util::{RequestId, Timing};
pub use body::Body;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("header value exceeds the configured limit")]
	HeaderOverflow,
	#[error("malformed request line")]
	MalformedRequestLine,
	#[error("unsupported HTTP method {0:?}")]
	UnsupportedMethod(String),
	#[error("body exceeded the configured maximum size")]
	BodyTooLarge,
	#[error("unsupported content-encoding {0:?}")]
	UnsupportedEncoding(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Protocol as observed by the connection frontend (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	Http,
	Https,
	Ws,
	Wss,
}

impl Protocol {
	pub fn default_port(self) -> u16 {
		match self {
			Protocol::Http | Protocol::Ws => 80,
			Protocol::Https | Protocol::Wss => 443,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Protocol::Http => "http",
			Protocol::Https => "https",
			Protocol::Ws => "ws",
			Protocol::Wss => "wss",
		}
	}
}

/// The destination a request is addressed to: the hostname as believed by
/// the client, the port, and the peer the client actually connected to
/// (spec.md §3) — these diverge once a CONNECT tunnel or SOCKS front has
/// re-pointed the logical destination.
#[derive(Debug, Clone, Serialize)]
pub struct Destination {
	pub hostname: String,
	pub port: u16,
	pub observed_peer: SocketAddr,
}

/// An ordered, case-preserving raw header list, alongside the lowercase
/// parsed view with duplicate keys folded into an ordered sequence
/// (spec.md §3 — "the raw list is canonical; the parsed view is derived").
#[derive(Debug, Clone, Default, Serialize)]
pub struct Headers {
	pub raw: Vec<(String, String)>,
}

impl Headers {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.raw.push((name.into(), value.into()));
	}

	/// Derives the lowercase, duplicate-folding parsed view on demand — the
	/// raw list stays canonical (spec.md §3).
	pub fn parsed(&self) -> IndexMap<String, Vec<String>> {
		let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
		for (name, value) in &self.raw {
			map.entry(name.to_ascii_lowercase()).or_default().push(value.clone());
		}
		map
	}

	pub fn get_first(&self, name: &str) -> Option<&str> {
		self.raw.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
	}

	pub fn remove(&mut self, name: &str) {
		self.raw.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
	}

	pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
		let name = name.into();
		self.remove(&name);
		self.push(name, value);
	}
}

/// Hop-by-hop headers stripped before forwarding a message upstream or
/// downstream (spec.md §4.5), per RFC 7230 §6.1 plus `Proxy-Authorization`.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];

/// Immutable snapshot of an inbound request (spec.md §3).
#[derive(Debug, Clone)]
pub struct RequestRecord {
	pub id: RequestId,
	pub protocol: Protocol,
	pub http_version: http::Version,
	pub method: http::Method,
	pub url: String,
	pub path: String,
	pub headers: Headers,
	pub destination: Destination,
	pub remote_addr: SocketAddr,
	pub tags: Vec<String>,
	pub timing: Timing,
	pub body: Body,
}

impl RequestRecord {
	/// `tags` plus, if the body has since been truncated against
	/// `maxBodySize`, a late `"body-truncated"` tag — `tags` itself is frozen
	/// at build time, before the body has necessarily arrived, so this is
	/// the up-to-date view (spec.md §3 "Body truncation is observable via
	/// the tag stream ... and never silent").
	pub fn observed_tags(&self) -> Vec<String> {
		let mut tags = self.tags.clone();
		if self.body.is_truncated() {
			tags.push("body-truncated".to_string());
		}
		tags
	}
}

/// Immutable snapshot of an outbound response (spec.md §3). HTTP/2
/// pseudo-headers are never allowed into `headers` (spec.md §3).
#[derive(Debug, Clone)]
pub struct ResponseRecord {
	pub status: http::StatusCode,
	pub headers: Headers,
	pub trailers: Option<Headers>,
	pub body: Body,
	pub timing: Timing,
}

impl ResponseRecord {
	pub fn new(status: http::StatusCode) -> Self {
		Self {
			status,
			headers: Headers::new(),
			trailers: None,
			body: Body::empty(),
			timing: Timing::start(),
		}
	}

	pub fn with_text(status: http::StatusCode, text: impl Into<String>) -> Self {
		let mut resp = Self::new(status);
		resp.body = Body::from_bytes(text.into().into_bytes());
		resp
	}

	pub fn with_json(status: http::StatusCode, value: &serde_json::Value) -> Self {
		let mut resp = Self::new(status);
		resp.headers.set("content-type", "application/json");
		resp.body = Body::from_bytes(serde_json::to_vec(value).unwrap_or_default());
		resp
	}
}
