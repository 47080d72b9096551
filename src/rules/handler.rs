//! Handlers (spec.md §3, §4.4, §4.5): the response-producing half of a rule,
//! modeled as a tagged enum per spec.md §9 "Polymorphism".

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::http::{Headers, RequestRecord};

/// A caller-supplied response description, used by `ReplyWith` and returned
/// from callbacks (spec.md §4.4).
#[derive(Debug, Clone, Default)]
pub struct ResponseSpec {
	pub status: u16,
	pub headers: Option<Headers>,
	/// Encoded automatically per the response's `Content-Encoding` header
	/// unless `raw_body` is set (spec.md §4.4 "automatic body encoding").
	pub body: Option<Bytes>,
	pub raw_body: Option<Bytes>,
}

impl ResponseSpec {
	pub fn new(status: u16) -> Self {
		Self { status, ..Default::default() }
	}

	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = Some(body.into());
		self
	}
}

#[derive(Debug, Clone)]
pub enum JsonRpcReply {
	Result(serde_json::Value),
	Error { code: i64, message: String },
}

/// What a callback handler (spec.md §4.4) may return.
pub enum CallbackOutcome {
	Respond(ResponseSpec),
	Close,
}

pub type CallbackFn =
	Arc<dyn Fn(RequestRecord) -> BoxFuture<'static, anyhow::Result<CallbackOutcome>> + Send + Sync>;

/// A factory for a stream handler's chunk sequence (spec.md §4.4); invoked
/// once per match since a rule can match more than once under `times(n)`.
pub type ChunkStreamFactory =
	Arc<dyn Fn() -> BoxStream<'static, Result<Bytes, std::io::Error>> + Send + Sync>;

/// What a `beforeRequest` hook (spec.md §4.5) may do to a request in
/// flight.
pub struct RequestTransform {
	pub method: Option<http::Method>,
	pub url: Option<String>,
	pub headers: Option<Headers>,
	pub body: Option<Bytes>,
}

pub enum BeforeRequestOutcome {
	Continue(RequestTransform),
	Close,
	Respond(ResponseSpec),
}

pub type BeforeRequestHook =
	Arc<dyn Fn(RequestRecord) -> BoxFuture<'static, anyhow::Result<BeforeRequestOutcome>> + Send + Sync>;

pub struct ResponseTransform {
	pub status: Option<u16>,
	pub headers: Option<Headers>,
	pub body: Option<Bytes>,
}

pub enum BeforeResponseOutcome {
	Continue(ResponseTransform),
	Close,
}

pub type BeforeResponseHook = Arc<
	dyn Fn(crate::http::ResponseRecord) -> BoxFuture<'static, anyhow::Result<BeforeResponseOutcome>> + Send + Sync,
>;

/// Pass-through (upstream forwarding) configuration (spec.md §4.5).
#[derive(Clone, Default)]
pub struct PassThroughConfig {
	pub before_request: Option<BeforeRequestHook>,
	pub before_response: Option<BeforeResponseHook>,
	/// `host:port` of an HTTP/HTTPS CONNECT proxy to chain through.
	pub proxy_chain: Option<String>,
	pub dns_override: HashMap<String, IpAddr>,
	/// Hostname suffixes that bypass `proxy_chain` (spec.md §4.5 step 3).
	pub no_proxy: Vec<String>,
	/// Extra trusted CA certificates (PEM), merged with the system trust
	/// store.
	pub trusted_cas: Vec<String>,
	pub simulate_connection_errors: bool,
	/// Overrides the TLS server certificate the upstream client presents
	/// validation against, for testing a self-signed upstream.
	pub tls_server_cert_override: Option<String>,
}

impl std::fmt::Debug for PassThroughConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PassThroughConfig")
			.field("has_before_request", &self.before_request.is_some())
			.field("has_before_response", &self.before_response.is_some())
			.field("proxy_chain", &self.proxy_chain)
			.field("simulate_connection_errors", &self.simulate_connection_errors)
			.finish()
	}
}

/// A handler variant (spec.md §3, §4.4).
#[derive(Clone)]
pub enum Handler {
	ReplyWith(ResponseSpec),
	ReplyWithJsonRpc(JsonRpcReply),
	Callback(CallbackFn),
	Stream(ChunkStreamFactory),
	CloseConnection,
	TimeoutForever,
	PassThrough(PassThroughConfig),
}

impl std::fmt::Debug for Handler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Handler::ReplyWith(spec) => f.debug_tuple("ReplyWith").field(spec).finish(),
			Handler::ReplyWithJsonRpc(r) => f.debug_tuple("ReplyWithJsonRpc").field(r).finish(),
			Handler::Callback(_) => write!(f, "Callback(..)"),
			Handler::Stream(_) => write!(f, "Stream(..)"),
			Handler::CloseConnection => write!(f, "CloseConnection"),
			Handler::TimeoutForever => write!(f, "TimeoutForever"),
			Handler::PassThrough(cfg) => f.debug_tuple("PassThrough").field(cfg).finish(),
		}
	}
}
