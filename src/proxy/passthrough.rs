//! The pass-through handler (spec.md §4.5): forwards a request to a real
//! upstream server, optionally rewriting it in flight, and reports the
//! result back as an ordinary [`ResponseRecord`] or an abort.
//!
//! Connections are opened fresh per call rather than pooled — this proxy
//! mocks a handful of requests per scenario, not a high-throughput gateway,
//! so the extra round trip is a deliberate simplification (see DESIGN.md).

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;

use crate::client;
use crate::events::{Bus, Event};
use crate::http::{Headers, ResponseRecord};
use crate::http::{HOP_BY_HOP_HEADERS, RequestRecord};
use crate::rules::handler::{
	BeforeRequestOutcome, BeforeResponseOutcome, PassThroughConfig, RequestTransform, ResponseTransform,
};
use crate::util::RequestId;

pub enum Outcome {
	Response(ResponseRecord),
	Abort { code: &'static str, reason: String },
	/// Upstream answered `101 Switching Protocols`: the caller relays bytes
	/// directly between the client and `upstream` once its own upgrade
	/// completes (spec.md §4.5 "WebSocket pass-through").
	Upgrade { response: ResponseRecord, upstream: client::BoxedStream },
}

fn bad_gateway(message: impl Into<String>) -> Outcome {
	Outcome::Response(ResponseRecord::with_text(http::StatusCode::BAD_GATEWAY, message.into()))
}

/// Runs a single pass-through forward for `req` (spec.md §4.5 steps 1-8).
pub async fn forward(req: &RequestRecord, cfg: &PassThroughConfig, bus: &Bus) -> Outcome {
	let mut method = req.method.clone();
	let mut url = req.url.clone();
	let mut headers = req.headers.clone();
	let mut body_bytes = req.body.completed().await.raw().clone();

	if let Some(hook) = &cfg.before_request {
		match hook(req.clone()).await {
			Ok(BeforeRequestOutcome::Respond(spec)) => {
				return Outcome::Response(super::dispatch::response_from_spec(spec).await);
			},
			Ok(BeforeRequestOutcome::Close) => {
				return Outcome::Abort { code: "CLOSE", reason: "Connection closed intentionally by rule".to_string() };
			},
			Ok(BeforeRequestOutcome::Continue(RequestTransform { method: m, url: u, headers: h, body: b })) => {
				if let Some(m) = m {
					method = m;
				}
				if let Some(u) = u {
					url = u;
				}
				if let Some(h) = h {
					headers = h;
				}
				if let Some(b) = b {
					body_bytes = b;
				}
			},
			Err(e) => return bad_gateway(format!("beforeRequest hook failed: {e}")),
		}
	}

	let (host, port, use_tls, path_and_query) = match resolve_target(&url, &headers, req) {
		Ok(target) => target,
		Err(e) => return bad_gateway(format!("invalid upstream url: {e}")),
	};

	bus.publish(Event::PassthroughRequestHead { request_id: req.id.clone(), hostname: host.clone(), port });

	let stream = match client::connect(&host, port, use_tls, cfg).await {
		Ok(s) => s,
		Err(e) => return connect_failure(e, cfg),
	};

	let io = TokioIo::new(stream);
	let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
		Ok(pair) => pair,
		Err(e) => return bad_gateway(format!("upstream handshake failed: {e}")),
	};
	tokio::spawn(async move {
		if let Err(e) = conn.await {
			tracing::debug!(error = %e, "upstream connection ended");
		}
	});

	if headers.get_first("host").is_none() {
		headers.set("host", &host);
	}
	for name in HOP_BY_HOP_HEADERS {
		headers.remove(name);
	}

	let mut builder = hyper::Request::builder().method(method).uri(path_and_query);
	for (name, value) in &headers.raw {
		builder = builder.header(name.as_str(), value.as_str());
	}
	let outbound = match builder.body(Full::new(body_bytes)) {
		Ok(r) => r,
		Err(e) => return bad_gateway(format!("malformed upstream request: {e}")),
	};

	let mut resp = match sender.send_request(outbound).await {
		Ok(r) => r,
		Err(e) => return connect_failure(client::Error::Io(std::io::Error::other(e.to_string())), cfg),
	};

	if resp.status() == http::StatusCode::SWITCHING_PROTOCOLS {
		let mut resp_record = ResponseRecord::new(resp.status());
		for (name, value) in resp.headers().iter() {
			resp_record.headers.push(name.as_str(), value.to_str().unwrap_or(""));
		}
		return match hyper::upgrade::on(&mut resp).await {
			Ok(upgraded) => {
				let upstream: client::BoxedStream = Box::new(TokioIo::new(upgraded));
				Outcome::Upgrade { response: resp_record, upstream }
			},
			Err(e) => bad_gateway(format!("upstream refused to complete the protocol upgrade: {e}")),
		};
	}

	let (parts, body) = resp.into_parts();
	let collected = match body.collect().await {
		Ok(c) => c.to_bytes(),
		Err(e) => return bad_gateway(format!("upstream response body error: {e}")),
	};

	let mut resp_record = ResponseRecord::new(parts.status);
	for (name, value) in parts.headers.iter() {
		resp_record.headers.push(name.as_str(), value.to_str().unwrap_or(""));
	}
	resp_record.body = crate::http::Body::from_bytes(collected);

	apply_before_response(resp_record, cfg, &req.id).await
}

async fn apply_before_response(mut resp_record: ResponseRecord, cfg: &PassThroughConfig, request_id: &RequestId) -> Outcome {
	let Some(hook) = &cfg.before_response else {
		return Outcome::Response(resp_record);
	};
	match hook(resp_record.clone()).await {
		Ok(BeforeResponseOutcome::Continue(ResponseTransform { status, headers, body })) => {
			if let Some(status) = status {
				if let Ok(code) = http::StatusCode::from_u16(status) {
					resp_record.status = code;
				}
			}
			if let Some(headers) = headers {
				resp_record.headers = headers;
			}
			if let Some(body) = body {
				resp_record.body = crate::http::Body::from_bytes(body);
			}
			Outcome::Response(resp_record)
		},
		Ok(BeforeResponseOutcome::Close) => {
			Outcome::Abort { code: "CLOSE", reason: "Connection closed intentionally by rule".to_string() }
		},
		Err(e) => {
			let _ = request_id;
			bad_gateway(format!("beforeResponse hook failed: {e}"))
		},
	}
}

fn connect_failure(e: client::Error, cfg: &PassThroughConfig) -> Outcome {
	if cfg.simulate_connection_errors || matches!(e, client::Error::SimulatedFailure) {
		return Outcome::Abort { code: "ECONNRESET", reason: e.to_string() };
	}
	bad_gateway(format!("upstream unreachable: {e}"))
}

/// Resolves the upstream host/port/scheme/path for `url`, falling back to
/// the request's already-resolved destination for relative URLs (spec.md
/// §4.5 step 1).
fn resolve_target(url: &str, headers: &Headers, req: &RequestRecord) -> anyhow::Result<(String, u16, bool, String)> {
	let is_https = matches!(req.protocol, crate::http::Protocol::Https | crate::http::Protocol::Wss);
	let absolute = if url.contains("://") {
		url.to_string()
	} else {
		let scheme = if is_https { "https" } else { "http" };
		format!("{scheme}://{}:{}{}", req.destination.hostname, req.destination.port, url)
	};
	let uri: http::Uri = absolute.parse()?;

	let scheme = uri.scheme_str().unwrap_or(if is_https { "https" } else { "http" });
	let use_tls = scheme == "https" || scheme == "wss";

	let host = headers
		.get_first("host")
		.map(|h| h.split(':').next().unwrap_or(h).to_string())
		.or_else(|| uri.host().map(str::to_string))
		.unwrap_or_else(|| req.destination.hostname.clone());
	let port = uri.port_u16().unwrap_or(if use_tls { 443 } else { 80 });
	let path_and_query = uri.path_and_query().map(|p| p.to_string()).unwrap_or_else(|| "/".to_string());
	Ok((host, port, use_tls, path_and_query))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::{Destination, Protocol};
	use crate::util::{Timing, new_request_id};

	fn make_request(url: &str) -> RequestRecord {
		RequestRecord {
			id: new_request_id(),
			protocol: Protocol::Http,
			http_version: http::Version::HTTP_11,
			method: http::Method::GET,
			url: url.to_string(),
			path: "/".to_string(),
			headers: Headers::new(),
			destination: Destination { hostname: "fallback.example".to_string(), port: 80, observed_peer: "127.0.0.1:1".parse().unwrap() },
			remote_addr: "127.0.0.1:2".parse().unwrap(),
			tags: Vec::new(),
			timing: Timing::start(),
			body: crate::http::Body::empty(),
		}
	}

	#[test]
	fn absolute_https_url_resolves_host_port_and_tls() {
		let req = make_request("https://upstream.example:8443/a/b");
		let (host, port, use_tls, path) = resolve_target(&req.url, &req.headers, &req).unwrap();
		assert_eq!(host, "upstream.example");
		assert_eq!(port, 8443);
		assert!(use_tls);
		assert_eq!(path, "/a/b");
	}

	#[test]
	fn relative_url_falls_back_to_request_destination() {
		let req = make_request("/only/a/path");
		let (host, port, use_tls, path) = resolve_target(&req.url, &req.headers, &req).unwrap();
		assert_eq!(host, "fallback.example");
		assert_eq!(port, 80);
		assert!(!use_tls);
		assert_eq!(path, "/only/a/path");
	}

	#[test]
	fn host_header_overrides_url_authority() {
		let mut req = make_request("http://upstream.example/a");
		req.headers.set("host", "override.example:9000");
		let (host, _, _, _) = resolve_target(&req.url, &req.headers, &req).unwrap();
		assert_eq!(host, "override.example");
	}
}
