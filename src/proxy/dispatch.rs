//! Dispatches a matched [`Handler`] against a [`RequestRecord`], producing
//! either a [`ResponseRecord`] or an instruction to abort the connection
//! (spec.md §4.4).

use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::client;
use crate::events::Bus;
use crate::http::body::Body;
use crate::http::{RequestRecord, ResponseRecord};
use crate::rules::handler::{CallbackOutcome, Handler, JsonRpcReply, ResponseSpec};
use crate::rules::jsonrpc;

use super::passthrough;

pub enum Outcome {
	Response(ResponseRecord),
	/// No response is ever sent; the connection is reset (spec.md §4.4
	/// "close-connection", "stream-source-error").
	Abort { code: &'static str, reason: String },
	/// The handler never completes (spec.md §4.4 `timeoutForever`).
	Forever,
	/// A pass-through handler's upstream accepted a protocol upgrade (spec.md
	/// §4.5 "WebSocket pass-through"); the caller relays bytes once its own
	/// upgrade completes.
	Upgrade { response: ResponseRecord, upstream: client::BoxedStream },
}

pub async fn run(handler: &Handler, req: &RequestRecord, bus: &Bus) -> Outcome {
	match handler {
		Handler::ReplyWith(spec) => Outcome::Response(response_from_spec(spec.clone()).await),
		Handler::ReplyWithJsonRpc(reply) => reply_json_rpc(reply, req).await,
		Handler::Callback(f) => match f(req.clone()).await {
			Ok(CallbackOutcome::Respond(spec)) => Outcome::Response(response_from_spec(spec).await),
			Ok(CallbackOutcome::Close) => {
				Outcome::Abort { code: "CLOSE", reason: "Connection closed intentionally by rule".to_string() }
			},
			Err(e) => Outcome::Response(ResponseRecord::with_text(http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
		},
		Handler::Stream(factory) => stream_response(factory()).await,
		Handler::CloseConnection => {
			Outcome::Abort { code: "CLOSE", reason: "Connection closed intentionally by rule".to_string() }
		},
		Handler::TimeoutForever => Outcome::Forever,
		Handler::PassThrough(cfg) => match passthrough::forward(req, cfg, bus).await {
			passthrough::Outcome::Response(resp) => Outcome::Response(resp),
			passthrough::Outcome::Abort { code, reason } => Outcome::Abort { code, reason },
			passthrough::Outcome::Upgrade { response, upstream } => Outcome::Upgrade { response, upstream },
		},
	}
}

async fn stream_response(mut stream: futures::stream::BoxStream<'static, Result<Bytes, std::io::Error>>) -> Outcome {
	let mut buf = BytesMut::new();
	while let Some(chunk) = stream.next().await {
		match chunk {
			Ok(bytes) => buf.extend_from_slice(&bytes),
			Err(e) => {
				return Outcome::Abort { code: "STREAM_RULE_ERROR", reason: e.to_string() };
			},
		}
	}
	let mut resp = ResponseRecord::new(http::StatusCode::OK);
	resp.body = Body::from_bytes(buf.freeze());
	Outcome::Response(finalize_headers(resp).await)
}

async fn reply_json_rpc(reply: &JsonRpcReply, req: &RequestRecord) -> Outcome {
	let completed = req.body.completed().await;
	let parsed = completed.json(req.headers.get_first("content-encoding")).ok().and_then(jsonrpc::Request::from_json);
	let Some(parsed) = parsed else {
		let body = jsonrpc::error(serde_json::Value::Null, -32600, "Invalid Request");
		return Outcome::Response(ResponseRecord::with_json(http::StatusCode::BAD_REQUEST, &body));
	};

	let body = match reply {
		JsonRpcReply::Result(value) => jsonrpc::success(parsed.id, value.clone()),
		JsonRpcReply::Error { code, message } => jsonrpc::error(parsed.id, *code, message.clone()),
	};
	Outcome::Response(ResponseRecord::with_json(http::StatusCode::OK, &body))
}

/// Builds a [`ResponseRecord`] from a [`ResponseSpec`], applying default
/// headers and automatic body encoding (spec.md §4.4).
pub async fn response_from_spec(spec: ResponseSpec) -> ResponseRecord {
	let mut resp = ResponseRecord::new(
		http::StatusCode::from_u16(spec.status).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
	);
	let user_supplied_headers = spec.headers.is_some();
	if let Some(headers) = spec.headers {
		resp.headers = headers;
	}

	resp.body = if let Some(raw) = spec.raw_body {
		Body::from_bytes(raw)
	} else if let Some(body) = spec.body {
		match resp.headers.get_first("content-encoding") {
			Some(encoding) if !encoding.eq_ignore_ascii_case("identity") => {
				match crate::http::compression::encode(body.clone(), encoding).await {
					Ok(encoded) => Body::from_bytes(encoded),
					Err(e) => {
						tracing::warn!(error = %e, "failed to encode response body per content-encoding");
						Body::from_bytes(body)
					},
				}
			},
			_ => Body::from_bytes(body),
		}
	} else {
		Body::empty()
	};

	// §4.4: "If any header is supplied, no defaults are injected (the user is
	// assumed authoritative)." Only a handler that supplied no headers at all
	// gets `Date`/`Content-Length` filled in on its behalf.
	if user_supplied_headers { resp } else { finalize_headers(resp).await }
}

/// Injects `Date` and a minimal transfer-framing header when the handler
/// supplied no headers of its own (spec.md §4.4 "default headers").
async fn finalize_headers(mut resp: ResponseRecord) -> ResponseRecord {
	if resp.headers.get_first("date").is_none() {
		resp.headers.set("date", httpdate::fmt_http_date(std::time::SystemTime::now()));
	}
	if resp.headers.get_first("content-length").is_none() && resp.headers.get_first("transfer-encoding").is_none() {
		let len = resp.body.completed().await.raw().len();
		resp.headers.set("content-length", len.to_string());
	}
	resp
}
