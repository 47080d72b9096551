//! JSON-RPC 2.0 envelope types (spec.md §6), shared by the JSON-RPC matcher
//! and handler.

use serde::Serialize;
use serde_json::Value as Json;

#[derive(Debug, Clone)]
pub struct Request {
	pub id: Json,
	pub method: String,
	pub params: Json,
}

impl Request {
	/// Parses a well-formed JSON-RPC 2.0 request envelope, returning `None`
	/// if `value` isn't one (spec.md §4.4 "rejects if the request body is
	/// not a valid JSON-RPC 2.0 envelope").
	pub fn from_json(value: &Json) -> Option<Self> {
		let obj = value.as_object()?;
		if obj.get("jsonrpc")?.as_str()? != "2.0" {
			return None;
		}
		let method = obj.get("method")?.as_str()?.to_string();
		let id = obj.get("id").cloned().unwrap_or(Json::Null);
		let params = obj.get("params").cloned().unwrap_or(Json::Null);
		Some(Self { id, method, params })
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
	pub code: i64,
	pub message: String,
}

/// Builds `{jsonrpc:"2.0", id, result}` (spec.md §6).
pub fn success(id: Json, result: Json) -> Json {
	serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Builds `{jsonrpc:"2.0", id, error:{code, message}}` (spec.md §6).
pub fn error(id: Json, code: i64, message: impl Into<String>) -> Json {
	serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message.into() } })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_well_formed_envelope() {
		let value = serde_json::json!({"jsonrpc":"2.0","id":1,"method":"getValue","params":{"a":1}});
		let req = Request::from_json(&value).unwrap();
		assert_eq!(req.method, "getValue");
		assert_eq!(req.id, Json::from(1));
	}

	#[test]
	fn rejects_missing_jsonrpc_version() {
		let value = serde_json::json!({"id":1,"method":"getValue"});
		assert!(Request::from_json(&value).is_none());
	}

	#[test]
	fn builds_success_and_error_responses() {
		let ok = success(Json::from(1), serde_json::json!({"x": 1}));
		assert_eq!(ok["result"]["x"], 1);
		let err = error(Json::from(1), -32601, "Method not found");
		assert_eq!(err["error"]["code"], -32601);
	}
}
