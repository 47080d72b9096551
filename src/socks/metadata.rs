//! Decodes the `tags` payload carried by the `user-password-metadata` and
//! `custom-metadata` SOCKS auth methods (spec.md §4.11): JSON, or
//! base64url-of-JSON, containing a `tags` array.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("metadata payload is not valid JSON or base64url-encoded JSON")]
	InvalidPayload,
	#[error("metadata payload has no string `tags` array")]
	MissingTags,
}

/// Prefix applied to every tag decoded from a SOCKS metadata payload
/// (spec.md §4.11/§9).
pub const TAG_PREFIX: &str = "socket-metadata:";

pub fn decode_tags(raw: &[u8]) -> Result<Vec<String>, Error> {
	let value = parse_json_or_base64url(raw)?;
	let tags = value.get("tags").and_then(Value::as_array).ok_or(Error::MissingTags)?;
	tags.iter()
		.map(|t| t.as_str().map(|s| format!("{TAG_PREFIX}{s}")))
		.collect::<Option<Vec<_>>>()
		.ok_or(Error::MissingTags)
}

fn parse_json_or_base64url(raw: &[u8]) -> Result<Value, Error> {
	if let Ok(value) = serde_json::from_slice::<Value>(raw) {
		return Ok(value);
	}
	let decoded = URL_SAFE_NO_PAD.decode(raw).map_err(|_| Error::InvalidPayload)?;
	serde_json::from_slice(&decoded).map_err(|_| Error::InvalidPayload)
}

/// Builds the `<len><error-JSON>` rejection body used by both
/// `user-password-metadata` and `custom-metadata` failure replies.
pub fn error_payload(message: &str) -> Vec<u8> {
	serde_json::json!({ "error": message }).to_string().into_bytes()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_plain_json_tags() {
		let tags = decode_tags(br#"{"tags":["t1","t2"]}"#).unwrap();
		assert_eq!(tags, vec!["socket-metadata:t1".to_string(), "socket-metadata:t2".to_string()]);
	}

	#[test]
	fn decodes_base64url_json_tags() {
		let encoded = URL_SAFE_NO_PAD.encode(br#"{"tags":["t1"]}"#);
		let tags = decode_tags(encoded.as_bytes()).unwrap();
		assert_eq!(tags, vec!["socket-metadata:t1".to_string()]);
	}

	#[test]
	fn garbage_payload_is_invalid() {
		assert!(matches!(decode_tags(b"not json and not base64 \x00\x01"), Err(Error::InvalidPayload)));
	}

	#[test]
	fn missing_tags_field_is_rejected() {
		assert!(matches!(decode_tags(br#"{"other":1}"#), Err(Error::MissingTags)));
	}
}
