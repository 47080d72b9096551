//! Best-effort raw-HTTP parsing (spec.md §4.10), used when the real parser
//! rejects a request (header overflow, invalid method, bad version) so a
//! `client-error` event can still carry something diagnostic.

use serde::Serialize;

/// Method strings longer than this are rejected outright, bounding how much
/// garbage a malformed request line can do to the salvage attempt
/// (spec.md §4.10).
const MAX_METHOD_LEN: usize = 15;
const MAX_LINES: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct SalvagedRequest {
	pub method: Option<String>,
	pub url: Option<String>,
	pub version: Option<String>,
	pub headers: Vec<(String, String)>,
}

/// Splits `buf` on CRLF and best-effort extracts a method/URL/version from
/// the first line and `name: value` headers from the rest. Returns `None`
/// only when even the request line can't be recovered.
pub fn parse_best_effort(buf: &[u8]) -> Option<SalvagedRequest> {
	let text = String::from_utf8_lossy(buf);
	let mut lines = text.split("\r\n").take(MAX_LINES);

	let first_line = lines.next()?;
	let mut parts = first_line.splitn(3, ' ');
	let method = parts.next().filter(|m| !m.is_empty() && m.len() <= MAX_METHOD_LEN).map(str::to_string);
	let url = parts.next().map(str::to_string);
	let version = parts.next().map(str::to_string);

	let mut headers = Vec::new();
	for line in lines {
		if line.is_empty() {
			break;
		}
		if let Some((name, value)) = line.split_once(':') {
			headers.push((name.trim().to_string(), value.trim().to_string()));
		}
	}

	if method.is_none() && url.is_none() && headers.is_empty() {
		return None;
	}

	Some(SalvagedRequest { method, url, version, headers })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_request_line_and_headers() {
		let raw = b"GET /path HTTP/1.1\r\nHost: example.com\r\nX-Foo: bar\r\n\r\n";
		let salvaged = parse_best_effort(raw).unwrap();
		assert_eq!(salvaged.method.as_deref(), Some("GET"));
		assert_eq!(salvaged.url.as_deref(), Some("/path"));
		assert_eq!(salvaged.version.as_deref(), Some("HTTP/1.1"));
		assert_eq!(salvaged.headers, vec![("Host".into(), "example.com".into()), ("X-Foo".into(), "bar".into())]);
	}

	#[test]
	fn overlong_method_is_dropped_but_rest_survives() {
		let raw = b"REALLYLONGMETHODNAME /path HTTP/1.1\r\nHost: example.com\r\n\r\n";
		let salvaged = parse_best_effort(raw).unwrap();
		assert!(salvaged.method.is_none());
		assert_eq!(salvaged.url.as_deref(), Some("/path"));
	}

	#[test]
	fn empty_input_yields_none() {
		assert!(parse_best_effort(b"").is_none());
	}

	#[test]
	fn blank_request_line_yields_none() {
		assert!(parse_best_effort(b"\r\n").is_none());
	}
}
