//! URL normalization for matching (spec.md §4.8) — not used for event
//! reporting, where the original URL is always preserved verbatim.

use url::Url;

/// Normalizes `input` for matching: strips query/fragment, upper-cases
/// percent-encoded triplets, percent-encodes non-ASCII path bytes, strips a
/// trailing dot from the hostname, and strips default ports. Accepts
/// relative, absolute, or protocol-less absolute URLs.
pub fn normalize(input: &str) -> String {
	let had_protocol = input.contains("://");
	let parse_target = if had_protocol || input.starts_with('/') {
		input.to_string()
	} else {
		format!("http://{input}")
	};

	let Ok(mut url) = Url::parse(&parse_target) else {
		// Relative paths with no scheme/host: normalize just the path shape.
		return normalize_path_only(strip_query_and_fragment(input));
	};

	url.set_query(None);
	url.set_fragment(None);

	if let Some(host) = url.host_str() {
		let trimmed = host.strip_suffix('.').unwrap_or(host).to_string();
		let _ = url.set_host(Some(&trimmed));
	}

	if is_default_port(url.scheme(), url.port()) {
		let _ = url.set_port(None);
	}

	let normalized_path = normalize_path_only(url.path());
	url.set_path(&normalized_path);

	let rendered = url.to_string();
	if had_protocol {
		rendered
	} else {
		rendered.strip_prefix("http://").unwrap_or(&rendered).to_string()
	}
}

fn is_default_port(scheme: &str, port: Option<u16>) -> bool {
	matches!((scheme, port), ("http", Some(80)) | ("ws", Some(80)) | ("https", Some(443)) | ("wss", Some(443)))
}

fn strip_query_and_fragment(input: &str) -> &str {
	let input = input.split('#').next().unwrap_or(input);
	input.split('?').next().unwrap_or(input)
}

/// Upper-cases percent-encoded triplets and percent-encodes non-ASCII bytes
/// in a path, leaving already-valid ASCII path characters untouched.
fn normalize_path_only(path: &str) -> String {
	let mut out = String::with_capacity(path.len());
	let bytes = path.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' && i + 2 < bytes.len() && bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit() {
			out.push('%');
			out.push(bytes[i + 1].to_ascii_uppercase() as char);
			out.push(bytes[i + 2].to_ascii_uppercase() as char);
			i += 3;
		} else if bytes[i].is_ascii() {
			out.push(bytes[i] as char);
			i += 1;
		} else {
			let ch_len = utf8_char_len(bytes[i]);
			let end = (i + ch_len).min(bytes.len());
			for b in &bytes[i..end] {
				out.push_str(&format!("%{:02X}", b));
			}
			i = end;
		}
	}
	out
}

fn utf8_char_len(first_byte: u8) -> usize {
	if first_byte & 0x80 == 0 {
		1
	} else if first_byte & 0xE0 == 0xC0 {
		2
	} else if first_byte & 0xF0 == 0xE0 {
		3
	} else {
		4
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_query_and_fragment() {
		assert_eq!(normalize("http://example.com/a?b=1#frag"), "http://example.com/a");
	}

	#[test]
	fn uppercases_percent_triplets() {
		assert_eq!(normalize("http://example.com/a%2fb"), "http://example.com/a%2Fb");
	}

	#[test]
	fn strips_default_port() {
		assert_eq!(normalize("http://example.com:80/a"), "http://example.com/a");
		assert_eq!(normalize("https://example.com:443/a"), "https://example.com/a");
	}

	#[test]
	fn keeps_non_default_port() {
		assert_eq!(normalize("http://example.com:8080/a"), "http://example.com:8080/a");
	}

	#[test]
	fn strips_trailing_dot_from_host() {
		assert_eq!(normalize("http://example.com./a"), "http://example.com/a");
	}

	#[test]
	fn protocol_less_input_is_normalized_without_protocol_in_output() {
		assert_eq!(normalize("example.com/a?x=1"), "example.com/a");
	}

	#[test]
	fn normalize_is_idempotent() {
		for input in ["http://Example.com:80/a%2fb?x=1#y", "example.com/a", "/just/a/path"] {
			let once = normalize(input);
			let twice = normalize(&once);
			assert_eq!(once, twice, "input={input}");
		}
	}
}
