//! Matchers (spec.md §3, §4.3): polymorphic predicates modeled as a tagged
//! enum (spec.md §9 "Polymorphism") rather than trait objects.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value as Json;

use crate::http::RequestRecord;
use crate::http::body::CompletedBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
	Match,
	NoMatch,
	/// The decision depends on body bytes that haven't arrived yet
	/// (spec.md §4.3).
	Uncertain,
}

#[derive(Debug, Clone)]
pub enum MultipartContent {
	Text(String),
	Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct MultipartExpectation {
	pub name: String,
	pub filename: Option<String>,
	pub content: MultipartContent,
}

/// A matcher variant (spec.md §3). Every body-dependent variant returns
/// [`MatchOutcome::Uncertain`] when handed a request whose body hasn't
/// completed yet.
#[derive(Debug, Clone)]
pub enum Matcher {
	Method(http::Method),
	ExactPath(String),
	PathAndQuery(String),
	Regex(Regex),
	Host(String),
	Hostname(String),
	Port(u16),
	Protocol(crate::http::Protocol),
	HeaderExact { name: String, value: String },
	QueryObject(IndexMap<String, Vec<String>>),
	ExactQueryString(String),
	BodyExact(Vec<u8>),
	BodyIncludes(Vec<u8>),
	BodyRegex(Regex),
	JsonBodyExact(Json),
	JsonBodySubset(Json),
	FormSubset(Vec<(String, String)>),
	MultipartForm(MultipartExpectation),
	JsonRpc { method: Option<String>, params_subset: Option<Json> },
	AnyRequest,
	/// Matches nothing; useful for rules intentionally kept unreachable
	/// (Open Question in spec.md §9, resolved in DESIGN.md).
	Unmatched,
}

impl Matcher {
	pub fn is_body_dependent(&self) -> bool {
		matches!(
			self,
			Matcher::BodyExact(_)
				| Matcher::BodyIncludes(_)
				| Matcher::BodyRegex(_)
				| Matcher::JsonBodyExact(_)
				| Matcher::JsonBodySubset(_)
				| Matcher::FormSubset(_)
				| Matcher::MultipartForm(_)
				| Matcher::JsonRpc { .. }
		)
	}

	pub fn evaluate(&self, req: &RequestRecord, body: Option<&CompletedBody>) -> MatchOutcome {
		match self {
			Matcher::Method(m) => bool_outcome(&req.method == m),
			Matcher::ExactPath(p) => bool_outcome(&req.path == p),
			Matcher::PathAndQuery(pq) => bool_outcome(request_path_and_query(req) == *pq),
			Matcher::Regex(re) => bool_outcome(re.is_match(&req.path)),
			Matcher::Host(h) => bool_outcome(format!("{}:{}", req.destination.hostname, req.destination.port) == *h),
			Matcher::Hostname(h) => bool_outcome(req.destination.hostname.eq_ignore_ascii_case(h)),
			Matcher::Port(p) => bool_outcome(req.destination.port == *p),
			Matcher::Protocol(p) => bool_outcome(req.protocol == *p),
			Matcher::HeaderExact { name, value } => {
				bool_outcome(req.headers.get_first(name).map(|v| v == value).unwrap_or(false))
			},
			Matcher::QueryObject(expected) => bool_outcome(query_subset_matches(req, expected)),
			Matcher::ExactQueryString(expected) => {
				bool_outcome(request_query_string(req).as_deref() == Some(expected.as_str()))
			},
			Matcher::AnyRequest => MatchOutcome::Match,
			Matcher::Unmatched => MatchOutcome::NoMatch,

			Matcher::BodyExact(expected) => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => bool_outcome(b.raw().as_ref() == expected.as_slice()),
			},
			Matcher::BodyIncludes(needle) => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => {
					let encoding = req.headers.get_first("content-encoding");
					match b.decoded(encoding) {
						Ok(decoded) => bool_outcome(contains_subslice(decoded, needle)),
						Err(_) => MatchOutcome::NoMatch,
					}
				},
			},
			Matcher::BodyRegex(re) => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => {
					let encoding = req.headers.get_first("content-encoding");
					match b.text(encoding) {
						Ok(text) => bool_outcome(re.is_match(text)),
						Err(_) => MatchOutcome::NoMatch,
					}
				},
			},
			Matcher::JsonBodyExact(expected) => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => {
					let encoding = req.headers.get_first("content-encoding");
					match b.json(encoding) {
						Ok(actual) => bool_outcome(actual == expected),
						Err(_) => MatchOutcome::NoMatch,
					}
				},
			},
			Matcher::JsonBodySubset(expected) => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => {
					let encoding = req.headers.get_first("content-encoding");
					match b.json(encoding) {
						Ok(actual) => bool_outcome(json_subset_matches(actual, expected)),
						Err(_) => MatchOutcome::NoMatch,
					}
				},
			},
			Matcher::FormSubset(expected) => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => {
					let encoding = req.headers.get_first("content-encoding");
					match b.form(encoding) {
						Ok(actual) => bool_outcome(expected.iter().all(|(k, v)| {
							actual.iter().any(|(ak, av)| ak == k && av == v)
						})),
						Err(_) => MatchOutcome::NoMatch,
					}
				},
			},
			Matcher::MultipartForm(expect) => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => {
					let encoding = req.headers.get_first("content-encoding");
					let Some(boundary) = multipart_boundary(req) else { return MatchOutcome::NoMatch };
					match b.multipart(encoding, &boundary) {
						Ok(parts) => bool_outcome(parts.iter().any(|p| multipart_part_matches(p, expect))),
						Err(_) => MatchOutcome::NoMatch,
					}
				},
			},
			Matcher::JsonRpc { method, params_subset } => match body {
				None => MatchOutcome::Uncertain,
				Some(b) => {
					let encoding = req.headers.get_first("content-encoding");
					match b.json(encoding).ok().and_then(super::jsonrpc::Request::from_json) {
						None => MatchOutcome::NoMatch,
						Some(rpc) => {
							let method_ok = method.as_deref().map(|m| rpc.method == m).unwrap_or(true);
							let params_ok = params_subset
								.as_ref()
								.map(|expected| json_subset_matches(&rpc.params, expected))
								.unwrap_or(true);
							bool_outcome(method_ok && params_ok)
						},
					}
				},
			},
		}
	}
}

fn bool_outcome(b: bool) -> MatchOutcome {
	if b { MatchOutcome::Match } else { MatchOutcome::NoMatch }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
	if needle.is_empty() {
		return true;
	}
	haystack.windows(needle.len()).any(|w| w == needle)
}

fn request_path_and_query(req: &RequestRecord) -> String {
	request_query_string(req).map(|q| format!("{}?{q}", req.path)).unwrap_or_else(|| req.path.clone())
}

fn request_query_string(req: &RequestRecord) -> Option<String> {
	req.url.split_once('?').map(|(_, q)| q.to_string())
}

fn request_query_pairs(req: &RequestRecord) -> IndexMap<String, Vec<String>> {
	let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
	if let Some(q) = request_query_string(req) {
		for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
			map.entry(k.into_owned()).or_default().push(v.into_owned());
		}
	}
	map
}

fn query_subset_matches(req: &RequestRecord, expected: &IndexMap<String, Vec<String>>) -> bool {
	let actual = request_query_pairs(req);
	expected.iter().all(|(k, values)| match actual.get(k) {
		None => false,
		Some(actual_values) => values.iter().all(|v| actual_values.contains(v)),
	})
}

fn multipart_boundary(req: &RequestRecord) -> Option<String> {
	let ct = req.headers.get_first("content-type")?;
	ct.split(';').map(str::trim).find_map(|p| p.strip_prefix("boundary=")).map(|b| b.trim_matches('"').to_string())
}

fn multipart_part_matches(part: &crate::http::body::MultipartPart, expect: &MultipartExpectation) -> bool {
	if part.name != expect.name {
		return false;
	}
	if expect.filename.is_some() && part.filename != expect.filename {
		return false;
	}
	match &expect.content {
		MultipartContent::Text(t) => std::str::from_utf8(&part.content) == Ok(t.as_str()),
		MultipartContent::Bytes(b) => part.content.as_ref() == b.as_slice(),
	}
}

/// Recursive subset match (spec.md §3): every key/value in `expected` must
/// be present in `actual`; arrays require `expected` to be a subset of
/// `actual`'s elements.
pub fn json_subset_matches(actual: &Json, expected: &Json) -> bool {
	match (actual, expected) {
		(Json::Object(a), Json::Object(e)) => {
			e.iter().all(|(k, ev)| a.get(k).map(|av| json_subset_matches(av, ev)).unwrap_or(false))
		},
		(Json::Array(a), Json::Array(e)) => e.iter().all(|ev| a.iter().any(|av| json_subset_matches(av, ev))),
		(a, e) => a == e,
	}
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
