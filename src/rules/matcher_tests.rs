use std::net::SocketAddr;

use bytes::Bytes;

use super::*;
use crate::http::body::Body;
use crate::http::{Destination, Headers, Protocol};
use crate::util::{Timing, new_request_id};

fn make_request(method: http::Method, url: &str, headers: &[(&str, &str)], body: Body) -> RequestRecord {
	let mut hdrs = Headers::new();
	for (name, value) in headers {
		hdrs.push(*name, *value);
	}
	let path = url.split('?').next().unwrap_or(url).to_string();
	RequestRecord {
		id: new_request_id(),
		protocol: Protocol::Http,
		http_version: http::Version::HTTP_11,
		method,
		url: url.to_string(),
		path,
		headers: hdrs,
		destination: Destination {
			hostname: "example.com".to_string(),
			port: 80,
			observed_peer: "127.0.0.1:80".parse::<SocketAddr>().unwrap(),
		},
		remote_addr: "127.0.0.1:12345".parse().unwrap(),
		tags: Vec::new(),
		timing: Timing::start(),
		body,
	}
}

#[test]
fn method_and_path_matchers() {
	let req = make_request(http::Method::GET, "/mocked", &[], Body::empty());
	assert_eq!(Matcher::Method(http::Method::GET).evaluate(&req, None), MatchOutcome::Match);
	assert_eq!(Matcher::Method(http::Method::POST).evaluate(&req, None), MatchOutcome::NoMatch);
	assert_eq!(Matcher::ExactPath("/mocked".into()).evaluate(&req, None), MatchOutcome::Match);
}

#[test]
fn header_exact_matcher() {
	let req = make_request(http::Method::GET, "/", &[("X-Foo", "bar")], Body::empty());
	assert_eq!(Matcher::HeaderExact { name: "x-foo".into(), value: "bar".into() }.evaluate(&req, None), MatchOutcome::Match);
	assert_eq!(Matcher::HeaderExact { name: "x-foo".into(), value: "baz".into() }.evaluate(&req, None), MatchOutcome::NoMatch);
}

#[test]
fn query_object_subset_match_requires_array_subset() {
	let req = make_request(http::Method::GET, "/a?x=1&x=2&y=3", &[], Body::empty());
	let mut expected = IndexMap::new();
	expected.insert("x".to_string(), vec!["1".to_string()]);
	assert_eq!(Matcher::QueryObject(expected).evaluate(&req, None), MatchOutcome::Match);

	let mut missing = IndexMap::new();
	missing.insert("z".to_string(), vec!["1".to_string()]);
	assert_eq!(Matcher::QueryObject(missing).evaluate(&req, None), MatchOutcome::NoMatch);
}

#[test]
fn body_matcher_is_uncertain_until_body_known() {
	let req = make_request(http::Method::POST, "/", &[], Body::empty());
	let matcher = Matcher::BodyExact(b"hello".to_vec());
	assert_eq!(matcher.evaluate(&req, None), MatchOutcome::Uncertain);
	let completed = CompletedBody::new(Bytes::from_static(b"hello"));
	assert_eq!(matcher.evaluate(&req, Some(&completed)), MatchOutcome::Match);
}

#[test]
fn json_body_subset_matches_recursively() {
	let completed = CompletedBody::new(Bytes::from_static(br#"{"a":1,"b":{"c":2,"d":3}}"#));
	let req = make_request(http::Method::POST, "/", &[], Body::empty());
	let expected = serde_json::json!({"b": {"c": 2}});
	assert_eq!(Matcher::JsonBodySubset(expected).evaluate(&req, Some(&completed)), MatchOutcome::Match);

	let wrong = serde_json::json!({"b": {"c": 99}});
	assert_eq!(Matcher::JsonBodySubset(wrong).evaluate(&req, Some(&completed)), MatchOutcome::NoMatch);
}

#[test]
fn json_rpc_matcher_checks_method_and_params_subset() {
	let completed = CompletedBody::new(Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"getValue","params":{"key":"k"}}"#));
	let req = make_request(http::Method::POST, "/", &[], Body::empty());
	let matcher = Matcher::JsonRpc { method: Some("getValue".into()), params_subset: Some(serde_json::json!({"key":"k"})) };
	assert_eq!(matcher.evaluate(&req, Some(&completed)), MatchOutcome::Match);

	let mismatched = Matcher::JsonRpc { method: Some("other".into()), params_subset: None };
	assert_eq!(mismatched.evaluate(&req, Some(&completed)), MatchOutcome::NoMatch);
}

#[test]
fn any_request_always_matches_unmatched_never_does() {
	let req = make_request(http::Method::GET, "/", &[], Body::empty());
	assert_eq!(Matcher::AnyRequest.evaluate(&req, None), MatchOutcome::Match);
	assert_eq!(Matcher::Unmatched.evaluate(&req, None), MatchOutcome::NoMatch);
}
