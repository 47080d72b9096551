//! The rule store and matcher-selection algorithm (spec.md §3, §4.3, §6).

pub mod handler;
pub mod jsonrpc;
pub mod matcher;

pub use handler::Handler;
pub use matcher::{MatchOutcome, Matcher};

use std::sync::Arc;

use parking_lot::RwLock;

use crate::http::RequestRecord;
use crate::http::body::CompletedBody;
use crate::util::RequestId;

/// A rule's completion predicate (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub enum Completion {
	Once,
	Times(u32),
	Always,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("a fallback rule is already registered")]
	FallbackAlreadyRegistered,
}

/// Per-rule back-reference to the engine's seen-request log, modeled per
/// spec.md §9 as the rule holding its own log rather than a strong cyclic
/// pointer back to the engine.
pub struct Rule {
	pub id: String,
	pub matchers: Vec<Matcher>,
	pub handler: Handler,
	completion: Completion,
	remaining: RwLock<Option<u32>>,
	seen: RwLock<Vec<RequestId>>,
}

impl Rule {
	pub fn new(id: impl Into<String>, matchers: Vec<Matcher>, handler: Handler, completion: Completion) -> Self {
		let remaining = match completion {
			Completion::Once => Some(1),
			Completion::Times(n) => Some(n),
			Completion::Always => None,
		};
		Self { id: id.into(), matchers, handler, completion, remaining: RwLock::new(remaining), seen: RwLock::new(Vec::new()) }
	}

	/// `once()` rules stop being eligible after one match, `times(n)` after
	/// `n` (spec.md §3 invariants).
	pub fn is_eligible(&self) -> bool {
		!matches!(*self.remaining.read(), Some(0))
	}

	fn consume(&self) {
		let mut remaining = self.remaining.write();
		if let Some(n) = *remaining {
			*remaining = Some(n.saturating_sub(1));
		}
	}

	pub fn seen_requests(&self) -> Vec<RequestId> {
		self.seen.read().clone()
	}

	fn record_seen(&self, id: RequestId) {
		self.seen.write().push(id);
	}

	pub fn completion(&self) -> Completion {
		self.completion
	}

	/// Evaluates every matcher; `Match` only if all match, `Uncertain` if
	/// none failed but at least one is still uncertain, else `NoMatch`
	/// (spec.md §4.3).
	fn evaluate(&self, req: &RequestRecord, body: Option<&CompletedBody>) -> MatchOutcome {
		let mut uncertain = false;
		for matcher in &self.matchers {
			match matcher.evaluate(req, body) {
				MatchOutcome::NoMatch => return MatchOutcome::NoMatch,
				MatchOutcome::Uncertain => uncertain = true,
				MatchOutcome::Match => {},
			}
		}
		if uncertain { MatchOutcome::Uncertain } else { MatchOutcome::Match }
	}
}

/// Ordered ordinary rules plus a single fallback slot (spec.md §3).
pub struct RuleStore {
	rules: RwLock<Vec<Arc<Rule>>>,
	fallback: RwLock<Option<Arc<Rule>>>,
}

impl Default for RuleStore {
	fn default() -> Self {
		Self::new()
	}
}

impl RuleStore {
	pub fn new() -> Self {
		Self { rules: RwLock::new(Vec::new()), fallback: RwLock::new(None) }
	}

	pub fn add_rule(&self, rule: Rule) -> Arc<Rule> {
		let rule = Arc::new(rule);
		self.rules.write().push(rule.clone());
		rule
	}

	pub fn set_rules(&self, rules: Vec<Rule>) {
		*self.rules.write() = rules.into_iter().map(Arc::new).collect();
	}

	pub fn set_fallback(&self, rule: Rule) -> Result<Arc<Rule>, Error> {
		let mut slot = self.fallback.write();
		if slot.is_some() {
			return Err(Error::FallbackAlreadyRegistered);
		}
		let rule = Arc::new(rule);
		*slot = Some(rule.clone());
		Ok(rule)
	}

	pub fn rules(&self) -> Vec<Arc<Rule>> {
		self.rules.read().clone()
	}

	pub fn fallback(&self) -> Option<Arc<Rule>> {
		self.fallback.read().clone()
	}

	/// Rule ids currently eligible to match (spec.md §6 `getMockedEndpoints`).
	pub fn get_mocked_endpoints(&self) -> Vec<String> {
		self.rules.read().iter().map(|r| r.id.clone()).collect()
	}

	/// Rule ids still eligible under their completion predicate (spec.md §6
	/// `getPendingEndpoints`).
	pub fn get_pending_endpoints(&self) -> Vec<String> {
		self.rules.read().iter().filter(|r| r.is_eligible()).map(|r| r.id.clone()).collect()
	}

	pub fn get_seen_requests(&self, rule_id: &str) -> Vec<RequestId> {
		self.rules
			.read()
			.iter()
			.chain(self.fallback.read().iter())
			.find(|r| r.id == rule_id)
			.map(|r| r.seen_requests())
			.unwrap_or_default()
	}
}

/// The outcome of rule selection (spec.md §4.3).
pub enum Selection {
	Matched(Arc<Rule>),
	/// No ordinary rule nor fallback matched: synthesize the 503 explained
	/// in spec.md §4.3/§7.
	NoneMatched,
}

/// Evaluates rules against `req` and its (possibly not-yet-complete) body,
/// short-circuiting on a definitive, unambiguous match before the body
/// finishes (spec.md §4.3).
///
/// Simplification (see DESIGN.md): rather than re-evaluating incrementally
/// on every body chunk, an uncertain verdict resolves by awaiting the full
/// body once and re-evaluating — the headers-only short-circuit in step 2
/// is exact, but a request with no headers-only definitive winner pays for
/// full buffering instead of the earliest-possible byte.
pub async fn select(store: &RuleStore, req: &RequestRecord) -> Selection {
	if let Some(rule) = evaluate_ordinary(store, req, None) {
		rule.consume();
		rule.record_seen(req.id.clone());
		return Selection::Matched(rule);
	}

	let body = req.body.completed().await;
	if let Some(rule) = evaluate_ordinary(store, req, Some(&body)) {
		rule.consume();
		rule.record_seen(req.id.clone());
		return Selection::Matched(rule);
	}

	if let Some(fallback) = store.fallback() {
		fallback.record_seen(req.id.clone());
		return Selection::Matched(fallback);
	}

	Selection::NoneMatched
}

/// Applies the spec.md §4.3 selection algorithm to the ordinary rule band:
/// take the first rule that's a definitive match with no rule ahead of it
/// still uncertain enough to overtake (spec.md §9's registration-order
/// tie-break, see DESIGN.md Open Question).
fn evaluate_ordinary(store: &RuleStore, req: &RequestRecord, body: Option<&CompletedBody>) -> Option<Arc<Rule>> {
	let rules = store.rules();
	let mut first_definitive: Option<usize> = None;
	let mut any_uncertain_before_it = false;

	for (idx, rule) in rules.iter().enumerate() {
		if !rule.is_eligible() {
			continue;
		}
		match rule.evaluate(req, body) {
			MatchOutcome::Match => {
				if first_definitive.is_none() {
					first_definitive = Some(idx);
				}
				break;
			},
			MatchOutcome::Uncertain => {
				if first_definitive.is_none() {
					any_uncertain_before_it = true;
				}
			},
			MatchOutcome::NoMatch => {},
		}
	}

	match first_definitive {
		Some(idx) if !any_uncertain_before_it || body.is_some() => rules.get(idx).cloned(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use std::net::SocketAddr;

	use super::*;
	use crate::http::body::Body;
	use crate::http::{Destination, Headers, Protocol};
	use crate::util::{Timing, new_request_id};

	fn make_request(path: &str) -> RequestRecord {
		RequestRecord {
			id: new_request_id(),
			protocol: Protocol::Http,
			http_version: http::Version::HTTP_11,
			method: http::Method::GET,
			url: path.to_string(),
			path: path.to_string(),
			headers: Headers::new(),
			destination: Destination {
				hostname: "example.com".to_string(),
				port: 80,
				observed_peer: "127.0.0.1:80".parse::<SocketAddr>().unwrap(),
			},
			remote_addr: "127.0.0.1:1".parse().unwrap(),
			tags: Vec::new(),
			timing: Timing::start(),
			body: Body::empty(),
		}
	}

	fn reply_rule(id: &str, path: &str, completion: Completion) -> Rule {
		Rule::new(id, vec![Matcher::ExactPath(path.to_string())], Handler::ReplyWith(handler::ResponseSpec::new(200)), completion)
	}

	#[tokio::test]
	async fn fallback_only_matches_when_no_ordinary_rule_does() {
		let store = RuleStore::new();
		store.add_rule(reply_rule("specific", "/specific", Completion::Always));
		store.set_fallback(reply_rule("fallback", "/anything", Completion::Always)).unwrap();

		let matched = select(&store, &make_request("/unmocked")).await;
		assert!(matches!(matched, Selection::Matched(r) if r.id == "fallback"));

		let matched = select(&store, &make_request("/specific")).await;
		assert!(matches!(matched, Selection::Matched(r) if r.id == "specific"));
	}

	#[tokio::test]
	async fn registering_a_second_fallback_fails() {
		let store = RuleStore::new();
		store.set_fallback(reply_rule("first", "/a", Completion::Always)).unwrap();
		assert!(matches!(store.set_fallback(reply_rule("second", "/b", Completion::Always)), Err(Error::FallbackAlreadyRegistered)));
	}

	#[tokio::test]
	async fn once_rule_stops_matching_after_first_hit() {
		let store = RuleStore::new();
		store.add_rule(reply_rule("once", "/a", Completion::Once));

		let first = select(&store, &make_request("/a")).await;
		assert!(matches!(first, Selection::Matched(r) if r.id == "once"));

		let second = select(&store, &make_request("/a")).await;
		assert!(matches!(second, Selection::NoneMatched));
	}

	#[tokio::test]
	async fn times_n_rule_stops_after_n_hits() {
		let store = RuleStore::new();
		store.add_rule(reply_rule("twice", "/a", Completion::Times(2)));

		for _ in 0..2 {
			let matched = select(&store, &make_request("/a")).await;
			assert!(matches!(matched, Selection::Matched(r) if r.id == "twice"));
		}
		assert!(matches!(select(&store, &make_request("/a")).await, Selection::NoneMatched));
	}

	#[tokio::test]
	async fn no_match_and_no_fallback_yields_none_matched() {
		let store = RuleStore::new();
		store.add_rule(reply_rule("only", "/a", Completion::Always));
		assert!(matches!(select(&store, &make_request("/b")).await, Selection::NoneMatched));
	}

	#[test]
	fn pending_endpoints_excludes_exhausted_rules() {
		let store = RuleStore::new();
		store.add_rule(reply_rule("once", "/a", Completion::Once));
		store.add_rule(reply_rule("always", "/b", Completion::Always));
		let once = store.rules()[0].clone();
		once.consume();
		let pending = store.get_pending_endpoints();
		assert_eq!(pending, vec!["always".to_string()]);
	}
}
