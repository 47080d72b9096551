//! The event bus (spec.md §4.7): typed per-request lifecycle events fanned
//! out to subscribers. Subscribers are boxed closures taken by value —
//! modeled as a structured `tokio::sync::mpsc` channel per subscriber
//! (spec.md §9 "Event fan-out": "a structured alternative ... is
//! equivalent").

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::util::RequestId;

/// One entry of `request-body-data` / `response-body-data` (spec.md §4.7).
#[derive(Debug, Clone, Serialize)]
pub struct BodyDataEvent {
	pub request_id: RequestId,
	pub byte_len: usize,
	pub is_ended: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TlsClientErrorEvent {
	pub request_id: RequestId,
	pub failure_cause: &'static str,
	pub sni: Option<String>,
	pub ja3: String,
	pub ja4: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientErrorEvent {
	pub request_id: RequestId,
	pub code: String,
	pub tags: Vec<String>,
	/// Best-effort salvage of the request line/headers, when parseable
	/// (spec.md §4.10). `None` when nothing could be salvaged.
	pub request: Option<crate::http::salvage::SalvagedRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbortEvent {
	pub request_id: RequestId,
	pub reason: String,
}

/// Fired once, from the body-tee task, the first time a streaming body
/// exceeds `maxBodySize` (spec.md §3 "Body truncation is observable via the
/// tag stream and event bus and never silent", §4.9, §7).
#[derive(Debug, Clone, Serialize)]
pub struct BodyTruncatedEvent {
	pub request_id: RequestId,
	/// Bytes accumulated before truncation kicked in.
	pub byte_len: usize,
}

/// Typed lifecycle events (spec.md §4.7). Each request identifier is
/// guaranteed to see at most one of `Response`/`Abort` (spec.md §3
/// invariants).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
	RequestInitiated { request_id: RequestId },
	RequestBodyData(BodyDataEvent),
	Request { request_id: RequestId },
	ResponseInitiated { request_id: RequestId, status: u16 },
	ResponseBodyData(BodyDataEvent),
	Response { request_id: RequestId, status: u16 },
	Abort(AbortEvent),
	TlsClientError(TlsClientErrorEvent),
	ClientError(ClientErrorEvent),
	BodyTruncated(BodyTruncatedEvent),
	TlsPassthroughOpened { request_id: RequestId, sni: Option<String> },
	TlsPassthroughClosed { request_id: RequestId },
	RawPassthroughOpened { request_id: RequestId },
	RawPassthroughClosed { request_id: RequestId },
	PassthroughRequestHead { request_id: RequestId, hostname: String, port: u16 },
	RuleEvent { request_id: RequestId, rule_id: String },
}

impl Event {
	pub fn request_id(&self) -> &RequestId {
		match self {
			Event::RequestInitiated { request_id }
			| Event::Request { request_id }
			| Event::ResponseInitiated { request_id, .. }
			| Event::Response { request_id, .. }
			| Event::TlsPassthroughOpened { request_id, .. }
			| Event::TlsPassthroughClosed { request_id }
			| Event::RawPassthroughOpened { request_id }
			| Event::RawPassthroughClosed { request_id }
			| Event::PassthroughRequestHead { request_id, .. }
			| Event::RuleEvent { request_id, .. } => request_id,
			Event::RequestBodyData(e) | Event::ResponseBodyData(e) => &e.request_id,
			Event::Abort(e) => &e.request_id,
			Event::TlsClientError(e) => &e.request_id,
			Event::ClientError(e) => &e.request_id,
			Event::BodyTruncated(e) => &e.request_id,
		}
	}
}

struct Subscriber {
	tx: mpsc::UnboundedSender<Event>,
}

/// Fan-out hub. Delivery is unordered across subscribers but preserves
/// per-request ordering for any single subscriber (spec.md §4.7); a
/// subscriber that drops its receiver is pruned lazily on next publish.
#[derive(Default)]
pub struct Bus {
	subscribers: RwLock<Vec<Subscriber>>,
}

impl Bus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Subscribes to the full event stream, returning a receiver. Matches
	/// spec.md §6 "subscribers receive snapshots, never live references" —
	/// every [`Event`] variant here is an owned, cloned snapshot.
	pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.subscribers.write().push(Subscriber { tx });
		rx
	}

	/// Publishes an event to every live subscriber. A subscriber whose
	/// channel is closed is dropped from the list rather than treated as an
	/// error — subscriber failures are isolated per spec.md §4.7.
	pub fn publish(&self, event: Event) {
		let mut subs = self.subscribers.write();
		subs.retain(|s| s.tx.send(event.clone()).is_ok());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delivers_in_order_to_a_subscriber() {
		let bus = Bus::new();
		let mut rx = bus.subscribe();
		let id: RequestId = "r1".into();
		bus.publish(Event::RequestInitiated { request_id: id.clone() });
		bus.publish(Event::Request { request_id: id.clone() });
		bus.publish(Event::Response { request_id: id, status: 200 });

		assert!(matches!(rx.try_recv().unwrap(), Event::RequestInitiated { .. }));
		assert!(matches!(rx.try_recv().unwrap(), Event::Request { .. }));
		assert!(matches!(rx.try_recv().unwrap(), Event::Response { .. }));
	}

	#[test]
	fn dropped_subscriber_is_pruned_without_affecting_others() {
		let bus = Bus::new();
		let rx1 = bus.subscribe();
		drop(rx1);
		let mut rx2 = bus.subscribe();
		bus.publish(Event::Request { request_id: "r1".into() });
		assert!(rx2.try_recv().is_ok());
		assert_eq!(bus.subscribers.read().len(), 1);
	}
}
