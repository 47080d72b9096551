//! In-process counters (spec.md §2 row O): per-rule hit counts and an
//! active-connection gauge. No external metrics backend is wired up — this
//! is a simplified stand-in for agentgateway's `prometheus_client`-backed
//! `core::tokio_metrics::TokioCollector` / `store/binds.rs` counters, kept
//! dependency-free since nothing here exports to a scrape endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

/// Process-wide metrics registry. Cheap to clone (wraps an `Arc` internally
/// via the caller holding it behind one, same convention as [`crate::events::Bus`]).
#[derive(Default)]
pub struct Metrics {
	rule_hits: RwLock<HashMap<String, u64>>,
	active_connections: AtomicI64,
}

impl Metrics {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records that `rule_id` produced a match (spec.md §4.3).
	pub fn record_rule_hit(&self, rule_id: &str) {
		let mut hits = self.rule_hits.write();
		*hits.entry(rule_id.to_string()).or_insert(0) += 1;
	}

	pub fn rule_hits(&self, rule_id: &str) -> u64 {
		self.rule_hits.read().get(rule_id).copied().unwrap_or(0)
	}

	pub fn all_rule_hits(&self) -> HashMap<String, u64> {
		self.rule_hits.read().clone()
	}

	/// Increments the active-connection gauge; pair with [`Self::connection_closed`].
	pub fn connection_opened(&self) {
		self.active_connections.fetch_add(1, Ordering::Relaxed);
	}

	pub fn connection_closed(&self) {
		self.active_connections.fetch_sub(1, Ordering::Relaxed);
	}

	pub fn active_connections(&self) -> i64 {
		self.active_connections.load(Ordering::Relaxed)
	}
}

/// RAII guard that decrements the active-connection gauge on drop, so a
/// connection task that panics or returns early still releases it.
pub struct ConnectionGuard {
	metrics: Arc<Metrics>,
}

impl ConnectionGuard {
	pub fn new(metrics: Arc<Metrics>) -> Self {
		metrics.connection_opened();
		Self { metrics }
	}
}

impl Drop for ConnectionGuard {
	fn drop(&mut self) {
		self.metrics.connection_closed();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rule_hits_accumulate_per_id() {
		let metrics = Metrics::new();
		metrics.record_rule_hit("rule-a");
		metrics.record_rule_hit("rule-a");
		metrics.record_rule_hit("rule-b");
		assert_eq!(metrics.rule_hits("rule-a"), 2);
		assert_eq!(metrics.rule_hits("rule-b"), 1);
		assert_eq!(metrics.rule_hits("rule-c"), 0);
	}

	#[test]
	fn connection_guard_tracks_gauge_across_drop() {
		let metrics = Arc::new(Metrics::new());
		assert_eq!(metrics.active_connections(), 0);
		{
			let _guard = ConnectionGuard::new(metrics.clone());
			assert_eq!(metrics.active_connections(), 1);
		}
		assert_eq!(metrics.active_connections(), 0);
	}
}
