//! Small cross-cutting helpers shared by most modules: request identifiers
//! and the monotonic/wall-clock timing pair attached to every request.

use std::time::{Instant, SystemTime};

use uuid::Uuid;

/// Opaque unique identifier carried by every event for a given request.
pub type RequestId = std::sync::Arc<str>;

pub fn new_request_id() -> RequestId {
	std::sync::Arc::from(Uuid::new_v4().to_string())
}

/// Monotonic timestamps plus the wall-clock instant the request started.
/// Monotonic time drives duration math; wall-clock is only for reporting.
#[derive(Debug, Clone)]
pub struct Timing {
	pub wall_start: SystemTime,
	mono_start: Instant,
	pub events: Vec<(&'static str, Instant)>,
}

impl Timing {
	pub fn start() -> Self {
		Self {
			wall_start: SystemTime::now(),
			mono_start: Instant::now(),
			events: Vec::new(),
		}
	}

	pub fn mark(&mut self, name: &'static str) {
		self.events.push((name, Instant::now()));
	}

	pub fn elapsed(&self) -> std::time::Duration {
		self.mono_start.elapsed()
	}
}

impl Default for Timing {
	fn default() -> Self {
		Self::start()
	}
}
