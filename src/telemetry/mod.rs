//! Structured logging and lightweight metrics (spec.md §2 rows N/O): a
//! `tracing`-based subscriber and a handful of in-process counters, with no
//! external metrics backend wired up.

pub mod log;
pub mod metrics;
