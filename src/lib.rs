//! A programmable HTTP/HTTPS/WebSocket mocking proxy.
//!
//! The crate accepts raw TCP connections, classifies each one by protocol,
//! matches parsed requests against a user-declared rule table, and either
//! synthesizes a response, forwards the request upstream, or relays the
//! connection as an opaque tunnel. TLS connections to arbitrary hostnames
//! are terminated transparently using leaf certificates minted at runtime
//! under a user-supplied certificate authority.

pub mod ca;
pub mod client;
pub mod config;
pub mod events;
pub mod http;
pub mod proxy;
pub mod rules;
pub mod socks;
pub mod telemetry;
pub mod transport;
pub mod util;

pub use config::Config;
pub use events::{Bus, Event};
pub use proxy::Server;
pub use rules::{Handler, Matcher, Rule, RuleStore};
