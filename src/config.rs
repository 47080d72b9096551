//! Configuration loading.
//!
//! Mirrors the teacher's `RawConfig`/`Config` split: a `deny_unknown_fields`
//! deserializable struct that a caller can load from YAML, validated into an
//! internal `Config`. Loading a config file, flags, and environment
//! variables is explicitly out of the core's scope (spec.md §1); this module
//! only carries the ambient plumbing an embedder needs to build a `Config`
//! from a file or from code.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ca;
use crate::socks;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawConfig {
	pub listen: Option<RawListen>,
	pub socks: Option<RawSocks>,
	pub ca: Option<RawCa>,
	#[serde(default)]
	pub max_body_size: Option<usize>,
	#[serde(default)]
	pub idle_timeout_secs: Option<u64>,
	#[serde(default)]
	pub logging: Option<RawLogging>,
	/// SNI names (or `*.`-prefixed suffixes) whose TLS connections bypass
	/// interception entirely and are relayed byte-for-byte (spec.md §4.6).
	#[serde(default)]
	pub tls_passthrough: Vec<String>,
	/// Whether a connection the classifier can't identify (spec.md §4.1
	/// "unknown protocol") is relayed byte-for-byte to its destination hint
	/// rather than rejected with a client-error.
	#[serde(default)]
	pub raw_passthrough: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawListen {
	pub port: Option<u16>,
	pub addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawSocks {
	#[serde(default)]
	pub enabled: bool,
	pub port: Option<u16>,
	/// Accepted auth methods: `"no-auth"`, `"user-password-metadata"`,
	/// `"custom-metadata"` (spec.md §4.11). Empty means all three.
	#[serde(default)]
	pub auth_methods: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawCa {
	pub cert: Option<PathBuf>,
	pub key: Option<PathBuf>,
	pub cert_pem: Option<String>,
	pub key_pem: Option<String>,
	pub key_length: Option<u16>,
	pub country: Option<String>,
	pub locality: Option<String>,
	pub organization: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawLogging {
	pub filter: Option<String>,
}

/// Validated, in-memory configuration used to build a [`crate::proxy::Server`].
#[derive(Debug, Clone, Serialize)]
pub struct Config {
	pub listen_addr: SocketAddr,
	pub socks_addr: Option<SocketAddr>,
	pub socks_auth: socks::AuthPolicy,
	#[serde(skip)]
	pub ca: Option<ca::CaMaterial>,
	pub max_body_size: usize,
	pub idle_timeout_secs: u64,
	pub logging_filter: String,
	pub tls_passthrough: Vec<String>,
	pub raw_passthrough: bool,
}

pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PORT_SEARCH_START: u16 = 8000;

impl Config {
	/// Builds a [`Config`] from a [`RawConfig`], searching for a free port
	/// starting at 8000 when none is specified (spec.md §6).
	pub fn from_raw(raw: RawConfig) -> anyhow::Result<Self> {
		let listen = raw.listen.unwrap_or_default();
		let addr = listen.addr.unwrap_or_else(|| "127.0.0.1".to_string());
		let port = listen.port.unwrap_or(DEFAULT_PORT_SEARCH_START);
		let listen_addr: SocketAddr = format!("{addr}:{port}").parse()?;

		let (socks_addr, socks_auth) = match raw.socks {
			Some(RawSocks {
				enabled: true,
				port,
				auth_methods,
			}) => {
				let port = port.unwrap_or(DEFAULT_PORT_SEARCH_START + 1);
				(Some(format!("{addr}:{port}").parse()?), socks::AuthPolicy::from_names(&auth_methods))
			},
			_ => (None, socks::AuthPolicy::all()),
		};

		let ca = raw.ca.map(ca::CaMaterial::from_raw).transpose()?;

		Ok(Self {
			listen_addr,
			socks_addr,
			socks_auth,
			ca,
			max_body_size: raw.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE),
			idle_timeout_secs: raw.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
			logging_filter: raw
				.logging
				.and_then(|l| l.filter)
				.unwrap_or_else(|| "info".to_string()),
			tls_passthrough: raw.tls_passthrough,
			raw_passthrough: raw.raw_passthrough,
		})
	}

	/// Whether `sni` falls under the `tlsPassthrough` bypass list: an exact
	/// match, or a suffix match against a `*.`-prefixed entry (spec.md §4.6,
	/// §8 "`shouldPassThrough` is exclusive").
	pub fn tls_should_pass_through(&self, sni: &str) -> bool {
		self.tls_passthrough.iter().any(|pattern| match pattern.strip_prefix("*.") {
			Some(suffix) => sni == suffix || sni.ends_with(&format!(".{suffix}")),
			None => sni == pattern,
		})
	}

	pub async fn load_file(path: &std::path::Path) -> anyhow::Result<Self> {
		let contents = fs_err::tokio::read_to_string(path).await?;
		let raw: RawConfig = serde_yaml::from_str(&contents)?;
		Self::from_raw(raw)
	}
}

impl ca::CaMaterial {
	fn from_raw(raw: RawCa) -> anyhow::Result<Self> {
		let cert_pem = match (raw.cert_pem, raw.cert) {
			(Some(pem), _) => pem,
			(None, Some(path)) => fs_err::read_to_string(path)?,
			(None, None) => anyhow::bail!("CA certificate must be provided as `cert` or `certPem`"),
		};
		let key_pem = match (raw.key_pem, raw.key) {
			(Some(pem), _) => pem,
			(None, Some(path)) => fs_err::read_to_string(path)?,
			(None, None) => anyhow::bail!("CA key must be provided as `key` or `keyPem`"),
		};
		Ok(ca::CaMaterial {
			cert_pem,
			key_pem,
			key_length: raw.key_length.unwrap_or(2048),
			subject: ca::SubjectTemplate {
				country: raw.country,
				locality: raw.locality,
				organization: raw.organization,
			},
			name_constraints: Vec::new(),
		})
	}
}
