//! The on-the-fly certificate authority (spec.md §4.2).
//!
//! Loads a user-supplied CA key+cert pair, mints leaf certificates for
//! arbitrary SNI hostnames on demand, and caches them by canonical hostname.
//! Concurrent requests for the same hostname collapse into a single
//! outstanding generation.

mod keypair;
mod leaf;
mod pkcs1;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use rcgen::{Issuer, KeyPair};
use tokio::sync::Notify;

pub use leaf::canonicalize_host;

#[derive(Debug, Clone, Default)]
pub struct SubjectTemplate {
	pub country: Option<String>,
	pub locality: Option<String>,
	pub organization: Option<String>,
}

/// Raw CA inputs as supplied by configuration: PEM bytes, not yet parsed.
#[derive(Debug, Clone)]
pub struct CaMaterial {
	pub cert_pem: String,
	pub key_pem: String,
	pub key_length: u16,
	pub subject: SubjectTemplate,
	/// Permitted DNS subtrees (name constraints); empty means unconstrained.
	pub name_constraints: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("failed to parse CA certificate: {0}")]
	InvalidCertificate(String),
	#[error("failed to parse CA private key: {0}")]
	InvalidKey(String),
	#[error("cannot mint a certificate for host {0:?}: cannot be safely wildcarded")]
	UnwildcardableHost(String),
	#[error(transparent)]
	Generation(#[from] anyhow::Error),
}

/// A cached leaf certificate, keyed by canonical hostname.
#[derive(Clone)]
pub struct CacheEntry {
	pub key_pair: Arc<KeyPair>,
	pub cert_der: rustls_pki_types::CertificateDer<'static>,
	pub ca_cert_der: rustls_pki_types::CertificateDer<'static>,
	pub expires_at: SystemTime,
}

enum Slot {
	Ready(CacheEntry),
	Building(Arc<Notify>),
}

/// The loaded CA plus its leaf-certificate cache.
pub struct CertificateAuthority {
	// `rcgen::KeyPair` isn't `Clone` (0.13), and `Issuer::from_ca_cert_pem`
	// takes it by value, so the PEM is kept around and re-parsed inside each
	// `spawn_blocking` closure rather than holding a live `KeyPair` here.
	issuer_key_pem: String,
	issuer_cert_pem: String,
	ca_cert_der: rustls_pki_types::CertificateDer<'static>,
	subject: SubjectTemplate,
	key_length: u16,
	cache: Mutex<HashMap<String, Slot>>,
}

impl CertificateAuthority {
	pub fn load(material: &CaMaterial) -> Result<Self, Error> {
		let issuer_key_pem = pkcs1::ensure_pkcs8_pem(&material.key_pem)
			.map_err(|e| Error::InvalidKey(e.to_string()))?;
		// Parsed once here purely to fail fast on a malformed key; the parsed
		// value is discarded and re-derived per-generation below.
		KeyPair::from_pem(&issuer_key_pem).map_err(|e| Error::InvalidKey(e.to_string()))?;

		let ca_cert_der = {
			let mut reader = std::io::Cursor::new(material.cert_pem.as_bytes());
			let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
				.collect::<Result<_, _>>()
				.map_err(|e| Error::InvalidCertificate(e.to_string()))?;
			certs
				.into_iter()
				.next()
				.ok_or_else(|| Error::InvalidCertificate("no certificate in PEM".into()))?
		};

		Ok(Self {
			issuer_key_pem,
			issuer_cert_pem: material.cert_pem.clone(),
			ca_cert_der,
			subject: material.subject.clone(),
			key_length: material.key_length,
			cache: Mutex::new(HashMap::new()),
		})
	}

	pub fn ca_certificate_der(&self) -> &rustls_pki_types::CertificateDer<'static> {
		&self.ca_cert_der
	}

	/// Returns a leaf certificate for `host`, minting and caching one if
	/// needed. `host` is canonicalized (underscore rewrite) before lookup.
	pub async fn certificate_for(&self, host: &str) -> Result<CacheEntry, Error> {
		let canonical =
			canonicalize_host(host).ok_or_else(|| Error::UnwildcardableHost(host.to_string()))?;

		loop {
			let wait = {
				let mut cache = self.cache.lock();
				match cache.get(&canonical) {
					Some(Slot::Ready(entry)) => return Ok(entry.clone()),
					Some(Slot::Building(notify)) => Some(notify.clone()),
					None => {
						cache.insert(canonical.clone(), Slot::Building(Arc::new(Notify::new())));
						None
					},
				}
			};
			if let Some(notify) = wait {
				notify.notified().await;
				continue;
			}
			// We are the single builder for this hostname.
			let result = self.generate(&canonical).await;
			let mut cache = self.cache.lock();
			match result {
				Ok(entry) => {
					if let Some(Slot::Building(notify)) =
						cache.insert(canonical.clone(), Slot::Ready(entry.clone()))
					{
						notify.notify_waiters();
					}
					return Ok(entry);
				},
				Err(e) => {
					if let Some(Slot::Building(notify)) = cache.remove(&canonical) {
						notify.notify_waiters();
					}
					return Err(e);
				},
			}
		}
	}

	async fn generate(&self, canonical_host: &str) -> Result<CacheEntry, Error> {
		let host = canonical_host.to_string();
		let leaf_key = keypair::shared(self.key_length)?;
		let issuer_key_pem = self.issuer_key_pem.clone();
		let issuer_cert_pem = self.issuer_cert_pem.clone();
		let subject = self.subject.clone();
		let ca_cert_der = self.ca_cert_der.clone();

		let leaf = tokio::task::spawn_blocking(move || -> anyhow::Result<leaf::Leaf> {
			let issuer_key = KeyPair::from_pem(&issuer_key_pem)?;
			let issuer = Issuer::from_ca_cert_pem(&issuer_cert_pem, issuer_key)?;
			leaf::generate(&host, leaf_key, &issuer, &subject)
		})
		.await
		.map_err(|e| Error::Generation(anyhow::anyhow!("cert generation task panicked: {e}")))??;

		Ok(CacheEntry {
			key_pair: leaf.key_pair,
			cert_der: leaf.cert_der,
			ca_cert_der,
			expires_at: leaf.expires_at.into(),
		})
	}
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
