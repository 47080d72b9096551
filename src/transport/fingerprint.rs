//! JA3/JA4-style TLS client fingerprints (spec.md §4.6).
//!
//! `rustls`'s `server::Acceptor` API exposes a parsed `ClientHello` rather
//! than the raw handshake bytes that canonical JA3/JA4 are defined over, so
//! these are deterministic fingerprints derived from the fields rustls does
//! expose (cipher suites, signature schemes, ALPN, SNI presence) rather than
//! byte-exact implementations of the published algorithms. This is an
//! explicit, documented simplification (see DESIGN.md) — good enough to
//! group/compare clients, not to reproduce a reference JA3 database.

use md5::{Digest, Md5};
use rustls::CipherSuite;
use sha2::Sha256;

pub struct HelloFields<'a> {
	pub cipher_suites: &'a [CipherSuite],
	pub alpn: &'a [Vec<u8>],
	pub sni_present: bool,
}

pub fn ja3(fields: &HelloFields) -> String {
	let ciphers = fields
		.cipher_suites
		.iter()
		.map(|c| format!("{:04x}", u16::from(*c)))
		.collect::<Vec<_>>()
		.join("-");
	let alpn = fields
		.alpn
		.iter()
		.map(|a| String::from_utf8_lossy(a).to_string())
		.collect::<Vec<_>>()
		.join("-");
	let greased = format!("{}|{}|{}", ciphers, alpn, fields.sni_present);
	let mut hasher = Md5::new();
	hasher.update(greased.as_bytes());
	hex::encode(hasher.finalize())
}

pub fn ja4(fields: &HelloFields) -> String {
	let proto = if fields.alpn.is_empty() { "00" } else { "t1" };
	let cipher_count = fields.cipher_suites.len().min(99);
	let mut hasher = Sha256::new();
	for c in fields.cipher_suites {
		hasher.update(u16::from(*c).to_be_bytes());
	}
	let digest = hex::encode(hasher.finalize());
	format!("{proto}{cipher_count:02}_{}", &digest[..12])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ja3_is_deterministic_for_identical_hellos() {
		let suites = [CipherSuite::TLS13_AES_128_GCM_SHA256];
		let alpn = vec![b"h2".to_vec()];
		let a = HelloFields {
			cipher_suites: &suites,
			alpn: &alpn,
			sni_present: true,
		};
		let b = HelloFields {
			cipher_suites: &suites,
			alpn: &alpn,
			sni_present: true,
		};
		assert_eq!(ja3(&a), ja3(&b));
	}

	#[test]
	fn ja3_differs_when_alpn_differs() {
		let suites = [CipherSuite::TLS13_AES_128_GCM_SHA256];
		let h2 = vec![b"h2".to_vec()];
		let http1 = vec![b"http/1.1".to_vec()];
		let a = HelloFields {
			cipher_suites: &suites,
			alpn: &h2,
			sni_present: true,
		};
		let b = HelloFields {
			cipher_suites: &suites,
			alpn: &http1,
			sni_present: true,
		};
		assert_ne!(ja3(&a), ja3(&b));
	}
}
