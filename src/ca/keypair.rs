//! The process-wide leaf keypair.
//!
//! Leaf keys in a mock-CA context are not secrets, and RSA key generation is
//! comparatively expensive, so every minted leaf certificate reuses one
//! lazily generated keypair (spec.md §4.2). The cell regenerates only when a
//! caller asks for a strictly larger key length than what is cached.

use std::sync::Arc;

use parking_lot::RwLock;
use rsa::pkcs8::EncodePrivateKey;

struct Cached {
	bits: u16,
	key: Arc<rcgen::KeyPair>,
}

static SHARED: RwLock<Option<Cached>> = RwLock::new(None);

/// Returns the shared leaf keypair, generating (or regenerating, if a larger
/// size is now requested) it as needed.
pub fn shared(bits: u16) -> anyhow::Result<Arc<rcgen::KeyPair>> {
	if let Some(cached) = SHARED.read().as_ref() {
		if cached.bits >= bits {
			return Ok(cached.key.clone());
		}
	}

	let mut guard = SHARED.write();
	if let Some(cached) = guard.as_ref() {
		if cached.bits >= bits {
			return Ok(cached.key.clone());
		}
	}

	let key = Arc::new(generate_rsa_keypair(bits)?);
	*guard = Some(Cached {
		bits,
		key: key.clone(),
	});
	Ok(key)
}

fn generate_rsa_keypair(bits: u16) -> anyhow::Result<rcgen::KeyPair> {
	let mut rng = rand::thread_rng();
	let private_key = rsa::RsaPrivateKey::new(&mut rng, bits as usize)
		.map_err(|e| anyhow::anyhow!("failed to generate RSA key: {e}"))?;
	let pkcs8_der = private_key
		.to_pkcs8_der()
		.map_err(|e| anyhow::anyhow!("failed to encode RSA key as PKCS#8: {e}"))?;
	rcgen::KeyPair::from_pkcs8_der_and_sign_algo(
		&rcgen::PrivateKeyDer::Pkcs8(pkcs8_der.as_bytes().to_vec().into()),
		&rcgen::PKCS_RSA_SHA256,
	)
	.map_err(|e| anyhow::anyhow!("failed to wrap RSA key for rcgen: {e}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn regenerates_only_on_size_increase() {
		// Smaller requests after a larger one must return the already-cached
		// (larger) key rather than regenerating it.
		let a = shared(1024).unwrap();
		let b = shared(1024).unwrap();
		assert!(Arc::ptr_eq(&a, &b));
	}
}
