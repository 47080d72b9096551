//! Leaf certificate synthesis (spec.md §4.2).

use std::time::Duration;

use rcgen::{
	BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType,
	ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use time::OffsetDateTime;

use super::SubjectTemplate;

const ONE_YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);
const BACKDATE: Duration = Duration::from_secs(24 * 60 * 60);

/// `domainValidated` policy OID (2.23.140.1.2.1) wrapped in a single-entry
/// `CertificatePolicies` SEQUENCE, pre-encoded as DER since rcgen has no
/// first-class CertificatePolicies builder.
const CERT_POLICIES_DOMAIN_VALIDATED: &[u8] =
	&[0x30, 0x0A, 0x30, 0x08, 0x06, 0x06, 0x67, 0x81, 0x0C, 0x01, 0x02, 0x01];
const OID_CERTIFICATE_POLICIES: &[u64] = &[2, 5, 29, 32];

/// Rewrites a hostname containing underscores to the `*.`-wildcard form
/// required because TLS forbids underscores in DNS names (spec.md §4.2).
///
/// Returns `None` when the host cannot be safely wildcarded: a single label,
/// or underscores appearing outside the leftmost label.
pub fn canonicalize_host(host: &str) -> Option<String> {
	if !host.contains('_') {
		return Some(host.to_string());
	}
	let mut labels: Vec<&str> = host.split('.').collect();
	if labels.len() < 2 {
		return None;
	}
	let (first, rest) = labels.split_at_mut(1);
	if rest.iter().any(|l| l.contains('_')) {
		return None;
	}
	let _ = first; // leftmost label is discarded, replaced by `*`
	labels[0] = "*";
	Some(labels.join("."))
}

fn random_serial() -> SerialNumber {
	use rand::RngCore;
	let mut bytes = [0u8; 16];
	rand::thread_rng().fill_bytes(&mut bytes);
	// Force the top bit low-order-1 so the integer is unambiguously positive
	// and fixed-length once DER-encoded (spec.md §4.2).
	bytes[0] |= 0x01;
	bytes[0] &= 0x7f;
	SerialNumber::from_slice(&bytes)
}

/// A freshly minted leaf certificate plus the key it was signed for.
pub struct Leaf {
	pub key_pair: std::sync::Arc<KeyPair>,
	pub cert_der: rcgen::CertificateDer<'static>,
	pub cert_pem: String,
	pub expires_at: OffsetDateTime,
}

/// Generates a leaf certificate for `host` (already canonicalized: either a
/// literal hostname or a `*.`-prefixed wildcard), signed by `issuer`.
pub fn generate(
	host: &str,
	leaf_key: std::sync::Arc<KeyPair>,
	issuer: &Issuer<'_, KeyPair>,
	subject: &SubjectTemplate,
) -> anyhow::Result<Leaf> {
	let mut params = CertificateParams::new(Vec::<String>::new())?;

	let mut dn = DistinguishedName::new();
	if let Some(c) = &subject.country {
		dn.push(DnType::CountryName, c.as_str());
	}
	if let Some(o) = &subject.organization {
		dn.push(DnType::OrganizationName, o.as_str());
	}
	if let Some(l) = &subject.locality {
		dn.push(DnType::LocalityName, l.as_str());
	}
	// Wildcard certs omit the CN, per spec.md §4.2.
	if !host.starts_with("*.") {
		dn.push(DnType::CommonName, host);
	}
	params.distinguished_name = dn;

	let now = OffsetDateTime::now_utc();
	params.not_before = now - BACKDATE;
	params.not_after = now + ONE_YEAR;
	params.serial_number = Some(random_serial());
	params.is_ca = IsCa::ExplicitNoCa;
	params.key_usages = vec![
		KeyUsagePurpose::DigitalSignature,
		KeyUsagePurpose::KeyEncipherment,
	];
	params.extended_key_usages = vec![
		ExtendedKeyUsagePurpose::ServerAuth,
		ExtendedKeyUsagePurpose::ClientAuth,
	];
	params.subject_alt_names = vec![SanType::DnsName(host.try_into()?)];
	params.custom_extensions = vec![CustomExtension::from_oid_content(
		OID_CERTIFICATE_POLICIES,
		CERT_POLICIES_DOMAIN_VALIDATED.to_vec(),
	)];
	// rcgen derives the AuthorityKeyIdentifier extension from `issuer` automatically.

	let cert = params.signed_by(&leaf_key, issuer)?;
	let cert_der = cert.der().clone();
	let cert_pem = cert.pem();

	Ok(Leaf {
		key_pair: leaf_key.clone(),
		cert_der,
		cert_pem,
		expires_at: now + ONE_YEAR,
	})
}

#[cfg(test)]
#[path = "leaf_tests.rs"]
mod tests;
