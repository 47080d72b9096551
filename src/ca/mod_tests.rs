use super::*;

fn test_material() -> CaMaterial {
	// A throwaway self-signed CA, generated fresh for the test so no
	// fixture files are needed.
	let key = KeyPair::generate().unwrap();
	let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
	params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
	let mut dn = rcgen::DistinguishedName::new();
	dn.push(rcgen::DnType::CommonName, "mockproxy test CA");
	params.distinguished_name = dn;
	let cert = params.self_signed(&key).unwrap();

	CaMaterial {
		cert_pem: cert.pem(),
		key_pem: key.serialize_pem(),
		key_length: 1024,
		subject: SubjectTemplate::default(),
		name_constraints: Vec::new(),
	}
}

#[tokio::test]
async fn mints_a_leaf_for_a_fresh_host() {
	let material = test_material();
	let ca = CertificateAuthority::load(&material).unwrap();
	let entry = ca.certificate_for("example.com").await.unwrap();
	assert!(!entry.cert_der.is_empty());
}

#[tokio::test]
async fn caches_leaf_by_canonical_hostname() {
	let material = test_material();
	let ca = CertificateAuthority::load(&material).unwrap();
	let first = ca.certificate_for("my_host.example.com").await.unwrap();
	let second = ca.certificate_for("other_host.example.com").await.unwrap();
	// Both canonicalize to `*.example.com` and must share the same entry.
	assert_eq!(first.cert_der, second.cert_der);
}

#[tokio::test]
async fn concurrent_requests_for_same_host_collapse() {
	let material = test_material();
	let ca = Arc::new(CertificateAuthority::load(&material).unwrap());
	let mut set = tokio::task::JoinSet::new();
	for _ in 0..8 {
		let ca = ca.clone();
		set.spawn(async move { ca.certificate_for("shared.example.com").await.unwrap() });
	}
	let mut results = Vec::new();
	while let Some(res) = set.join_next().await {
		results.push(res.unwrap());
	}
	let first = &results[0].cert_der;
	assert!(results.iter().all(|e| &e.cert_der == first));
}

#[tokio::test]
async fn unwildcardable_host_fails() {
	let material = test_material();
	let ca = CertificateAuthority::load(&material).unwrap();
	assert!(ca.certificate_for("local_host").await.is_err());
}
