use super::*;

/// Builds a minimal but wire-valid TLS 1.2 ClientHello record carrying a
/// single SNI hostname and an ALPN extension, for exercising the parser
/// without a live socket.
fn build_client_hello(host: &str, alpn: &[&str]) -> Vec<u8> {
	let mut sni_ext = Vec::new();
	let name = host.as_bytes();
	sni_ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
	sni_ext.push(0); // name_type: host_name
	sni_ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
	sni_ext.extend_from_slice(name);

	let mut alpn_list = Vec::new();
	for proto in alpn {
		alpn_list.push(proto.len() as u8);
		alpn_list.extend_from_slice(proto.as_bytes());
	}
	let mut alpn_ext = Vec::new();
	alpn_ext.extend_from_slice(&(alpn_list.len() as u16).to_be_bytes());
	alpn_ext.extend_from_slice(&alpn_list);

	let mut extensions = Vec::new();
	extensions.extend_from_slice(&0u16.to_be_bytes()); // ext type 0 = SNI
	extensions.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
	extensions.extend_from_slice(&sni_ext);
	if !alpn.is_empty() {
		extensions.extend_from_slice(&16u16.to_be_bytes()); // ext type 16 = ALPN
		extensions.extend_from_slice(&(alpn_ext.len() as u16).to_be_bytes());
		extensions.extend_from_slice(&alpn_ext);
	}

	let mut hs_body = Vec::new();
	hs_body.extend_from_slice(&[0x03, 0x03]); // client_version: TLS 1.2
	hs_body.extend_from_slice(&[0u8; 32]); // random
	hs_body.push(0); // session_id_len
	let cipher_suites: &[u16] = &[0x1301, 0x1302];
	hs_body.extend_from_slice(&((cipher_suites.len() * 2) as u16).to_be_bytes());
	for c in cipher_suites {
		hs_body.extend_from_slice(&c.to_be_bytes());
	}
	hs_body.push(1); // compression methods len
	hs_body.push(0); // null compression
	hs_body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
	hs_body.extend_from_slice(&extensions);

	let mut handshake = Vec::new();
	handshake.push(1); // handshake type: client_hello
	let body_len = hs_body.len() as u32;
	handshake.extend_from_slice(&body_len.to_be_bytes()[1..]);
	handshake.extend_from_slice(&hs_body);

	let mut record = Vec::new();
	record.push(0x16); // content type: handshake
	record.extend_from_slice(&[0x03, 0x01]); // record version
	record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
	record.extend_from_slice(&handshake);
	record
}

#[test]
fn parses_sni_and_alpn_and_cipher_suites() {
	let record = build_client_hello("example.com", &["h2", "http/1.1"]);
	let hello = parse_client_hello(&record).unwrap();
	assert_eq!(hello.sni.as_deref(), Some("example.com"));
	assert_eq!(hello.alpn, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
	assert_eq!(hello.cipher_suites, vec![0x1301, 0x1302]);
}

#[test]
fn parses_sni_without_alpn() {
	let record = build_client_hello("no-alpn.example.com", &[]);
	let hello = parse_client_hello(&record).unwrap();
	assert_eq!(hello.sni.as_deref(), Some("no-alpn.example.com"));
	assert!(hello.alpn.is_empty());
}

#[test]
fn rejects_non_tls_first_byte() {
	let err = parse_client_hello(b"GET / HTTP/1.1\r\n\r\n");
	assert!(matches!(err, Err(Error::NotTls)));
}

#[test]
fn truncated_record_is_malformed() {
	let record = build_client_hello("example.com", &["h2"]);
	let err = parse_client_hello(&record[..10]);
	assert!(matches!(err, Err(Error::MalformedHello(_))));
}

#[test]
fn failure_cause_classifies_reset_vs_cert_rejected() {
	let reset = Error::Handshake(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
	assert_eq!(reset.failure_cause(), "reset");
	let other = Error::Handshake(io::Error::new(io::ErrorKind::InvalidData, "bad cert"));
	assert_eq!(other.failure_cause(), "cert-rejected");
}
