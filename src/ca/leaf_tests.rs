use super::*;

#[test]
fn underscore_leftmost_label_is_wildcarded() {
	assert_eq!(
		canonicalize_host("my_host.example.com").as_deref(),
		Some("*.example.com")
	);
}

#[test]
fn underscore_free_host_is_unchanged() {
	assert_eq!(
		canonicalize_host("example.com").as_deref(),
		Some("example.com")
	);
}

#[test]
fn single_label_with_underscore_cannot_be_wildcarded() {
	assert_eq!(canonicalize_host("local_host"), None);
}

#[test]
fn underscore_in_interior_label_cannot_be_wildcarded() {
	assert_eq!(canonicalize_host("a.b_c.example.com"), None);
}

#[test]
fn serials_are_sixteen_bytes_and_positive() {
	for _ in 0..8 {
		let serial = random_serial();
		let bytes = serial.as_ref();
		assert_eq!(bytes.len(), 16);
		assert_eq!(bytes[0] & 0x80, 0, "high bit must be clear to stay positive");
	}
}
