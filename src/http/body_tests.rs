use std::convert::Infallible;

use futures_util::stream;
use http_body_util::StreamBody;

use crate::events::Bus;

use super::*;

fn make_body(chunks: Vec<&'static str>) -> impl http_body::Body<Data = Bytes, Error = Infallible> + Unpin + Send + 'static {
	let frames = chunks.into_iter().map(|c| Ok(http_body::Frame::data(Bytes::from_static(c.as_bytes()))));
	StreamBody::new(stream::iter(frames))
}

#[tokio::test]
async fn tee_forwards_and_buffers_small_body() {
	let body = make_body(vec!["hello", " world"]);
	let streaming = spawn_tee(body, 1024, Bus::new(), "r1".into());
	let mut rx = streaming.take_stream().unwrap();
	let mut forwarded = Vec::new();
	while let Some(chunk) = rx.recv().await {
		forwarded.extend_from_slice(&chunk);
	}
	assert_eq!(forwarded, b"hello world");
	assert_eq!(streaming.buffered().await, Bytes::from_static(b"hello world"));
	assert!(!streaming.is_truncated());
}

#[tokio::test]
async fn tee_truncates_buffer_but_keeps_forwarding() {
	let bus = Bus::new();
	let mut events = bus.subscribe();
	let body = make_body(vec!["0123456789", "more-bytes-here"]);
	let streaming = spawn_tee(body, 5, bus, "r1".into());
	let mut rx = streaming.take_stream().unwrap();
	let mut forwarded = Vec::new();
	while let Some(chunk) = rx.recv().await {
		forwarded.extend_from_slice(&chunk);
	}
	assert_eq!(forwarded.len(), 25);
	assert_eq!(streaming.buffered().await, Bytes::new());
	assert!(streaming.is_truncated());

	let event = events.recv().await.expect("a BodyTruncated event is published");
	assert!(matches!(event, crate::events::Event::BodyTruncated(_)));
}

#[tokio::test]
async fn take_stream_returns_none_on_second_call() {
	let body = make_body(vec!["x"]);
	let streaming = spawn_tee(body, 16, Bus::new(), "r1".into());
	assert!(streaming.take_stream().is_some());
	assert!(streaming.take_stream().is_none());
}

#[test]
fn completed_body_memoizes_json_view() {
	let body = CompletedBody::new(Bytes::from_static(br#"{"a":1}"#));
	let first = body.json(None).unwrap().clone();
	let second = body.json(None).unwrap();
	assert_eq!(&first, second);
}

#[test]
fn completed_body_rejects_invalid_json() {
	let body = CompletedBody::new(Bytes::from_static(b"not json"));
	assert!(body.json(None).is_err());
}

#[test]
fn form_view_decodes_url_encoded_pairs() {
	let body = CompletedBody::new(Bytes::from_static(b"a=1&b=two"));
	let pairs = body.form(None).unwrap();
	assert_eq!(pairs, &[("a".to_string(), "1".to_string()), ("b".to_string(), "two".to_string())]);
}

#[test]
fn multipart_parses_name_filename_and_content() {
	let raw = "--B\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\nfile-bytes\r\n--B--\r\n";
	let body = CompletedBody::new(Bytes::copy_from_slice(raw.as_bytes()));
	let parts = body.multipart(None, "B").unwrap();
	assert_eq!(parts.len(), 2);
	assert_eq!(parts[0].name, "field");
	assert_eq!(parts[0].content, Bytes::from_static(b"value"));
	assert_eq!(parts[1].filename.as_deref(), Some("a.txt"));
}
