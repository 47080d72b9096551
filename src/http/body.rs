//! The body handle (spec.md §3, §4.9, §9 "Body streams"): a streaming body
//! that buffers up to `maxBodySize` while tee-ing every byte to a live
//! forward channel so buffering never blocks forwarding, or a completed body
//! with lazy, memoized decoded views.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::events::{BodyTruncatedEvent, Bus, Event};
use crate::util::RequestId;

use super::Error;
use super::compression;

/// A single completed, in-memory body plus its lazily memoized decoded
/// views (spec.md §9). Not `Clone`-cheap by design: wrap in `Arc` to share.
pub struct CompletedBody {
	raw: Bytes,
	decoded: OnceCell<Result<Bytes, String>>,
	text: OnceCell<Result<Arc<str>, String>>,
	json: OnceCell<Result<serde_json::Value, String>>,
	form: OnceCell<Result<Vec<(String, String)>, String>>,
}

impl std::fmt::Debug for CompletedBody {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CompletedBody").field("len", &self.raw.len()).finish()
	}
}

impl CompletedBody {
	pub fn new(raw: Bytes) -> Self {
		Self {
			raw,
			decoded: OnceCell::new(),
			text: OnceCell::new(),
			json: OnceCell::new(),
			form: OnceCell::new(),
		}
	}

	pub fn raw(&self) -> &Bytes {
		&self.raw
	}

	/// The decoded-content-encoding view. `encoding` is the value of the
	/// relevant `Content-Encoding` header, or `None`/`"identity"` for none.
	pub fn decoded(&self, encoding: Option<&str>) -> Result<&Bytes, Error> {
		self.decoded
			.get_or_init(|| compression::decode(&self.raw, encoding).map_err(|e| e.to_string()))
			.as_ref()
			.map_err(|e| Error::UnsupportedEncoding(e.clone()))
	}

	pub fn text(&self, encoding: Option<&str>) -> Result<&str, Error> {
		let decoded = self.decoded(encoding)?.clone();
		self.text
			.get_or_init(|| {
				String::from_utf8(decoded.to_vec()).map(Arc::from).map_err(|e| e.to_string())
			})
			.as_deref()
			.map_err(|e| Error::UnsupportedEncoding(e.clone()))
	}

	pub fn json(&self, encoding: Option<&str>) -> Result<&serde_json::Value, Error> {
		let text = self.text(encoding)?.to_string();
		self.json
			.get_or_init(|| serde_json::from_str(&text).map_err(|e| e.to_string()))
			.as_ref()
			.map_err(|e| Error::UnsupportedEncoding(e.clone()))
	}

	/// The `application/x-www-form-urlencoded` view.
	pub fn form(&self, encoding: Option<&str>) -> Result<&[(String, String)], Error> {
		let text = self.text(encoding)?.to_string();
		self.form
			.get_or_init(|| {
				serde_urlencoded::from_str::<Vec<(String, String)>>(&text).map_err(|e| e.to_string())
			})
			.as_deref()
			.map_err(|e| Error::UnsupportedEncoding(e.clone()))
	}

	/// Parses a `multipart/form-data` body given the `boundary` parameter
	/// from the `Content-Type` header. Not memoized — multipart matching is
	/// rare enough relative to JSON/form that caching every parse isn't
	/// worth the extra cell.
	pub fn multipart(&self, encoding: Option<&str>, boundary: &str) -> Result<Vec<MultipartPart>, Error> {
		let decoded = self.decoded(encoding)?;
		Ok(parse_multipart(decoded, boundary))
	}
}

#[derive(Debug, Clone)]
pub struct MultipartPart {
	pub name: String,
	pub filename: Option<String>,
	pub content: Bytes,
}

fn parse_multipart(body: &Bytes, boundary: &str) -> Vec<MultipartPart> {
	let delim = format!("--{boundary}");
	let mut parts = Vec::new();
	// Split on the boundary delimiter; the first and last segments are the
	// preamble/epilogue and are discarded.
	let text = String::from_utf8_lossy(body);
	let segments: Vec<&str> = text.split(delim.as_str()).collect();
	for segment in segments.iter().skip(1) {
		let segment = segment.trim_start_matches("\r\n");
		if segment.starts_with("--") || segment.is_empty() {
			continue;
		}
		let Some(header_end) = segment.find("\r\n\r\n") else { continue };
		let headers_block = &segment[..header_end];
		let mut content = &segment[header_end + 4..];
		content = content.trim_end_matches("\r\n");

		let mut name = None;
		let mut filename = None;
		for line in headers_block.split("\r\n") {
			let Some(value) = line
				.to_ascii_lowercase()
				.starts_with("content-disposition")
				.then(|| line.splitn(2, ':').nth(1))
				.flatten()
			else {
				continue;
			};
			for field in value.split(';').map(str::trim) {
				if let Some(v) = field.strip_prefix("name=") {
					name = Some(v.trim_matches('"').to_string());
				} else if let Some(v) = field.strip_prefix("filename=") {
					filename = Some(v.trim_matches('"').to_string());
				}
			}
		}
		if let Some(name) = name {
			parts.push(MultipartPart { name, filename, content: Bytes::copy_from_slice(content.as_bytes()) });
		}
	}
	parts
}

/// A live, in-flight body. Frames are tee-ed: forwarded immediately to
/// [`take_stream`]'s receiver, and separately accumulated up to
/// `max_body_size` for [`buffered`] — buffering never blocks forwarding
/// (spec.md §4.9).
pub struct StreamingBody {
	live: Mutex<Option<mpsc::Receiver<Bytes>>>,
	buffered_rx: watch::Receiver<Option<Bytes>>,
	truncated: Arc<AtomicBool>,
}

impl std::fmt::Debug for StreamingBody {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamingBody").field("truncated", &self.truncated.load(Ordering::Relaxed)).finish()
	}
}

impl StreamingBody {
	/// Takes the live-forward receiver. Returns `None` if already taken —
	/// the handle is not restartable for live forwarding (spec.md §9), only
	/// [`buffered`] can be asked for repeatedly.
	pub fn take_stream(&self) -> Option<mpsc::Receiver<Bytes>> {
		self.live.lock().take()
	}

	/// Resolves once the body is fully buffered or truncated. Per spec.md
	/// §4.9, a truncated body resolves as empty while the live stream keeps
	/// flowing independently.
	pub async fn buffered(&self) -> Bytes {
		let mut rx = self.buffered_rx.clone();
		loop {
			if let Some(b) = rx.borrow().clone() {
				return b;
			}
			if rx.changed().await.is_err() {
				return Bytes::new();
			}
		}
	}

	pub fn is_truncated(&self) -> bool {
		self.truncated.load(Ordering::Relaxed)
	}
}

/// Spawns the background pump that tees `body`'s frames into a live-forward
/// channel and a size-capped accumulator (spec.md §4.9). The first time the
/// accumulator would exceed `max_body_size`, publishes a
/// [`Event::BodyTruncated`] on `bus` — truncation is observable via the
/// event bus and never silent (spec.md §3, §7).
pub fn spawn_tee<B>(mut body: B, max_body_size: usize, bus: Arc<Bus>, request_id: RequestId) -> StreamingBody
where
	B: http_body::Body<Data = Bytes> + Unpin + Send + 'static,
	B::Error: std::fmt::Display + Send,
{
	use http_body_util::BodyExt;

	let (tx, rx) = mpsc::channel::<Bytes>(32);
	let (buf_tx, buf_rx) = watch::channel(None);
	let truncated = Arc::new(AtomicBool::new(false));
	let truncated_task = truncated.clone();

	tokio::spawn(async move {
		let mut acc = BytesMut::new();
		let mut acc_truncated = false;
		loop {
			let frame = match body.frame().await {
				Some(Ok(frame)) => frame,
				Some(Err(e)) => {
					tracing::debug!(error = %e, "body stream ended with an error");
					break;
				},
				None => break,
			};
			let Ok(data) = frame.into_data() else { continue };
			let _ = tx.send(data.clone()).await;
			if !acc_truncated {
				if acc.len() + data.len() > max_body_size {
					acc_truncated = true;
					truncated_task.store(true, Ordering::Relaxed);
					bus.publish(Event::BodyTruncated(BodyTruncatedEvent {
						request_id: request_id.clone(),
						byte_len: acc.len(),
					}));
				} else {
					acc.extend_from_slice(&data);
				}
			}
		}
		let _ = buf_tx.send(Some(if acc_truncated { Bytes::new() } else { acc.freeze() }));
	});

	StreamingBody { live: Mutex::new(Some(rx)), buffered_rx: buf_rx, truncated }
}

/// A request/response body in either of its two lifecycle states
/// (spec.md §3).
#[derive(Clone)]
pub enum Body {
	Streaming(Arc<StreamingBody>),
	Completed(Arc<CompletedBody>),
}

impl std::fmt::Debug for Body {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Body::Streaming(s) => f.debug_tuple("Streaming").field(s).finish(),
			Body::Completed(c) => f.debug_tuple("Completed").field(c).finish(),
		}
	}
}

impl Body {
	pub fn empty() -> Self {
		Body::Completed(Arc::new(CompletedBody::new(Bytes::new())))
	}

	pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
		Body::Completed(Arc::new(CompletedBody::new(bytes.into())))
	}

	pub fn streaming(body: StreamingBody) -> Self {
		Body::Streaming(Arc::new(body))
	}

	/// Resolves to a [`CompletedBody`], buffering a streaming body first if
	/// necessary. Once resolved, a streaming body's buffered bytes are
	/// cached for subsequent calls (spec.md §9 "replays from the cached
	/// buffer").
	pub async fn completed(&self) -> Arc<CompletedBody> {
		match self {
			Body::Completed(c) => c.clone(),
			Body::Streaming(s) => Arc::new(CompletedBody::new(s.buffered().await)),
		}
	}

	/// Whether this body has been truncated against `maxBodySize` so far
	/// (spec.md §3, §7 "Body truncated ... tag on request"). Always `false`
	/// for an already-[`Body::Completed`] body.
	pub fn is_truncated(&self) -> bool {
		match self {
			Body::Completed(_) => false,
			Body::Streaming(s) => s.is_truncated(),
		}
	}
}

#[cfg(test)]
#[path = "body_tests.rs"]
mod tests;
