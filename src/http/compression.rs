//! Content-encoding negotiation (spec.md §3, §4.9): synchronous decode for
//! matcher/decoded-view use, async encode for re-encoding a rewritten
//! passthrough body before it goes back on the wire.

use bytes::Bytes;
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Decodes `data` per `encoding` (a `Content-Encoding` token). `None` and
/// `"identity"` are no-ops; anything else unrecognized is an error localized
/// to the decoded view (spec.md §3).
pub fn decode(data: &Bytes, encoding: Option<&str>) -> anyhow::Result<Bytes> {
	match encoding.map(str::to_ascii_lowercase).as_deref() {
		None | Some("identity") | Some("") => Ok(data.clone()),
		Some("gzip") | Some("x-gzip") => {
			let mut out = Vec::new();
			flate2::read::GzDecoder::new(data.as_ref()).read_to_end(&mut out)?;
			Ok(Bytes::from(out))
		},
		Some("deflate") => {
			let mut out = Vec::new();
			flate2::read::ZlibDecoder::new(data.as_ref()).read_to_end(&mut out)?;
			Ok(Bytes::from(out))
		},
		Some("br") => {
			let mut out = Vec::new();
			brotli::Decompressor::new(data.as_ref(), 4096).read_to_end(&mut out)?;
			Ok(Bytes::from(out))
		},
		Some(other) => anyhow::bail!("unsupported content-encoding {other:?}"),
	}
}

/// Encodes `data` per `encoding`, used when a passthrough handler rewrites a
/// body but the upstream response's `Content-Encoding` header is preserved
/// (spec.md §4.4 "automatic body encoding").
pub async fn encode(data: Bytes, encoding: &str) -> anyhow::Result<Bytes> {
	use async_compression::tokio::bufread::{BrotliEncoder, DeflateEncoder, GzipEncoder};

	match encoding.to_ascii_lowercase().as_str() {
		"identity" | "" => Ok(data),
		"gzip" | "x-gzip" => read_all(GzipEncoder::new(data.as_ref())).await,
		"deflate" => read_all(DeflateEncoder::new(data.as_ref())).await,
		"br" => read_all(BrotliEncoder::new(data.as_ref())).await,
		other => anyhow::bail!("unsupported content-encoding {other:?}"),
	}
}

async fn read_all(mut r: impl AsyncRead + Unpin) -> anyhow::Result<Bytes> {
	let mut out = Vec::new();
	r.read_to_end(&mut out).await?;
	Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_and_absent_encoding_are_noops() {
		let data = Bytes::from_static(b"hello");
		assert_eq!(decode(&data, None).unwrap(), data);
		assert_eq!(decode(&data, Some("identity")).unwrap(), data);
	}

	#[test]
	fn unknown_encoding_errors() {
		let data = Bytes::from_static(b"hello");
		assert!(decode(&data, Some("zstd")).is_err());
	}

	#[tokio::test]
	async fn gzip_round_trips() {
		let original = Bytes::from_static(b"round trip me");
		let encoded = encode(original.clone(), "gzip").await.unwrap();
		let decoded = decode(&encoded, Some("gzip")).unwrap();
		assert_eq!(decoded, original);
	}
}
