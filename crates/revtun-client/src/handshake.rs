//! HTTP/1.x request head serialization for upgrade hand-off.
//!
//! An upgraded connection is handed to the tunnel as raw bytes, so the
//! request head the public listener already consumed has to be written back
//! out in wire format before the two streams are joined.

use http::request::Parts;
use http::Version;

fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

/// Serialize a request head: request line, one line per header, blank line.
pub fn encode_request_head(head: &Parts) -> Vec<u8> {
    let target = head
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|target| !target.is_empty())
        .unwrap_or("/");

    let mut out = Vec::with_capacity(64 + head.headers.len() * 32);
    out.extend_from_slice(head.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.push(b' ');
    out.extend_from_slice(version_str(head.version).as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in head.headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out
}
