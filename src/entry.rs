//! C1: size-prefixed framing of opaque entry payloads.
//!
//! An entry is framed as `uvarint(len) || payload[0..len]`. There are no
//! checksums and no separators; integrity relies on filesystem durability
//! and the truncation engine's atomicity, per the crate's non-goals.

use crate::error::{Error, Result};
use crate::varint;

/// Appends the framed encoding of `payload` to `out` and returns the
/// `[start, end)` byte range it occupies within `out`.
pub fn encode(payload: &[u8], out: &mut Vec<u8>) -> (usize, usize) {
    let start = out.len();
    varint::encode(payload.len() as u64, out);
    out.extend_from_slice(payload);
    (start, out.len())
}

/// Decodes one framed entry starting at `buf[pos..]`.
///
/// Returns `(payload_range, frame_len)` where `payload_range` is the
/// `[start, end)` range of the payload bytes (excluding the length prefix)
/// within `buf`, and `frame_len` is the total number of bytes the frame
/// occupies (prefix + payload).
pub fn decode_at(buf: &[u8], pos: usize) -> Result<(std::ops::Range<usize>, usize)> {
    let rest = buf.get(pos..).ok_or_else(|| Error::corrupt("decode position past end of buffer"))?;
    let (len, prefix_len) = varint::decode(rest).ok_or_else(|| Error::corrupt("unterminated length varint"))?;
    let len = len as usize;
    let payload_start = pos + prefix_len;
    let payload_end = payload_start + len;
    if payload_end > buf.len() {
        return Err(Error::corrupt(format!(
            "truncated entry: declared length {len} exceeds remaining buffer ({} bytes available)",
            buf.len() - payload_start.min(buf.len())
        )));
    }
    Ok((payload_start..payload_end, prefix_len + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = Vec::new();
        let (s0, e0) = encode(b"a", &mut buf);
        let (s1, e1) = encode(b"", &mut buf);
        let (s2, e2) = encode(b"hello world", &mut buf);

        let (r0, len0) = decode_at(&buf, 0).unwrap();
        assert_eq!(&buf[r0.clone()], b"a");
        assert_eq!(r0, s0..e0);

        let (r1, len1) = decode_at(&buf, len0).unwrap();
        assert_eq!(&buf[r1.clone()], b"");
        assert_eq!(r1, s1..e1);

        let (r2, _len2) = decode_at(&buf, len0 + len1).unwrap();
        assert_eq!(&buf[r2.clone()], b"hello world");
        assert_eq!(r2, s2..e2);
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let mut buf = Vec::new();
        varint::encode(10, &mut buf);
        buf.extend_from_slice(b"short");
        assert!(matches!(decode_at(&buf, 0), Err(Error::Corrupt(_))));
    }

    #[test]
    fn unterminated_varint_is_corrupt() {
        let buf = vec![0x80, 0x80, 0x80];
        assert!(matches!(decode_at(&buf, 0), Err(Error::Corrupt(_))));
    }

    #[test]
    fn position_past_end_is_corrupt() {
        let buf = vec![1, 2, 3];
        assert!(matches!(decode_at(&buf, 10), Err(Error::Corrupt(_))));
    }
}
