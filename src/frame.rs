//! Hand-rolled WebSocket framing for the raw transport.
//!
//! The raw transport backend terminates browser WebSocket connections on a
//! plain [`tokio::net::TcpStream`], so the upgrade handshake transform and
//! the frame layer live here rather than in a socket library. Only
//! single-frame text messages are supported — fragmentation is rejected
//! explicitly, and every malformed input comes back as a [`FrameError`]
//! instead of a panic or an out-of-bounds read.
//!
//! Layout of one frame (RFC 6455 §5.2):
//!
//! ```text
//! [FIN|RSV|opcode] [MASK|len7] [len16 | len64]? [mask key]? [payload]
//! ```
//!
//! The 7-bit length field has two extension tiers: `126` switches to a
//! 16-bit big-endian length, `127` to a 64-bit one. Client→server frames
//! are always masked; server→client frames never are.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed public GUID appended to the client key in the upgrade handshake
/// (RFC 6455 §4.2.2).
const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Practical ceiling on a single frame payload. The 64-bit length tier can
/// declare sizes no real signaling message approaches; anything above this
/// is treated as a protocol violation rather than buffered.
pub const MAX_FRAME_PAYLOAD: u64 = 16 * 1024 * 1024;

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_CLOSE: u8 = 0x8;

// ── Errors ──────────────────────────────────────────────────────────

/// Decode failures for the frame layer.
///
/// `Truncated` doubles as the streaming reader's "need more bytes" signal;
/// every other variant describes a complete-but-rejected frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The declared frame length exceeds the bytes actually available.
    #[error("truncated frame: declared length exceeds available bytes")]
    Truncated,

    /// FIN was clear or the opcode was a continuation — multi-frame
    /// messages are out of scope and rejected explicitly.
    #[error("fragmented frames are not supported")]
    Fragmented,

    /// A data or control opcode other than text and close.
    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),

    /// The peer sent a close frame (opcode `0x8`).
    #[error("received connection close frame")]
    ConnectionClose,

    /// The 64-bit length tier declared a payload above [`MAX_FRAME_PAYLOAD`].
    #[error("declared payload length {0} exceeds frame ceiling")]
    PayloadTooLarge(u64),

    /// The unmasked payload is not valid UTF-8.
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,
}

// ── Handshake ───────────────────────────────────────────────────────

/// Compute the `Sec-WebSocket-Accept` value for a client-supplied
/// `Sec-WebSocket-Key`: SHA-1 over the key concatenated with the fixed
/// handshake GUID, base64-encoded. Pure function, no state.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

// ── Decoding ────────────────────────────────────────────────────────

/// A successfully decoded text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// The unmasked text payload.
    pub text: String,
    /// Total bytes the frame occupied, so a streaming reader can advance
    /// its buffer past it.
    pub len: usize,
}

/// Parsed fixed header, opcode-agnostic. Shared by [`decode_frame`] and
/// [`declared_frame_len`].
struct FrameHeader {
    fin: bool,
    opcode: u8,
    payload_len: u64,
    header_len: usize,
    mask_key: Option<[u8; 4]>,
}

fn parse_header(bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    let b0 = *bytes.first().ok_or(FrameError::Truncated)?;
    let b1 = *bytes.get(1).ok_or(FrameError::Truncated)?;

    let fin = b0 & 0x80 != 0;
    let opcode = b0 & 0x0F;
    let masked = b1 & 0x80 != 0;

    let (payload_len, mut header_len) = match u64::from(b1 & 0x7F) {
        126 => {
            let hi = *bytes.get(2).ok_or(FrameError::Truncated)?;
            let lo = *bytes.get(3).ok_or(FrameError::Truncated)?;
            (u64::from(u16::from_be_bytes([hi, lo])), 4)
        }
        127 => {
            let mut raw = [0u8; 8];
            for (i, slot) in raw.iter_mut().enumerate() {
                *slot = *bytes.get(2 + i).ok_or(FrameError::Truncated)?;
            }
            (u64::from_be_bytes(raw), 10)
        }
        short => (short, 2),
    };

    let mask_key = if masked {
        let mut key = [0u8; 4];
        for (i, slot) in key.iter_mut().enumerate() {
            *slot = *bytes.get(header_len + i).ok_or(FrameError::Truncated)?;
        }
        header_len += 4;
        Some(key)
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        opcode,
        payload_len,
        header_len,
        mask_key,
    })
}

/// Decode one text frame from the start of `bytes`.
///
/// Unmasks the payload when the MASK bit is set (always true for
/// client→server traffic). Rejects non-text opcodes, fragmentation, and
/// truncated input by returning an error — never by panicking or reading
/// past the buffer.
///
/// # Errors
///
/// See [`FrameError`]. Streaming callers should treat
/// [`FrameError::Truncated`] as "wait for more bytes".
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame, FrameError> {
    let header = parse_header(bytes)?;

    if header.payload_len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(header.payload_len));
    }
    match header.opcode {
        OPCODE_TEXT => {}
        OPCODE_CLOSE => return Err(FrameError::ConnectionClose),
        OPCODE_CONTINUATION => return Err(FrameError::Fragmented),
        other => return Err(FrameError::UnsupportedOpcode(other)),
    }
    if !header.fin {
        return Err(FrameError::Fragmented);
    }

    // Ceiling check above keeps this cast in range on every target.
    let payload_len = header.payload_len as usize;
    let total = header.header_len + payload_len;
    let payload = bytes
        .get(header.header_len..total)
        .ok_or(FrameError::Truncated)?;

    let mut data = payload.to_vec();
    if let Some(key) = header.mask_key {
        for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
            *byte ^= k;
        }
    }

    let text = String::from_utf8(data).map_err(|_| FrameError::InvalidUtf8)?;
    Ok(DecodedFrame { text, len: total })
}

/// Total on-wire length a frame at the start of `bytes` declares.
///
/// Lets the streaming reader skip a frame that [`decode_frame`] rejected
/// (unsupported opcode, bad UTF-8) and stay in sync instead of tearing the
/// connection down.
///
/// # Errors
///
/// [`FrameError::Truncated`] if the header itself is incomplete, or
/// [`FrameError::PayloadTooLarge`] if the declared size is unskippable.
pub fn declared_frame_len(bytes: &[u8]) -> Result<usize, FrameError> {
    let header = parse_header(bytes)?;
    if header.payload_len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(header.payload_len));
    }
    Ok(header.header_len + header.payload_len as usize)
}

// ── Encoding ────────────────────────────────────────────────────────

/// Encode `payload` as a single unmasked text frame, picking the minimal
/// length-field tier for its size.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let data = payload.as_bytes();
    let len = data.len();

    let mut frame = Vec::with_capacity(len + 10);
    frame.push(0x80 | OPCODE_TEXT);
    if len < 126 {
        frame.push(len as u8);
    } else if len <= usize::from(u16::MAX) {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(data);
    frame
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    /// Build a client-side (masked) text frame by hand.
    fn masked_text_frame(payload: &str, key: [u8; 4]) -> Vec<u8> {
        let data = payload.as_bytes();
        let len = data.len();

        let mut frame = vec![0x80 | OPCODE_TEXT];
        if len < 126 {
            frame.push(0x80 | len as u8);
        } else if len <= usize::from(u16::MAX) {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }
        frame.extend_from_slice(&key);
        frame.extend(data.iter().zip(key.iter().cycle()).map(|(b, k)| b ^ k));
        frame
    }

    #[test]
    fn accept_key_matches_rfc_vector() {
        // The worked example from RFC 6455 §1.3.
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_key_is_deterministic() {
        let a = compute_accept_key("AQIDBAUGBwgJCgsMDQ4PEC==");
        let b = compute_accept_key("AQIDBAUGBwgJCgsMDQ4PEC==");
        assert_eq!(a, b);
    }

    #[test]
    fn round_trip_short_tier() {
        let frame = encode_frame("hello");
        assert_eq!(frame[1], 5, "short tier encodes length in the 7-bit field");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.text, "hello");
        assert_eq!(decoded.len, frame.len());
    }

    #[test]
    fn round_trip_empty_payload() {
        let frame = encode_frame("");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.text, "");
    }

    #[test]
    fn round_trip_16_bit_tier() {
        let payload = "x".repeat(300);
        let frame = encode_frame(&payload);
        assert_eq!(frame[1], 126);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.text, payload);
    }

    #[test]
    fn round_trip_64_bit_tier() {
        let payload = "y".repeat(70_000);
        let frame = encode_frame(&payload);
        assert_eq!(frame[1], 127);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.text, payload);
    }

    #[test]
    fn encode_picks_minimal_tier_at_boundaries() {
        assert_eq!(encode_frame(&"a".repeat(125))[1], 125);
        assert_eq!(encode_frame(&"a".repeat(126))[1], 126);
        assert_eq!(encode_frame(&"a".repeat(65_535))[1], 126);
        assert_eq!(encode_frame(&"a".repeat(65_536))[1], 127);
    }

    #[test]
    fn decode_unmasks_client_frame() {
        let frame = masked_text_frame(r#"{"type":"leave-room","data":{}}"#, [0xA1, 0xB2, 0xC3, 0xD4]);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.text, r#"{"type":"leave-room","data":{}}"#);
        assert_eq!(decoded.len, frame.len());
    }

    #[test]
    fn decode_unmasks_16_bit_tier_client_frame() {
        let payload = "z".repeat(1_000);
        let frame = masked_text_frame(&payload, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_frame(&frame).unwrap().text, payload);
    }

    #[test]
    fn truncated_payload_is_an_error_not_a_read_past_the_end() {
        let mut frame = masked_text_frame("hello world", [9, 9, 9, 9]);
        frame.truncate(frame.len() - 4);
        assert_eq!(decode_frame(&frame), Err(FrameError::Truncated));
    }

    #[test]
    fn truncated_header_is_an_error() {
        assert_eq!(decode_frame(&[]), Err(FrameError::Truncated));
        assert_eq!(decode_frame(&[0x81]), Err(FrameError::Truncated));
        // 16-bit tier announced but only one extended-length byte present.
        assert_eq!(decode_frame(&[0x81, 126, 0x01]), Err(FrameError::Truncated));
        // 64-bit tier announced with a partial extended length.
        assert_eq!(
            decode_frame(&[0x81, 127, 0, 0, 0]),
            Err(FrameError::Truncated)
        );
        // Mask bit set but the key is cut short.
        assert_eq!(
            decode_frame(&[0x81, 0x85, 0xAA, 0xBB]),
            Err(FrameError::Truncated)
        );
    }

    #[test]
    fn close_opcode_is_reported() {
        assert_eq!(decode_frame(&[0x88, 0x00]), Err(FrameError::ConnectionClose));
    }

    #[test]
    fn binary_opcode_is_rejected() {
        assert_eq!(
            decode_frame(&[0x82, 0x01, 0xFF]),
            Err(FrameError::UnsupportedOpcode(0x2))
        );
    }

    #[test]
    fn ping_opcode_is_rejected() {
        assert_eq!(
            decode_frame(&[0x89, 0x00]),
            Err(FrameError::UnsupportedOpcode(0x9))
        );
    }

    #[test]
    fn fragmented_frames_are_rejected() {
        // FIN clear on a text frame.
        assert_eq!(
            decode_frame(&[0x01, 0x02, b'h', b'i']),
            Err(FrameError::Fragmented)
        );
        // Continuation opcode.
        assert_eq!(
            decode_frame(&[0x80, 0x02, b'h', b'i']),
            Err(FrameError::Fragmented)
        );
    }

    #[test]
    fn invalid_utf8_payload_is_rejected() {
        assert_eq!(
            decode_frame(&[0x81, 0x02, 0xC3, 0x28]),
            Err(FrameError::InvalidUtf8)
        );
    }

    #[test]
    fn absurd_declared_length_is_rejected_without_allocating() {
        // 64-bit tier declaring ~2^62 bytes. Must fail fast.
        let mut frame = vec![0x81, 127];
        frame.extend_from_slice(&(1u64 << 62).to_be_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn declared_frame_len_allows_skipping_rejected_frames() {
        // A complete binary frame: reader should be able to skip it.
        let frame = [0x82, 0x03, 1, 2, 3];
        assert_eq!(
            decode_frame(&frame),
            Err(FrameError::UnsupportedOpcode(0x2))
        );
        assert_eq!(declared_frame_len(&frame), Ok(frame.len()));
    }

    #[test]
    fn declared_frame_len_counts_mask_key() {
        let frame = masked_text_frame("abc", [1, 2, 3, 4]);
        assert_eq!(declared_frame_len(&frame), Ok(2 + 4 + 3));
    }

    #[test]
    fn round_trip_preserves_unicode() {
        let payload = "héllo wörld 🎤";
        let decoded = decode_frame(&encode_frame(payload)).unwrap();
        assert_eq!(decoded.text, payload);
    }
}
