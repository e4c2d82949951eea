//! RFC 6455 frame codec: header parsing, payload extraction/masking, and
//! encoding. This module is the "hard part" the spec calls out in §4.A — a
//! bit-exact, allocation-conscious implementation of the wire format.

use crate::error::FrameError;

/// A WebSocket opcode. Values 3–7 and 11–15 are reserved and never
/// constructed by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_nibble(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

/// Which side of the connection a frame originates from; determines masking
/// direction (client→server MUST be masked, server→client MUST NOT be).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A decoded frame header, with enough bookkeeping to locate and extract the
/// payload from the buffer it was parsed out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub mask_key: Option<[u8; 4]>,
    pub payload_offset: usize,
    pub payload_length: usize,
}

impl FrameHeader {
    /// Total on-wire size of the frame this header describes.
    pub fn total_len(&self) -> usize {
        self.payload_offset + self.payload_length
    }
}

/// Outcome of attempting to parse a header out of a byte buffer.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Not enough bytes yet to determine the header shape.
    Incomplete,
    /// A complete header; `payload_offset`/`payload_length` describe where
    /// the payload lives relative to the start of the buffer passed in.
    Header(FrameHeader),
    /// The bytes present are not a valid header under `role`.
    Error(FrameError),
}

/// Attempt to parse a frame header from the start of `buf`.
///
/// Does not require the full payload to be present — only enough bytes to
/// determine `payload_offset` and `payload_length`. Masking-direction and
/// control-frame invariants are validated here since they're visible from
/// the header alone.
pub fn decode_header(buf: &[u8], role: Role) -> DecodeOutcome {
    if buf.len() < 2 {
        return DecodeOutcome::Incomplete;
    }

    let byte0 = buf[0];
    let byte1 = buf[1];

    let fin = byte0 & 0x80 != 0;
    let rsv1 = byte0 & 0x40 != 0;
    let rsv2 = byte0 & 0x20 != 0;
    let rsv3 = byte0 & 0x10 != 0;
    let opcode = match Opcode::from_nibble(byte0 & 0x0F) {
        Ok(op) => op,
        Err(e) => return DecodeOutcome::Error(e),
    };

    let masked = byte1 & 0x80 != 0;
    let len7 = byte1 & 0x7F;

    let (mut payload_offset, payload_length) = match len7 {
        0..=125 => (2, len7 as usize),
        126 => {
            if buf.len() < 4 {
                return DecodeOutcome::Incomplete;
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
            (4, len)
        }
        127 => {
            if buf.len() < 10 {
                return DecodeOutcome::Incomplete;
            }
            let raw = u64::from_be_bytes([
                buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
            ]);
            if raw & (1 << 63) != 0 {
                return DecodeOutcome::Error(FrameError::LengthHighBitSet);
            }
            (10, raw as usize)
        }
        _ => unreachable!("7-bit field"),
    };

    if opcode.is_control() {
        if payload_length > 125 {
            return DecodeOutcome::Error(FrameError::ControlFrameTooLarge);
        }
        if !fin {
            return DecodeOutcome::Error(FrameError::ControlFrameFragmented);
        }
    }

    match role {
        Role::Server if !masked => return DecodeOutcome::Error(FrameError::ExpectedMask),
        Role::Client if masked => return DecodeOutcome::Error(FrameError::UnexpectedMask),
        _ => {}
    }

    let mask_key = if masked {
        if buf.len() < payload_offset + 4 {
            return DecodeOutcome::Incomplete;
        }
        let key = [
            buf[payload_offset],
            buf[payload_offset + 1],
            buf[payload_offset + 2],
            buf[payload_offset + 3],
        ];
        payload_offset += 4;
        Some(key)
    } else {
        None
    };

    DecodeOutcome::Header(FrameHeader {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        masked,
        mask_key,
        payload_offset,
        payload_length,
    })
}

/// Extract and unmask the payload of a frame whose header is `header`, given
/// a buffer containing at least `header.total_len()` bytes starting at the
/// frame boundary.
pub fn decode_payload(buf: &[u8], header: &FrameHeader) -> Vec<u8> {
    let mut payload =
        buf[header.payload_offset..header.payload_offset + header.payload_length].to_vec();
    if let Some(key) = header.mask_key {
        apply_mask(&mut payload, key);
    }
    payload
}

/// XOR `data` in place with `key`, cycling through the 4-byte key. Masking
/// is its own inverse: applying it twice with the same key is a no-op.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Generate a cryptographically random 4-byte masking key. The source
/// implementation this spec is distilled from uses a weak, non-cryptographic
/// generator; §9's design notes call for a strong RNG here instead.
pub fn generate_mask_key() -> [u8; 4] {
    use rand::RngCore;
    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Encode a single frame. `mask` is `Some(key)` for client-originated
/// frames and `None` for server-originated ones; the caller decides the key
/// (typically via [`generate_mask_key`]) so that encoding stays
/// deterministic and testable.
pub fn encode_frame(opcode: Opcode, payload: &[u8], fin: bool, mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let header_len = match len {
        0..=125 => 2,
        126..=0xFFFF => 4,
        _ => 10,
    };
    let mask_len = if mask.is_some() { 4 } else { 0 };
    let mut frame = Vec::with_capacity(header_len + mask_len + len);

    frame.push((fin as u8) << 7 | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    match len {
        0..=125 => frame.push(mask_bit | len as u8),
        126..=0xFFFF => {
            frame.push(mask_bit | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            frame.push(mask_bit | 127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], key);
        }
        None => frame.extend_from_slice(payload),
    }

    frame
}

/// Valid close codes that MAY appear on the wire (received or sent).
pub fn is_sendable_close_code(code: u16) -> bool {
    matches!(
        code,
        1000..=1003 | 1007..=1011 | 3000..=4999
    )
}

/// Valid close codes for *receipt* validation — the local-use-only codes
/// 1005/1006/1015 are invalid if actually seen on the wire.
pub fn is_receivable_close_code(code: u16) -> bool {
    is_sendable_close_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_full(buf: &[u8], role: Role) -> (FrameHeader, Vec<u8>) {
        match decode_header(buf, role) {
            DecodeOutcome::Header(h) => {
                let payload = decode_payload(buf, &h);
                (h, payload)
            }
            other => panic!("expected a header, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_unmasked_text() {
        let payload = b"Hello, world!";
        let encoded = encode_frame(Opcode::Text, payload, true, None);
        let (header, decoded) = decode_full(&encoded, Role::Client);
        assert_eq!(header.opcode, Opcode::Text);
        assert!(header.fin);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn roundtrip_masked_binary() {
        let payload = vec![0u8, 1, 2, 3, 255, 254];
        let key = [0x11, 0x22, 0x33, 0x44];
        let encoded = encode_frame(Opcode::Binary, &payload, true, Some(key));
        let (header, decoded) = decode_full(&encoded, Role::Server);
        assert!(header.masked);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn length_encoding_is_minimal() {
        assert_eq!(encode_frame(Opcode::Binary, &[0u8; 10], true, None)[1], 10);
        let mid = encode_frame(Opcode::Binary, &[0u8; 200], true, None);
        assert_eq!(mid[1], 126);
        let big = encode_frame(Opcode::Binary, &[0u8; 70_000], true, None);
        assert_eq!(big[1], 127);
    }

    #[test]
    fn masking_is_involutive() {
        let mut data = vec![10u8, 20, 30, 40, 50];
        let original = data.clone();
        let key = [1, 2, 3, 4];
        apply_mask(&mut data, key);
        assert_ne!(data, original);
        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn incomplete_header_is_reported() {
        assert!(matches!(decode_header(&[0x81], Role::Client), DecodeOutcome::Incomplete));
        let partial_ext = [0x81, 126, 0x01];
        assert!(matches!(
            decode_header(&partial_ext, Role::Client),
            DecodeOutcome::Incomplete
        ));
    }

    #[test]
    fn reserved_opcode_is_rejected() {
        let buf = [0x83, 0x00];
        assert!(matches!(
            decode_header(&buf, Role::Client),
            DecodeOutcome::Error(FrameError::ReservedOpcode(3))
        ));
    }

    #[test]
    fn control_frame_too_large_is_rejected() {
        // Close opcode (0x88), masked, len7=126 => extended length path, but
        // the control-frame-size rule is checked against the real length.
        let mut buf = vec![0x88, 0xFE, 0x00, 0x7E];
        buf.extend_from_slice(&[0u8; 4]); // mask key
        assert!(matches!(
            decode_header(&buf, Role::Server),
            DecodeOutcome::Error(FrameError::ControlFrameTooLarge)
        ));
    }

    #[test]
    fn fragmented_control_frame_is_rejected() {
        let buf = [0x08, 0x80, 0, 0, 0, 0]; // fin=0, opcode=Close, masked, len=0
        assert!(matches!(
            decode_header(&buf, Role::Server),
            DecodeOutcome::Error(FrameError::ControlFrameFragmented)
        ));
    }

    #[test]
    fn server_rejects_unmasked_frame() {
        let buf = [0x81, 0x00];
        assert!(matches!(
            decode_header(&buf, Role::Server),
            DecodeOutcome::Error(FrameError::ExpectedMask)
        ));
    }

    #[test]
    fn client_rejects_masked_frame() {
        let mut buf = vec![0x81, 0x80];
        buf.extend_from_slice(&[0u8; 4]);
        assert!(matches!(
            decode_header(&buf, Role::Client),
            DecodeOutcome::Error(FrameError::UnexpectedMask)
        ));
    }

    #[test]
    fn no_rsv_bits_set_by_encoder() {
        let encoded = encode_frame(Opcode::Text, b"x", true, None);
        assert_eq!(encoded[0] & 0x70, 0);
    }
}
