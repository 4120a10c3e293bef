//! Frame codec (RFC 6455 section 5).
//!
//! [`FrameDecoder`] pulls whole frames off a read buffer, leaving partial
//! ones in place; [`MessageAssembler`] joins fragments into messages;
//! [`encode_frame`] writes unmasked server frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::websocket::Message;

/// Close status codes (RFC 6455 section 7.4.1).
pub struct CloseCode;

impl CloseCode {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const NO_STATUS: u16 = 1005;
    pub const INVALID_DATA: u16 = 1007;
    pub const TOO_BIG: u16 = 1009;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Result<Opcode, FrameError> {
        match byte {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    pub fn is_control(&self) -> bool {
        (*self as u8) & 0x8 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,
    #[error("unknown opcode 0x{0:X}")]
    UnknownOpcode(u8),
    #[error("client frame is not masked")]
    Unmasked,
    #[error("control frame fragmented or longer than 125 bytes")]
    InvalidControlFrame,
    #[error("payload exceeds {0} bytes")]
    TooLarge(u64),
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    #[error("new message started before the previous one finished")]
    ExpectedContinuation,
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,
}

impl FrameError {
    /// Status code to close the connection with.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::TooLarge(_) => CloseCode::TOO_BIG,
            FrameError::InvalidUtf8 => CloseCode::INVALID_DATA,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Bytes,
}

/// XOR masking; applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_payload: u64,
}

impl FrameDecoder {
    pub fn new(max_payload: u64) -> Self {
        Self { max_payload }
    }

    /// Removes one complete frame from the front of `buf`. Returns
    /// `Ok(None)` and leaves `buf` untouched while the frame is incomplete.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        if buf[0] & 0x70 != 0 {
            return Err(FrameError::ReservedBits);
        }
        let opcode = Opcode::from_u8(buf[0] & 0x0F)?;

        // Clients must mask every frame.
        if buf[1] & 0x80 == 0 {
            return Err(FrameError::Unmasked);
        }

        let (len, header_len) = match buf[1] & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(FrameError::TooLarge(self.max_payload));
                }
                (len, 10)
            }
            short => (short as u64, 2),
        };

        if opcode.is_control() && (!fin || len > 125) {
            return Err(FrameError::InvalidControlFrame);
        }
        if len > self.max_payload {
            return Err(FrameError::TooLarge(self.max_payload));
        }

        let total = header_len + 4 + len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(header_len);
        let mut mask = [0u8; 4];
        buf.copy_to_slice(&mut mask);
        let mut payload = buf.split_to(len as usize);
        apply_mask(&mut payload, mask);

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

/// Writes a single unfragmented, unmasked frame.
pub fn encode_frame(opcode: Opcode, payload: &[u8], buf: &mut BytesMut) {
    buf.put_u8(0x80 | opcode as u8);

    let len = payload.len();
    if len <= 125 {
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(127);
        buf.put_u64(len as u64);
    }
    buf.put_slice(payload);
}

/// Close frame payload: the code followed by a reason cut to fit the
/// 125-byte control frame limit.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(123);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    payload
}

/// Code carried by a received close frame.
pub fn parse_close_code(payload: &[u8]) -> u16 {
    match payload {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => CloseCode::NO_STATUS,
    }
}

/// Joins data frames into messages.
#[derive(Debug)]
pub struct MessageAssembler {
    kind: Option<Opcode>,
    buf: BytesMut,
    max_payload: u64,
}

impl MessageAssembler {
    pub fn new(max_payload: u64) -> Self {
        Self {
            kind: None,
            buf: BytesMut::new(),
            max_payload,
        }
    }

    /// Accepts a data frame; yields a message once its final fragment
    /// arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.kind.is_some() {
                    return Err(FrameError::ExpectedContinuation);
                }
                if frame.fin {
                    return finish(frame.opcode, frame.payload).map(Some);
                }
                self.kind = Some(frame.opcode);
                self.buf.put_slice(&frame.payload);
                Ok(None)
            }
            Opcode::Continuation => {
                let Some(kind) = self.kind else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                if (self.buf.len() + frame.payload.len()) as u64 > self.max_payload {
                    return Err(FrameError::TooLarge(self.max_payload));
                }
                self.buf.put_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                self.kind = None;
                finish(kind, self.buf.split().freeze()).map(Some)
            }
            // Control frames never reach the assembler.
            _ => Ok(None),
        }
    }
}

fn finish(kind: Opcode, payload: Bytes) -> Result<Message, FrameError> {
    match kind {
        Opcode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| FrameError::InvalidUtf8),
        _ => Ok(Message::Binary(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_round_trip() {
        let mut data = b"Hello".to_vec();
        let key = [0x37, 0xfa, 0x21, 0x3d];
        apply_mask(&mut data, key);
        assert_ne!(data, b"Hello");
        apply_mask(&mut data, key);
        assert_eq!(data, b"Hello");
    }

    #[test]
    fn sixteen_bit_length_header() {
        let mut buf = BytesMut::new();
        encode_frame(Opcode::Binary, &[0u8; 300], &mut buf);
        assert_eq!(&buf[..4], &[0x82, 126, 0x01, 0x2C]);
        assert_eq!(buf.len(), 304);
    }

    #[test]
    fn close_reason_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let payload = close_payload(CloseCode::NORMAL, &reason);
        assert!(payload.len() <= 125);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }
}
