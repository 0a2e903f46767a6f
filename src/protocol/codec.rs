use bytes::{BufMut, Bytes, BytesMut};

use crate::core::{Error, Result};

/// Sentinel carried in the first two bytes of every frame
pub const MESSAGE_MAGIC: u16 = 0x42A7;

/// Frame header: magic (2) + message type (1) + payload length (1)
pub const HEADER_SIZE: usize = 4;

/// Largest payload one radio frame can carry
pub const MAX_PAYLOAD_LEN: usize = 248;

/// Message type reserved for the discovery handshake
pub const DISCOVERY_MSG_TYPE: u8 = 0;

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message type; 0 is discovery
    pub msg_type: u8,
    /// Payload length in bytes
    pub length: u8,
}

impl FrameHeader {
    /// Returns true for discovery frames
    pub fn is_discovery(&self) -> bool {
        self.msg_type == DISCOVERY_MSG_TYPE
    }
}

/// Encode a frame into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────┬──────────┬──────────────────┐
/// │ Magic (2B LE)│ Type (1B)│ Len (1B) │ Payload          │
/// │ 0x42A7       │          │ 0..=248  │ (Len bytes)      │
/// └──────────────┴──────────┴──────────┴──────────────────┘
/// ```
pub fn encode_frame(msg_type: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16_le(MESSAGE_MAGIC);
    dst.put_u8(msg_type);
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a frame into a fresh buffer
pub fn encode(msg_type: u8, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(msg_type, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one received datagram.
///
/// The whole buffer must be exactly one frame. The returned payload is a
/// sub-slice of `bytes` of exactly `header.length` bytes.
pub fn decode(bytes: &[u8]) -> Result<(FrameHeader, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::FrameTooShort {
            len: bytes.len(),
            header: HEADER_SIZE,
        });
    }

    let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
    if magic != MESSAGE_MAGIC {
        return Err(Error::BadMagic { found: magic });
    }

    let header = FrameHeader {
        msg_type: bytes[2],
        length: bytes[3],
    };

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != header.length as usize {
        return Err(Error::LengthMismatch {
            declared: header.length as usize,
            actual: payload.len(),
        });
    }

    Ok((header, payload))
}
