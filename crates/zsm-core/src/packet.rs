//! Packet wire format.
//!
//! Every ZSM packet has the same layout. All integers are little-endian.
//!
//! ```text
//! offset 0         : type            (1 byte)
//! offset 1..5      : payload length  (4 bytes, unsigned, counts payload only)
//! offset 5..5+L    : payload         (L bytes)
//! offset 5+L..+64  : signature       (64 bytes, detached)
//! ```
//!
//! The codec never interprets the payload. Message sub-fields are parsed by
//! `zsm-crypto` at fixed offsets.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{HEADER_SIZE, MAX_DATA_LENGTH, SIGNATURE_SIZE};

/// Packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Authentication challenge (gatekeeper) or response (client).
    Auth = 0x01,
    /// Encrypted message envelope.
    Message = 0x02,
    /// Edit of a previously sent message.
    UpdateMessage = 0x03,
    /// Deletion of a previously sent message.
    DeleteMessage = 0x04,
    /// Error report.
    Error = 0x05,
    /// Informational notice.
    Info = 0x06,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        match value {
            0x01 => Ok(Self::Auth),
            0x02 => Ok(Self::Message),
            0x03 => Ok(Self::UpdateMessage),
            0x04 => Ok(Self::DeleteMessage),
            0x05 => Ok(Self::Error),
            0x06 => Ok(Self::Info),
            _ => Err(PacketError::UnknownPacketType(value)),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(value: PacketType) -> Self {
        value as u8
    }
}

/// Packet codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("truncated packet: {available} bytes available, {needed} needed")]
    Truncated { needed: usize, available: usize },

    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("payload too long: {0} bytes, maximum {max}", max = MAX_DATA_LENGTH)]
    PacketTooLong(usize),

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub payload: Bytes,
    pub signature: [u8; SIGNATURE_SIZE],
}

impl Packet {
    /// Create a packet, rejecting payloads larger than [`MAX_DATA_LENGTH`].
    ///
    /// An empty payload encodes fine but cannot be sent over a stream: a
    /// zero length header is read as a bare status frame and the signature
    /// that follows is taken for the next header. Stream senders keep
    /// payloads non-empty.
    pub fn new(
        packet_type: PacketType,
        payload: impl Into<Bytes>,
        signature: [u8; SIGNATURE_SIZE],
    ) -> Result<Self, PacketError> {
        let payload = payload.into();
        if payload.len() > MAX_DATA_LENGTH {
            return Err(PacketError::PacketTooLong(payload.len()));
        }
        Ok(Self {
            packet_type,
            payload,
            signature,
        })
    }

    /// Create a packet with an all-zero signature slot.
    ///
    /// Used for packets whose authenticity is carried elsewhere (challenges
    /// and challenge responses).
    pub fn unsigned(packet_type: PacketType, payload: impl Into<Bytes>) -> Result<Self, PacketError> {
        Self::new(packet_type, payload, [0u8; SIGNATURE_SIZE])
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + SIGNATURE_SIZE
    }

    /// Encode to bytes.
    ///
    /// See [`Packet::new`] for why an empty payload does not survive
    /// [`FrameBuffer`](crate::FrameBuffer) framing.
    pub fn encode(&self) -> Bytes {
        encode(self.packet_type, &self.payload, &self.signature)
    }

    /// Decode a packet from the front of `buf`.
    ///
    /// Bytes after the packet are ignored; use [`Packet::decode_exact`] when
    /// `buf` must contain exactly one packet.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let (packet, _) = Self::decode_prefix(buf)?;
        Ok(packet)
    }

    /// Decode a packet that must span all of `buf`.
    pub fn decode_exact(buf: &[u8]) -> Result<Self, PacketError> {
        let (packet, consumed) = Self::decode_prefix(buf)?;
        if consumed != buf.len() {
            return Err(PacketError::TrailingBytes(buf.len() - consumed));
        }
        Ok(packet)
    }

    fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        if buf.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let packet_type = PacketType::try_from(buf[0])?;
        let length = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if length > MAX_DATA_LENGTH {
            return Err(PacketError::PacketTooLong(length));
        }

        let payload_end = HEADER_SIZE + length;
        let total = payload_end + SIGNATURE_SIZE;
        if buf.len() < total {
            return Err(PacketError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&buf[HEADER_SIZE..payload_end]);
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&buf[payload_end..total]);

        Ok((
            Self {
                packet_type,
                payload,
                signature,
            },
            total,
        ))
    }
}

/// Encode a packet from its parts.
///
/// Writes the type, the little-endian payload length, the payload and the
/// signature with no padding. Callers keep `payload` within
/// [`MAX_DATA_LENGTH`]; [`Packet::new`] enforces this.
pub fn encode(packet_type: PacketType, payload: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + SIGNATURE_SIZE);
    buf.put_u8(packet_type.into());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.put_slice(signature);
    buf.freeze()
}
