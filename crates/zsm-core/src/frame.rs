//! Stream framing.
//!
//! ZSM runs over an ordered byte stream, so packets have to be cut out of
//! whatever the socket returns. A frame is the 5-byte header followed, when
//! the declared length is non-zero, by the payload and the 64-byte
//! signature. A zero-length frame is a bare header; the gatekeeper uses these
//! for status codes.

use bytes::{Bytes, BytesMut};

use crate::packet::{Packet, PacketError};
use crate::status::StatusCode;
use crate::{HEADER_SIZE, MAX_DATA_LENGTH, SIGNATURE_SIZE};

/// Initial capacity of the receive buffer.
const INITIAL_CAPACITY: usize = 4096;

/// One complete frame read off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Wrap bytes that are already known to form one frame.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// First byte of the frame: a packet type or a status code.
    pub fn type_byte(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(0)
    }

    /// Payload length declared in the header.
    pub fn declared_length(&self) -> usize {
        if self.bytes.len() < HEADER_SIZE {
            return 0;
        }
        u32::from_le_bytes([self.bytes[1], self.bytes[2], self.bytes[3], self.bytes[4]]) as usize
    }

    /// Whether this is a header with no payload or signature.
    pub fn is_bare(&self) -> bool {
        self.declared_length() == 0
    }

    /// Status code carried by a bare frame, if the type byte is one.
    pub fn status(&self) -> Option<StatusCode> {
        if !self.is_bare() {
            return None;
        }
        StatusCode::try_from(self.type_byte()).ok()
    }

    /// Decode the frame as a full packet.
    pub fn packet(&self) -> Result<Packet, PacketError> {
        Packet::decode_exact(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Accumulates stream bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append received bytes.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mutable access for `read_buf`-style reads straight into the buffer.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame.
    ///
    /// Returns `Ok(None)` until enough bytes have arrived. A declared length
    /// above [`MAX_DATA_LENGTH`] is an error: the stream cannot be
    /// resynchronised after it.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PacketError> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length =
            u32::from_le_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if length > MAX_DATA_LENGTH {
            return Err(PacketError::PacketTooLong(length));
        }

        let frame_len = if length == 0 {
            HEADER_SIZE
        } else {
            HEADER_SIZE + length + SIGNATURE_SIZE
        };
        if self.buf.len() < frame_len {
            self.buf.reserve(frame_len - self.buf.len());
            return Ok(None);
        }

        let bytes = self.buf.split_to(frame_len).freeze();
        Ok(Some(Frame { bytes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    fn message_bytes(payload: &[u8]) -> Bytes {
        Packet::new(PacketType::Message, payload.to_vec(), [9u8; SIGNATURE_SIZE])
            .unwrap()
            .encode()
    }

    #[test]
    fn test_waits_for_complete_frame() {
        let encoded = message_bytes(b"hello");
        let mut frames = FrameBuffer::new();

        frames.extend_from_slice(&encoded[..3]);
        assert_eq!(frames.next_frame().unwrap(), None);

        frames.extend_from_slice(&encoded[3..encoded.len() - 1]);
        assert_eq!(frames.next_frame().unwrap(), None);

        frames.extend_from_slice(&encoded[encoded.len() - 1..]);
        let frame = frames.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_bytes(), &encoded[..]);
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn test_status_frame_is_bare_header() {
        let mut frames = FrameBuffer::new();
        frames.extend_from_slice(&StatusCode::Authorised.to_frame());
        frames.extend_from_slice(&message_bytes(b"next"));

        let status = frames.next_frame().unwrap().unwrap();
        assert_eq!(status.len(), HEADER_SIZE);
        assert_eq!(status.status(), Some(StatusCode::Authorised));

        let packet = frames.next_frame().unwrap().unwrap().packet().unwrap();
        assert_eq!(&packet.payload[..], b"next");
        assert_eq!(frames.next_frame().unwrap(), None);
    }

    #[test]
    fn test_back_to_back_packets() {
        let mut frames = FrameBuffer::new();
        frames.extend_from_slice(&message_bytes(b"one"));
        frames.extend_from_slice(&message_bytes(b"two"));

        let first = frames.next_frame().unwrap().unwrap().packet().unwrap();
        let second = frames.next_frame().unwrap().unwrap().packet().unwrap();
        assert_eq!(&first.payload[..], b"one");
        assert_eq!(&second.payload[..], b"two");
    }

    #[test]
    fn test_oversized_declared_length() {
        let mut frames = FrameBuffer::new();
        frames.extend_from_slice(&[0x02]);
        frames.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            frames.next_frame(),
            Err(PacketError::PacketTooLong(u32::MAX as usize))
        );
    }

    #[test]
    fn test_empty_payload_packet_splits_on_stream() {
        let encoded = Packet::new(PacketType::Info, Bytes::new(), [0x06; SIGNATURE_SIZE])
            .unwrap()
            .encode();
        assert_eq!(encoded.len(), HEADER_SIZE + SIGNATURE_SIZE);

        let mut frames = FrameBuffer::new();
        frames.extend_from_slice(&encoded);

        let head = frames.next_frame().unwrap().unwrap();
        assert!(head.is_bare());
        assert_eq!(head.len(), HEADER_SIZE);
        // The signature bytes are left behind and read as a new header.
        assert_eq!(frames.pending(), SIGNATURE_SIZE);
    }

    #[test]
    fn test_packet_frame_is_not_a_status() {
        let frame = Frame::from_bytes(message_bytes(b"x"));
        assert!(!frame.is_bare());
        assert_eq!(frame.status(), None);
        assert_eq!(frame.type_byte(), 0x02);
    }
}
