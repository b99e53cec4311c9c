//! Core ZSM protocol types, framing, and constants.
//!
//! This crate provides:
//! - The closed set of packet types and status codes
//! - The packet codec (`type | length | payload | signature`)
//! - A stream frame buffer for reading packets off an ordered byte channel
//!
//! It performs no cryptography and no I/O; see `zsm-crypto` for the
//! message envelope and the authentication handshake.

#![forbid(unsafe_code)]

pub mod frame;
pub mod packet;
pub mod status;

pub use frame::{Frame, FrameBuffer};
pub use packet::{Packet, PacketError, PacketType};
pub use status::StatusCode;

/// Default TCP port of the gatekeeper.
pub const DEFAULT_PORT: u16 = 20247;

/// Size of the packet header: type (1) + payload length (4).
pub const HEADER_SIZE: usize = 5;

/// Size of an Ed25519 detached signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of an Ed25519 public key. Sender and recipient fields of a message
/// envelope are raw public keys of this size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 secret key (seed followed by public key).
pub const SECRET_KEY_SIZE: usize = 64;

/// XChaCha20-Poly1305 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Size of the trailing unix timestamp in a message envelope.
pub const TIMESTAMP_SIZE: usize = 8;

/// Size of the challenge issued by the gatekeeper.
pub const CHALLENGE_SIZE: usize = 32;

/// BLAKE2b digest size used for packet signatures.
pub const HASH_SIZE: usize = 32;

/// Maximum payload length accepted on the wire.
pub const MAX_DATA_LENGTH: usize = 8192;

/// Fixed bytes of a message envelope around the plaintext.
pub const ENVELOPE_OVERHEAD: usize =
    PUBLIC_KEY_SIZE * 2 + NONCE_SIZE + TAG_SIZE + TIMESTAMP_SIZE;

/// Largest plaintext that still fits in a single message packet.
pub const MAX_PLAINTEXT_LENGTH: usize = MAX_DATA_LENGTH - ENVELOPE_OVERHEAD;
