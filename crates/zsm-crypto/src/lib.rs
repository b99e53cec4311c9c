//! Cryptographic layer for ZSM.
//!
//! This crate provides:
//! - Ed25519 identity keys and hex user IDs
//! - Static key agreement deriving a per-pair key from two identities
//! - The signed, encrypted message envelope
//! - The challenge/response handshake, client and gatekeeper sides
//! - A per-channel [`Session`] tying them together
//!
//! # Design
//!
//! Messages are encrypted with XChaCha20-Poly1305 under a key derived from
//! the sender's and recipient's long-term identities (Ed25519 converted to
//! X25519, then `crypto_kx`). There is no negotiation round-trip and no
//! forward secrecy: the key for a given sender/recipient pair never changes.
//!
//! Every message packet is signed with Ed25519 over the BLAKE2b-256 digest of
//! its payload, and the signature is checked against the claimed sender
//! before decryption.

#![forbid(unsafe_code)]

pub mod envelope;
pub mod handshake;
pub mod identity;
pub mod kx;
pub mod session;

pub use envelope::{open, seal, CipherError, DecryptError, DecryptedMessage, MessageEnvelope};
pub use handshake::{AuthHandshake, ChallengeVerifier, HandshakeError, SessionState};
pub use identity::{IdentityKeypair, PublicIdentity, UserId};
pub use kx::{derive_receive_key, derive_send_key, KeyConversionError, SymmetricKey};
pub use session::{Session, SessionError, SessionEvent};
