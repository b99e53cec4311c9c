//! Authenticated-encryption message envelope.
//!
//! A message packet payload is laid out at fixed offsets:
//!
//! ```text
//! offset 0..32    : sender public key     (Ed25519, raw)
//! offset 32..64   : recipient public key  (Ed25519, raw)
//! offset 64..88   : nonce                 (24 bytes, random per message)
//! offset 88..N-8  : ciphertext || tag     (XChaCha20-Poly1305, no AAD)
//! offset N-8..N   : timestamp             (i64 LE, unix seconds, not encrypted)
//! ```
//!
//! The packet signature is Ed25519 over BLAKE2b-256 of the whole payload, so
//! the timestamp is authenticated by the signature even though it sits
//! outside the ciphertext.

use bytes::{BufMut, Bytes, BytesMut};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::debug;
use zsm_core::{
    Packet, PacketError, PacketType, ENVELOPE_OVERHEAD, MAX_PLAINTEXT_LENGTH, NONCE_SIZE,
    PUBLIC_KEY_SIZE, TAG_SIZE, TIMESTAMP_SIZE,
};

use crate::identity::{IdentityKeypair, PublicIdentity, UserId};
use crate::kx::{derive_receive_key, derive_send_key, KeyConversionError, SymmetricKey};

const RECIPIENT_OFFSET: usize = PUBLIC_KEY_SIZE;
const NONCE_OFFSET: usize = PUBLIC_KEY_SIZE * 2;
const CIPHERTEXT_OFFSET: usize = NONCE_OFFSET + NONCE_SIZE;

/// Failures opening a ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("message payload truncated: {available} bytes, at least {needed} needed")]
    Truncated { needed: usize, available: usize },

    #[error("authentication tag mismatch")]
    TagMismatch,

    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
}

/// Message envelope errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("key agreement failed: {0}")]
    KeyConversion(#[from] KeyConversionError),

    #[error("decryption failed: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("signature does not match the claimed sender")]
    ForgedSignature,

    #[error("message addressed to {0}, not to this identity")]
    NotForUs(UserId),

    #[error("expected a message packet, got {0:?}")]
    UnexpectedPacketType(PacketType),

    #[error("message too large: {0} bytes, maximum {max}", max = MAX_PLAINTEXT_LENGTH)]
    MessageTooLarge(usize),

    #[error("encryption failed")]
    Encrypt,

    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Wire view of a message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub sender: [u8; PUBLIC_KEY_SIZE],
    pub recipient: [u8; PUBLIC_KEY_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte tag appended.
    pub ciphertext: Bytes,
    pub timestamp: i64,
}

impl MessageEnvelope {
    /// Split a message payload into its fields.
    pub fn parse(payload: &[u8]) -> Result<Self, DecryptError> {
        if payload.len() < ENVELOPE_OVERHEAD {
            return Err(DecryptError::Truncated {
                needed: ENVELOPE_OVERHEAD,
                available: payload.len(),
            });
        }

        let timestamp_offset = payload.len() - TIMESTAMP_SIZE;

        let mut sender = [0u8; PUBLIC_KEY_SIZE];
        sender.copy_from_slice(&payload[..RECIPIENT_OFFSET]);
        let mut recipient = [0u8; PUBLIC_KEY_SIZE];
        recipient.copy_from_slice(&payload[RECIPIENT_OFFSET..NONCE_OFFSET]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&payload[NONCE_OFFSET..CIPHERTEXT_OFFSET]);
        let mut timestamp = [0u8; TIMESTAMP_SIZE];
        timestamp.copy_from_slice(&payload[timestamp_offset..]);

        Ok(Self {
            sender,
            recipient,
            nonce,
            ciphertext: Bytes::copy_from_slice(&payload[CIPHERTEXT_OFFSET..timestamp_offset]),
            timestamp: i64::from_le_bytes(timestamp),
        })
    }

    /// Serialize back to a packet payload.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            PUBLIC_KEY_SIZE * 2 + NONCE_SIZE + self.ciphertext.len() + TIMESTAMP_SIZE,
        );
        buf.put_slice(&self.sender);
        buf.put_slice(&self.recipient);
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.ciphertext);
        buf.put_i64_le(self.timestamp);
        buf.freeze()
    }

    pub fn sender_id(&self) -> UserId {
        UserId::from_bytes(&self.sender)
    }

    pub fn recipient_id(&self) -> UserId {
        UserId::from_bytes(&self.recipient)
    }
}

/// A successfully opened message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub sender: UserId,
    pub recipient: UserId,
    pub text: String,
    /// Unix seconds as stated by the sender.
    pub timestamp: i64,
}

impl DecryptedMessage {
    /// Timestamp as a UTC date, if it is in chrono's range.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Encrypt and sign `plaintext` for `recipient`.
pub fn seal(
    sender: &IdentityKeypair,
    recipient: &[u8; PUBLIC_KEY_SIZE],
    plaintext: &str,
    timestamp: i64,
) -> Result<Packet, CipherError> {
    if plaintext.len() > MAX_PLAINTEXT_LENGTH {
        return Err(CipherError::MessageTooLarge(plaintext.len()));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let key = derive_send_key(sender, recipient)?;
    let ciphertext = encrypt(&key, &nonce, plaintext.as_bytes())?;

    let envelope = MessageEnvelope {
        sender: sender.public_key_bytes(),
        recipient: *recipient,
        nonce,
        ciphertext: Bytes::from(ciphertext),
        timestamp,
    };
    let payload = envelope.to_payload();
    let signature = sender.sign_payload(&payload);

    Ok(Packet::new(PacketType::Message, payload, signature)?)
}

/// [`seal`] stamped with the current time.
pub fn seal_now(
    sender: &IdentityKeypair,
    recipient: &[u8; PUBLIC_KEY_SIZE],
    plaintext: &str,
) -> Result<Packet, CipherError> {
    seal(sender, recipient, plaintext, Utc::now().timestamp())
}

/// Check the packet signature against the sender field of its envelope.
pub fn verify_packet_signature(packet: &Packet) -> Result<MessageEnvelope, CipherError> {
    let envelope = MessageEnvelope::parse(&packet.payload)?;
    let sender = PublicIdentity::from_bytes(&envelope.sender)
        .map_err(|_| CipherError::KeyConversion(KeyConversionError::InvalidPublicKey))?;

    if !sender.verify_payload(&packet.payload, &packet.signature) {
        return Err(CipherError::ForgedSignature);
    }
    Ok(envelope)
}

/// Verify, then decrypt a message addressed to `local`.
pub fn open(local: &IdentityKeypair, packet: &Packet) -> Result<DecryptedMessage, CipherError> {
    if packet.packet_type != PacketType::Message {
        return Err(CipherError::UnexpectedPacketType(packet.packet_type));
    }

    let envelope = verify_packet_signature(packet)?;

    if envelope.recipient != local.public_key_bytes() {
        return Err(CipherError::NotForUs(envelope.recipient_id()));
    }

    let key = derive_receive_key(local, &envelope.sender)?;
    let plaintext = decrypt(&key, &envelope.nonce, &envelope.ciphertext)?;
    let text = String::from_utf8(plaintext).map_err(|_| DecryptError::InvalidUtf8)?;

    debug!(
        sender = %envelope.sender_id().short(),
        bytes = text.len(),
        "opened message"
    );

    Ok(DecryptedMessage {
        sender: envelope.sender_id(),
        recipient: envelope.recipient_id(),
        text,
        timestamp: envelope.timestamp,
    })
}

fn encrypt(key: &SymmetricKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CipherError::Encrypt)
}

fn decrypt(key: &SymmetricKey, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(DecryptError::Truncated {
            needed: TAG_SIZE,
            available: ciphertext.len(),
        });
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| DecryptError::TagMismatch)
}
