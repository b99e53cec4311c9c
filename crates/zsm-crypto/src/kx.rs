//! Static key agreement between two long-term identities.
//!
//! Both parties derive the same 32-byte symmetric key for a message without
//! any round-trip, from nothing but their own Ed25519 identity and the other
//! side's public key.
//!
//! # Derivation
//!
//! 1. Convert both Ed25519 keys to X25519. The secret scalar is the first
//!    half of SHA-512(seed), clamped by X25519; the public key is the
//!    birational map of the Edwards point to Montgomery form.
//! 2. Run the `crypto_kx` session key computation:
//!
//! ```text
//! q    = X25519(own_secret, remote_public)
//! keys = BLAKE2b-512(q || client_pk || server_pk)
//!
//! client: rx = keys[0..32]   tx = keys[32..64]
//! server: tx = keys[0..32]   rx = keys[32..64]
//! ```
//!
//! # Fixed roles
//!
//! The roles are NOT negotiated. They are a protocol constant:
//!
//! | Side     | kx role  | `server_pk` | `client_pk` | key kept              |
//! |----------|----------|-------------|-------------|-----------------------|
//! | sender   | server   | sender      | recipient   | server rx, `[32..64]` |
//! | receiver | client   | sender      | recipient   | client tx, `[32..64]` |
//!
//! Both sides therefore hash the same `q || recipient || sender` input and
//! keep the same half. Every message from A to B uses one key and every
//! message from B to A uses another; the key never changes for a pair, so
//! there is no forward secrecy. Changing either role breaks interoperability
//! with every deployed client.

use blake2::{Blake2b512, Digest};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};
use zsm_core::PUBLIC_KEY_SIZE;

use ed25519_dalek::VerifyingKey;

use crate::identity::IdentityKeypair;

/// Size of a derived symmetric key.
pub const KEY_SIZE: usize = 32;

/// Errors converting or combining identity keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyConversionError {
    #[error("public key is not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("public key has small order")]
    WeakPublicKey,

    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,
}

/// A derived XChaCha20-Poly1305 key, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Key protecting messages from `local` to the owner of `recipient`.
pub fn derive_send_key(
    local: &IdentityKeypair,
    recipient: &[u8; PUBLIC_KEY_SIZE],
) -> Result<SymmetricKey, KeyConversionError> {
    // Sender is the kx server.
    let server_pk = local_x25519_public(local);
    let client_pk = to_x25519_public(recipient)?;
    session_key(local, &client_pk, &server_pk, &client_pk)
}

/// Key protecting messages to `local` from the owner of `sender`.
pub fn derive_receive_key(
    local: &IdentityKeypair,
    sender: &[u8; PUBLIC_KEY_SIZE],
) -> Result<SymmetricKey, KeyConversionError> {
    // Receiver is the kx client.
    let client_pk = local_x25519_public(local);
    let server_pk = to_x25519_public(sender)?;
    session_key(local, &server_pk, &client_pk, &server_pk)
}

/// Convert an Ed25519 public key to X25519.
pub fn to_x25519_public(
    ed_public: &[u8; PUBLIC_KEY_SIZE],
) -> Result<X25519PublicKey, KeyConversionError> {
    let verifying_key =
        VerifyingKey::from_bytes(ed_public).map_err(|_| KeyConversionError::InvalidPublicKey)?;
    if verifying_key.is_weak() {
        return Err(KeyConversionError::WeakPublicKey);
    }
    Ok(X25519PublicKey::from(verifying_key.to_montgomery().to_bytes()))
}

fn local_x25519_public(local: &IdentityKeypair) -> X25519PublicKey {
    X25519PublicKey::from(local.verifying_key().to_montgomery().to_bytes())
}

fn local_x25519_secret(local: &IdentityKeypair) -> StaticSecret {
    let mut scalar = local.signing_key().to_scalar_bytes();
    let secret = StaticSecret::from(scalar);
    scalar.zeroize();
    secret
}

/// The upper half of `BLAKE2b-512(q || client_pk || server_pk)`.
fn session_key(
    local: &IdentityKeypair,
    remote: &X25519PublicKey,
    client_pk: &X25519PublicKey,
    server_pk: &X25519PublicKey,
) -> Result<SymmetricKey, KeyConversionError> {
    let shared = local_x25519_secret(local).diffie_hellman(remote);
    if !shared.was_contributory() {
        return Err(KeyConversionError::NonContributory);
    }

    let mut keys: [u8; 64] = Blake2b512::new()
        .chain_update(shared.as_bytes())
        .chain_update(client_pk.as_bytes())
        .chain_update(server_pk.as_bytes())
        .finalize()
        .into();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&keys[KEY_SIZE..]);
    keys.zeroize();

    Ok(SymmetricKey(key))
}
