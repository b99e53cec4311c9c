//! Ed25519 identity keys and user IDs.
//!
//! A **user ID** is the lowercase hex encoding of an Ed25519 public key
//! (32 bytes → 64 characters). It is what the gatekeeper routes on and what
//! decrypted messages report as their sender.
//!
//! Secret keys use the 64-byte layout `seed || public key`, so key material
//! exported by other ZSM clients can be loaded unchanged.
//!
//! # Example
//!
//! ```
//! use zsm_crypto::identity::IdentityKeypair;
//!
//! let keypair = IdentityKeypair::generate();
//! let user_id = keypair.user_id();
//! assert_eq!(user_id.as_str().len(), 64);
//!
//! let challenge = b"random challenge bytes";
//! let signature = keypair.sign(challenge);
//! assert!(keypair.public_identity().verify(challenge, &signature));
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;
use zsm_core::{HASH_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE};

type Blake2b256 = Blake2b<U32>;

/// BLAKE2b-256 digest of `data`, the value packet signatures are made over.
pub fn payload_digest(data: &[u8]) -> [u8; HASH_SIZE] {
    Blake2b256::digest(data).into()
}

/// User ID: hex-encoded Ed25519 public key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a user ID from raw public key bytes.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Parse a user ID from its string representation.
    ///
    /// Upper-case hex is accepted and normalised to lower case.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).context("invalid hex encoding")?;

        if bytes.len() != PUBLIC_KEY_SIZE {
            anyhow::bail!(
                "invalid user ID length: expected {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            );
        }

        Ok(Self(hex::encode(bytes)))
    }

    /// Get the raw public key bytes.
    pub fn to_bytes(&self) -> Result<[u8; PUBLIC_KEY_SIZE]> {
        let bytes = hex::decode(&self.0).context("invalid hex encoding")?;

        bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid key length"))
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the ID, for logs and prompts.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl std::str::FromStr for UserId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Ed25519 identity keypair.
///
/// The signing key is zeroized on drop by `ed25519-dalek`.
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create from a 64-byte secret key (`seed || public key`).
    ///
    /// Fails if the public half does not belong to the seed.
    pub fn from_secret_key_bytes(bytes: &[u8; SECRET_KEY_SIZE]) -> Result<Self> {
        let signing_key =
            SigningKey::from_keypair_bytes(bytes).context("secret key does not match its public key")?;
        Ok(Self { signing_key })
    }

    /// Parse a hex-encoded 64-byte secret key.
    pub fn from_secret_key_hex(s: &str) -> Result<Self> {
        let mut bytes = hex::decode(s.trim()).context("invalid hex encoding")?;
        if bytes.len() != SECRET_KEY_SIZE {
            let len = bytes.len();
            bytes.zeroize();
            anyhow::bail!(
                "invalid secret key length: expected {} bytes, got {}",
                SECRET_KEY_SIZE,
                len
            );
        }

        let mut key_bytes = [0u8; SECRET_KEY_SIZE];
        key_bytes.copy_from_slice(&bytes);
        bytes.zeroize();

        let keypair = Self::from_secret_key_bytes(&key_bytes);
        key_bytes.zeroize();
        keypair
    }

    /// Get the user ID.
    pub fn user_id(&self) -> UserId {
        UserId::from_bytes(self.signing_key.verifying_key().as_bytes())
    }

    /// Get the public key as a verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the public half of this identity.
    pub fn public_identity(&self) -> PublicIdentity {
        PublicIdentity {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Get the public key bytes.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.signing_key.verifying_key().as_bytes()
    }

    /// Get the 64-byte secret key (`seed || public key`).
    ///
    /// # Security
    /// Handle with care! These bytes can recreate the identity.
    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.signing_key.to_keypair_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Sign raw bytes with this identity.
    ///
    /// Used for challenge responses, which are signed without hashing.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Sign the BLAKE2b-256 digest of a packet payload.
    pub fn sign_payload(&self, payload: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.sign(&payload_digest(payload))
    }

    /// Save keypair to files.
    ///
    /// The secret key is saved with restricted permissions (0600 on Unix).
    pub fn save(&self, private_path: impl AsRef<Path>, public_path: impl AsRef<Path>) -> Result<()> {
        let private_path = private_path.as_ref();
        let mut secret_bytes = self.secret_key_bytes();

        let written = fs::write(private_path, secret_bytes);
        secret_bytes.zeroize();
        written.with_context(|| format!("failed to write {}", private_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        fs::write(public_path.as_ref(), self.public_key_bytes())
            .with_context(|| format!("failed to write {}", public_path.as_ref().display()))?;

        Ok(())
    }

    /// Load keypair from a secret key file.
    pub fn load(private_path: impl AsRef<Path>) -> Result<Self> {
        let mut bytes = fs::read(private_path.as_ref()).context("failed to read secret key")?;

        if bytes.len() != SECRET_KEY_SIZE {
            bytes.zeroize();
            anyhow::bail!("invalid secret key length: expected {} bytes", SECRET_KEY_SIZE);
        }

        let mut key_bytes = [0u8; SECRET_KEY_SIZE];
        key_bytes.copy_from_slice(&bytes);
        bytes.zeroize();

        let keypair = Self::from_secret_key_bytes(&key_bytes);
        key_bytes.zeroize();

        keypair
    }

    /// Load only the public key (for verification).
    pub fn load_public(public_path: impl AsRef<Path>) -> Result<PublicIdentity> {
        let bytes = fs::read(public_path.as_ref()).context("failed to read public key")?;

        let key_bytes: [u8; PUBLIC_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!("invalid public key length: expected {} bytes", PUBLIC_KEY_SIZE)
        })?;

        PublicIdentity::from_bytes(&key_bytes)
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("user_id", &self.user_id())
            .finish_non_exhaustive()
    }
}

/// Public identity (verifying key only).
///
/// Used when you only need to verify signatures, not create them.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicIdentity {
    verifying_key: VerifyingKey,
}

impl PublicIdentity {
    /// Create from raw public key bytes.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes).context("invalid public key")?;
        Ok(Self { verifying_key })
    }

    /// Get the user ID.
    pub fn user_id(&self) -> UserId {
        UserId::from_bytes(self.verifying_key.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.verifying_key.as_bytes()
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Verify a signature over raw bytes.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        let sig = Signature::from_bytes(signature);
        self.verifying_key.verify_strict(message, &sig).is_ok()
    }

    /// Verify a signature over the BLAKE2b-256 digest of a payload.
    pub fn verify_payload(&self, payload: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        self.verify(&payload_digest(payload), signature)
    }
}

impl fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicIdentity({})", self.user_id())
    }
}
