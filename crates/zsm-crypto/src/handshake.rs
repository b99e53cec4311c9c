//! Challenge/response authentication.
//!
//! The gatekeeper speaks first. The client proves possession of its identity
//! key by signing the challenge, and the gatekeeper answers with a status
//! frame.
//!
//! ```text
//! gatekeeper                                   client
//!     | -- Auth { challenge (32) } ------------> |   Unauthenticated
//!     |                                          |
//!     | <-- Auth { pk (32) || sig (64) } ------- |   Authenticating
//!     |                                          |
//!     | -- status [20, 0, 0, 0, 0] ------------> |   Authenticated
//! ```
//!
//! The challenge is signed raw, without hashing. The response packet's own
//! signature slot is left zeroed; the proof is inside the payload.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, warn};
use zsm_core::{
    Frame, Packet, PacketError, PacketType, StatusCode, CHALLENGE_SIZE, PUBLIC_KEY_SIZE,
    SIGNATURE_SIZE,
};

use crate::identity::{IdentityKeypair, PublicIdentity, UserId};

/// Payload size of a challenge response.
pub const AUTH_RESPONSE_SIZE: usize = PUBLIC_KEY_SIZE + SIGNATURE_SIZE;

/// Handshake errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("rejected by gatekeeper: {} ({})", StatusCode::describe(*code), code)]
    HandshakeRejected { code: u8 },

    #[error("empty frame during handshake")]
    EmptyFrame,

    #[error("unexpected packet type: {0:?}")]
    UnexpectedPacketType(PacketType),

    #[error("malformed auth response: {0} bytes, expected {expected}", expected = AUTH_RESPONSE_SIZE)]
    MalformedResponse(usize),

    #[error("challenge signature does not verify")]
    InvalidSignature,

    #[error("auth response carries an invalid public key")]
    InvalidPublicKey,

    #[error("bad handshake packet: {0}")]
    Packet(#[from] PacketError),

    #[error("session is closed")]
    SessionClosed,

    #[error("session is not authenticated")]
    NotAuthenticated,
}

/// Per-channel authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the gatekeeper's challenge.
    Unauthenticated,
    /// Response sent, waiting for the status byte.
    Authenticating,
    Authenticated,
    /// Terminal.
    Closed,
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct AuthHandshake {
    state: SessionState,
}

impl Default for AuthHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthHandshake {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Move to `Closed`. Idempotent.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Answer the gatekeeper's challenge.
    ///
    /// Any well-formed packet is accepted as the challenge carrier; its
    /// payload is what gets signed. A frame that does not decode closes the
    /// handshake.
    pub fn respond_to_challenge(
        &mut self,
        identity: &IdentityKeypair,
        frame: &Frame,
    ) -> Result<Packet, HandshakeError> {
        match self.state {
            SessionState::Unauthenticated => {}
            SessionState::Closed => return Err(HandshakeError::SessionClosed),
            _ => return Err(HandshakeError::NotAuthenticated),
        }

        let challenge = match Packet::decode(frame.as_bytes()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("undecodable challenge: {}", e);
                self.close();
                return Err(e.into());
            }
        };

        let response = auth_response(identity, &challenge.payload)?;
        self.state = SessionState::Authenticating;
        debug!(challenge_len = challenge.payload.len(), "answered challenge");

        Ok(response)
    }

    /// Consume the gatekeeper's verdict.
    ///
    /// The first byte of the frame is the status code. Only
    /// [`StatusCode::Authorised`] authenticates; everything else closes.
    pub fn on_status(&mut self, frame: &Frame) -> Result<(), HandshakeError> {
        match self.state {
            SessionState::Authenticating => {}
            SessionState::Closed => return Err(HandshakeError::SessionClosed),
            _ => return Err(HandshakeError::NotAuthenticated),
        }

        let Some(&code) = frame.as_bytes().first() else {
            self.close();
            return Err(HandshakeError::EmptyFrame);
        };

        if code == StatusCode::Authorised as u8 {
            self.state = SessionState::Authenticated;
            debug!("authenticated");
            Ok(())
        } else {
            self.close();
            Err(HandshakeError::HandshakeRejected { code })
        }
    }
}

/// Build the response to `challenge`: `pk || sign(challenge)` with a zeroed
/// outer signature.
pub fn auth_response(identity: &IdentityKeypair, challenge: &[u8]) -> Result<Packet, HandshakeError> {
    let mut payload = Vec::with_capacity(AUTH_RESPONSE_SIZE);
    payload.extend_from_slice(&identity.public_key_bytes());
    payload.extend_from_slice(&identity.sign(challenge));
    Ok(Packet::unsigned(PacketType::Auth, payload)?)
}

/// Gatekeeper side of the handshake: one instance per connection.
pub struct ChallengeVerifier {
    challenge: [u8; CHALLENGE_SIZE],
}

impl Default for ChallengeVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeVerifier {
    /// Draw a fresh random challenge.
    pub fn new() -> Self {
        let mut challenge = [0u8; CHALLENGE_SIZE];
        OsRng.fill_bytes(&mut challenge);
        Self { challenge }
    }

    pub fn with_challenge(challenge: [u8; CHALLENGE_SIZE]) -> Self {
        Self { challenge }
    }

    pub fn challenge(&self) -> &[u8; CHALLENGE_SIZE] {
        &self.challenge
    }

    /// The packet to send on connect.
    pub fn challenge_packet(&self) -> Packet {
        Packet {
            packet_type: PacketType::Auth,
            payload: self.challenge.to_vec().into(),
            signature: [0u8; SIGNATURE_SIZE],
        }
    }

    /// Check a client's response. Returns the proven identity.
    pub fn verify_response(&self, packet: &Packet) -> Result<UserId, HandshakeError> {
        if packet.packet_type != PacketType::Auth {
            return Err(HandshakeError::UnexpectedPacketType(packet.packet_type));
        }
        if packet.payload.len() != AUTH_RESPONSE_SIZE {
            return Err(HandshakeError::MalformedResponse(packet.payload.len()));
        }

        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&packet.payload[..PUBLIC_KEY_SIZE]);
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&packet.payload[PUBLIC_KEY_SIZE..]);

        let identity =
            PublicIdentity::from_bytes(&public_key).map_err(|_| HandshakeError::InvalidPublicKey)?;
        if !identity.verify(&self.challenge, &signature) {
            return Err(HandshakeError::InvalidSignature);
        }

        Ok(identity.user_id())
    }
}
