//! Per-channel protocol context.
//!
//! A [`Session`] owns everything one connection needs: the local identity and
//! the handshake state. Frames go in through [`Session::handle_frame`], which
//! returns what the caller should do next. The session performs no I/O.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};
use zsm_core::{Frame, PacketError, PacketType, StatusCode};

use crate::envelope::{self, CipherError, DecryptedMessage};
use crate::handshake::{AuthHandshake, HandshakeError, SessionState};
use crate::identity::{IdentityKeypair, UserId};

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("message rejected: {0}")]
    Cipher(#[from] CipherError),

    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("unexpected packet type: {0:?}")]
    UnexpectedPacketType(PacketType),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
}

impl SessionError {
    /// Whether the connection must be dropped.
    ///
    /// Handshake failures end the session. Anything that goes wrong with a
    /// single packet after authentication only drops that packet.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Handshake(e) if *e != HandshakeError::NotAuthenticated)
    }
}

/// Outcome of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes to write back to the channel.
    Reply(Bytes),
    /// The gatekeeper accepted us.
    Authenticated,
    Message(DecryptedMessage),
    /// A status notice from the gatekeeper after authentication.
    Status(StatusCode),
}

/// One channel's protocol state.
#[derive(Debug)]
pub struct Session {
    identity: Arc<IdentityKeypair>,
    handshake: AuthHandshake,
}

impl Session {
    pub fn new(identity: Arc<IdentityKeypair>) -> Self {
        Self {
            identity,
            handshake: AuthHandshake::new(),
        }
    }

    pub fn identity(&self) -> &IdentityKeypair {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id()
    }

    pub fn state(&self) -> SessionState {
        self.handshake.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.handshake.is_authenticated()
    }

    pub fn close(&mut self) {
        self.handshake.close();
    }

    /// Process one inbound frame, strictly in arrival order.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<SessionEvent, SessionError> {
        match self.handshake.state() {
            SessionState::Unauthenticated => {
                let response = self.handshake.respond_to_challenge(&self.identity, frame)?;
                Ok(SessionEvent::Reply(response.encode()))
            }
            SessionState::Authenticating => {
                self.handshake.on_status(frame)?;
                Ok(SessionEvent::Authenticated)
            }
            SessionState::Authenticated => self.handle_authenticated(frame),
            SessionState::Closed => Err(HandshakeError::SessionClosed.into()),
        }
    }

    fn handle_authenticated(&self, frame: &Frame) -> Result<SessionEvent, SessionError> {
        if let Some(status) = frame.status() {
            debug!(%status, "status notice");
            return Ok(SessionEvent::Status(status));
        }

        let packet = frame.packet()?;
        match packet.packet_type {
            PacketType::Message => match envelope::open(&self.identity, &packet) {
                Ok(message) => Ok(SessionEvent::Message(message)),
                Err(e) => {
                    warn!("dropping message: {}", e);
                    Err(e.into())
                }
            },
            other => Err(SessionError::UnexpectedPacketType(other)),
        }
    }

    /// Encrypt `text` for `recipient`, returning the encoded frame.
    pub fn seal_message(
        &self,
        recipient: &UserId,
        text: &str,
        timestamp: i64,
    ) -> Result<Bytes, SessionError> {
        if !self.is_authenticated() {
            return Err(HandshakeError::NotAuthenticated.into());
        }

        let recipient_key = recipient
            .to_bytes()
            .map_err(|e| SessionError::InvalidRecipient(e.to_string()))?;
        let packet = envelope::seal(&self.identity, &recipient_key, text, timestamp)?;
        Ok(packet.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::ChallengeVerifier;

    fn authenticated(identity: IdentityKeypair) -> Session {
        let mut session = Session::new(Arc::new(identity));
        let verifier = ChallengeVerifier::new();

        let reply = session
            .handle_frame(&Frame::from_bytes(verifier.challenge_packet().encode()))
            .unwrap();
        let SessionEvent::Reply(bytes) = reply else {
            panic!("expected reply, got {reply:?}");
        };
        let response = zsm_core::Packet::decode_exact(&bytes).unwrap();
        verifier.verify_response(&response).unwrap();

        let event = session
            .handle_frame(&Frame::from_bytes(StatusCode::Authorised.to_frame().to_vec()))
            .unwrap();
        assert_eq!(event, SessionEvent::Authenticated);
        session
    }

    #[test]
    fn test_message_between_sessions() {
        let alice = authenticated(IdentityKeypair::generate());
        let mut bob = authenticated(IdentityKeypair::generate());

        let frame = alice
            .seal_message(&bob.user_id(), "hello", 1_700_000_000)
            .unwrap();
        let event = bob.handle_frame(&Frame::from_bytes(frame)).unwrap();

        let SessionEvent::Message(message) = event else {
            panic!("expected message, got {event:?}");
        };
        assert_eq!(message.sender, alice.user_id());
        assert_eq!(message.text, "hello");
        assert_eq!(message.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_seal_requires_authentication() {
        let session = Session::new(Arc::new(IdentityKeypair::generate()));
        let err = session
            .seal_message(&IdentityKeypair::generate().user_id(), "hi", 0)
            .unwrap_err();
        assert_eq!(err, SessionError::Handshake(HandshakeError::NotAuthenticated));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rejection_is_fatal() {
        let mut session = Session::new(Arc::new(IdentityKeypair::generate()));
        let verifier = ChallengeVerifier::new();
        session
            .handle_frame(&Frame::from_bytes(verifier.challenge_packet().encode()))
            .unwrap();

        let err = session
            .handle_frame(&Frame::from_bytes(StatusCode::Unauthorised.to_frame().to_vec()))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Closed);

        let err = session
            .handle_frame(&Frame::from_bytes(StatusCode::Authorised.to_frame().to_vec()))
            .unwrap_err();
        assert_eq!(err, SessionError::Handshake(HandshakeError::SessionClosed));
    }

    #[test]
    fn test_bad_packets_keep_session_open() {
        let mut bob = authenticated(IdentityKeypair::generate());

        let info = zsm_core::Packet::unsigned(PacketType::Info, vec![1]).unwrap();
        let err = bob.handle_frame(&Frame::from_bytes(info.encode())).unwrap_err();
        assert_eq!(err, SessionError::UnexpectedPacketType(PacketType::Info));
        assert!(!err.is_fatal());

        let garbage = zsm_core::Packet::unsigned(PacketType::Message, vec![0u8; 20]).unwrap();
        let err = bob.handle_frame(&Frame::from_bytes(garbage.encode())).unwrap_err();
        assert!(matches!(err, SessionError::Cipher(CipherError::Decrypt(_))));
        assert!(!err.is_fatal());

        assert!(bob.is_authenticated());
    }

    #[test]
    fn test_status_notice_after_authentication() {
        let mut bob = authenticated(IdentityKeypair::generate());
        let event = bob
            .handle_frame(&Frame::from_bytes(StatusCode::UnknownUser.to_frame().to_vec()))
            .unwrap();
        assert_eq!(event, SessionEvent::Status(StatusCode::UnknownUser));
        assert!(bob.is_authenticated());
    }

    #[test]
    fn test_invalid_recipient() {
        let alice = authenticated(IdentityKeypair::generate());
        let recipient = UserId::from_bytes(&[0u8; 32]);
        let err = alice.seal_message(&recipient, "hi", 0).unwrap_err();
        assert!(matches!(err, SessionError::Cipher(CipherError::KeyConversion(_))));
    }
}
