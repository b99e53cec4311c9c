//! Handshake and messaging driven through the stream frame buffer, the way a
//! connection sees them.

use std::sync::Arc;

use zsm_core::{FrameBuffer, Packet, StatusCode};
use zsm_crypto::envelope::verify_packet_signature;
use zsm_crypto::{
    ChallengeVerifier, IdentityKeypair, Session, SessionError, SessionEvent, SessionState,
};

/// Feed `bytes` through a frame buffer in small chunks and hand every
/// complete frame to the session.
fn deliver(session: &mut Session, bytes: &[u8]) -> Vec<Result<SessionEvent, SessionError>> {
    let mut frames = FrameBuffer::new();
    let mut events = Vec::new();
    for chunk in bytes.chunks(7) {
        frames.extend_from_slice(chunk);
        while let Some(frame) = frames.next_frame().unwrap() {
            events.push(session.handle_frame(&frame));
        }
    }
    events
}

/// Run the gatekeeper side against `session` and return the proven user.
fn gatekeeper_admits(session: &mut Session) -> zsm_crypto::UserId {
    let verifier = ChallengeVerifier::new();

    let mut events = deliver(session, &verifier.challenge_packet().encode());
    let Ok(SessionEvent::Reply(response)) = events.remove(0) else {
        panic!("expected challenge response");
    };
    let user = verifier
        .verify_response(&Packet::decode_exact(&response).unwrap())
        .unwrap();

    let events = deliver(session, &StatusCode::Authorised.to_frame());
    assert_eq!(events, vec![Ok(SessionEvent::Authenticated)]);
    user
}

#[test]
fn test_two_sessions_exchange_messages() {
    let alice_key = Arc::new(IdentityKeypair::generate());
    let bob_key = Arc::new(IdentityKeypair::generate());

    let mut alice = Session::new(alice_key.clone());
    let mut bob = Session::new(bob_key.clone());

    assert_eq!(gatekeeper_admits(&mut alice), alice_key.user_id());
    assert_eq!(gatekeeper_admits(&mut bob), bob_key.user_id());

    let mut stream = Vec::new();
    stream.extend_from_slice(&alice.seal_message(&bob.user_id(), "hello", 1_700_000_000).unwrap());
    stream.extend_from_slice(&StatusCode::Success.to_frame());
    stream.extend_from_slice(&alice.seal_message(&bob.user_id(), "second", 1_700_000_001).unwrap());

    let events = deliver(&mut bob, &stream);
    assert_eq!(events.len(), 3);

    let Ok(SessionEvent::Message(first)) = &events[0] else {
        panic!("expected message, got {:?}", events[0]);
    };
    assert_eq!(first.sender, alice_key.user_id());
    assert_eq!(first.text, "hello");
    assert_eq!(first.timestamp, 1_700_000_000);

    assert_eq!(events[1], Ok(SessionEvent::Status(StatusCode::Success)));

    let Ok(SessionEvent::Message(second)) = &events[2] else {
        panic!("expected message, got {:?}", events[2]);
    };
    assert_eq!(second.text, "second");

    // Reply in the other direction uses the other directional key.
    let reply = bob.seal_message(&alice.user_id(), "hi alice", 5).unwrap();
    let events = deliver(&mut alice, &reply);
    let Ok(SessionEvent::Message(message)) = &events[0] else {
        panic!("expected message, got {:?}", events[0]);
    };
    assert_eq!(message.text, "hi alice");
    assert_eq!(message.sender, bob_key.user_id());
}

#[test]
fn test_router_view_of_sealed_packet() {
    let alice = IdentityKeypair::generate();
    let bob = IdentityKeypair::generate();

    let packet = zsm_crypto::seal(&alice, &bob.public_key_bytes(), "routed", 9).unwrap();
    let envelope = verify_packet_signature(&packet).unwrap();

    assert_eq!(envelope.sender_id(), alice.user_id());
    assert_eq!(envelope.recipient_id(), bob.user_id());
}

#[test]
fn test_rejected_session_stays_closed() {
    let mut session = Session::new(Arc::new(IdentityKeypair::generate()));
    let verifier = ChallengeVerifier::new();
    deliver(&mut session, &verifier.challenge_packet().encode());

    let events = deliver(&mut session, &StatusCode::Unauthorised.to_frame());
    let err = events[0].clone().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.to_string(), "handshake failed: rejected by gatekeeper: unauthorised (19)");
    assert_eq!(session.state(), SessionState::Closed);
}
