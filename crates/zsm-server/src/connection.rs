//! One client connection: challenge, then read, check and route frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zsm_core::{Frame, FrameBuffer, PacketError, PacketType, StatusCode};
use zsm_crypto::envelope::{verify_packet_signature, CipherError, DecryptError};
use zsm_crypto::{ChallengeVerifier, HandshakeError, UserId};

use crate::registry::{ClientHandle, RegistryError};
use crate::ServerState;

/// Outbound frames queued per client.
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] PacketError),

    #[error("authentication failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no challenge response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed by peer")]
    Closed,
}

/// A message frame that passed every check, ready to forward unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFrame {
    pub recipient: UserId,
    pub bytes: Bytes,
}

/// Decide whether `frame` from `user` may be forwarded.
///
/// On rejection, the status code to send back to the sender.
pub fn check_message(frame: Frame, user: &UserId) -> Result<RoutedFrame, StatusCode> {
    if frame.is_bare() {
        return Err(StatusCode::InvalidLength);
    }

    let packet = frame.packet().map_err(|e| match e {
        PacketError::UnknownPacketType(_) => StatusCode::InvalidType,
        PacketError::PacketTooLong(_) => StatusCode::TooLong,
        PacketError::Truncated { .. } | PacketError::TrailingBytes(_) => StatusCode::InvalidLength,
    })?;

    if packet.packet_type != PacketType::Message {
        return Err(StatusCode::InvalidType);
    }

    let envelope = verify_packet_signature(&packet).map_err(|e| match e {
        CipherError::Decrypt(DecryptError::Truncated { .. }) => StatusCode::InvalidLength,
        _ => StatusCode::ErrorIntegrity,
    })?;

    if envelope.sender_id() != *user {
        return Err(StatusCode::ErrorAuthenticate);
    }

    Ok(RoutedFrame {
        recipient: envelope.recipient_id(),
        bytes: frame.into_bytes(),
    })
}

/// Read until one complete frame is buffered.
async fn read_frame(
    reader: &mut OwnedReadHalf,
    frames: &mut FrameBuffer,
) -> Result<Frame, ConnectionError> {
    loop {
        if let Some(frame) = frames.next_frame()? {
            return Ok(frame);
        }
        if reader.read_buf(frames.buffer_mut()).await? == 0 {
            return Err(ConnectionError::Closed);
        }
    }
}

/// Challenge the client and verify its answer.
async fn authenticate(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    frames: &mut FrameBuffer,
) -> Result<UserId, ConnectionError> {
    let verifier = ChallengeVerifier::new();
    writer.write_all(&verifier.challenge_packet().encode()).await?;

    let frame = read_frame(reader, frames).await?;
    let response = frame.packet()?;
    Ok(verifier.verify_response(&response)?)
}

/// Drain the outbound queue into the socket.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn reject(writer: &mut OwnedWriteHalf) {
    let _ = writer.write_all(&StatusCode::Unauthorised.to_frame()).await;
    let _ = writer.shutdown().await;
}

/// Serve one accepted connection until it closes.
pub async fn handle(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), ConnectionError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut frames = FrameBuffer::new();
    let timeout = state.config.handshake_timeout();

    let user = match tokio::time::timeout(
        timeout,
        authenticate(&mut reader, &mut writer, &mut frames),
    )
    .await
    {
        Ok(Ok(user)) => user,
        Ok(Err(e)) => {
            warn!("{} failed authentication: {}", peer, e);
            reject(&mut writer).await;
            return Err(e);
        }
        Err(_) => {
            warn!("{} did not answer the challenge in time", peer);
            reject(&mut writer).await;
            return Err(ConnectionError::Timeout(timeout));
        }
    };

    let conn_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    // Queued ahead of any routed frame. No early return between register
    // and unregister below.
    tx.try_send(Bytes::copy_from_slice(&StatusCode::Authorised.to_frame()))
        .map_err(|_| ConnectionError::Closed)?;

    let handle = ClientHandle {
        conn_id,
        tx: tx.clone(),
    };

    let replaced = state.registry.write().await.register(user.clone(), handle);
    match replaced {
        Ok(Some(_)) => info!(user = %user.short(), "replaced previous connection"),
        Ok(None) => {}
        Err(e) => {
            warn!("rejecting {}: {}", peer, e);
            drop(rx);
            reject(&mut writer).await;
            return Err(e.into());
        }
    }
    info!(user = %user.short(), %peer, "client authenticated");

    let writer_task = tokio::spawn(write_loop(writer, rx));
    let result = route_loop(&mut reader, &mut frames, &user, &tx, &state).await;

    state.registry.write().await.unregister(&user, conn_id);
    drop(tx);
    let _ = writer_task.await;
    info!(user = %user.short(), "client disconnected");

    match result {
        Err(ConnectionError::Closed) => Ok(()),
        other => other,
    }
}

async fn route_loop(
    reader: &mut OwnedReadHalf,
    frames: &mut FrameBuffer,
    user: &UserId,
    tx: &mpsc::Sender<Bytes>,
    state: &ServerState,
) -> Result<(), ConnectionError> {
    loop {
        let frame = match read_frame(reader, frames).await {
            Ok(frame) => frame,
            Err(ConnectionError::Framing(e)) => {
                // The stream cannot be resynchronised after a bad length.
                warn!(user = %user.short(), "closing: {}", e);
                let _ = tx
                    .send(Bytes::copy_from_slice(&StatusCode::TooLong.to_frame()))
                    .await;
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        let status = match check_message(frame, user) {
            Ok(routed) => route(state, routed).await,
            Err(status) => Err(status),
        };

        if let Err(status) = status {
            debug!(user = %user.short(), %status, "rejected frame");
            if tx.send(Bytes::copy_from_slice(&status.to_frame())).await.is_err() {
                return Err(ConnectionError::Closed);
            }
        }
    }
}

async fn route(state: &ServerState, routed: RoutedFrame) -> Result<(), StatusCode> {
    let Some(recipient_tx) = state.registry.read().await.sender(&routed.recipient) else {
        return Err(StatusCode::UnknownUser);
    };

    // Never wait on another client's queue.
    match recipient_tx.try_send(routed.bytes) {
        Ok(()) => {
            debug!(to = %routed.recipient.short(), "routed message");
            Ok(())
        }
        Err(TrySendError::Full(_)) => {
            warn!(to = %routed.recipient.short(), "recipient queue full, dropping message");
            Err(StatusCode::WritingSocket)
        }
        Err(TrySendError::Closed(_)) => Err(StatusCode::UnknownUser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use zsm_common::ServerConfig;
    use zsm_core::{Packet, CHALLENGE_SIZE, HEADER_SIZE, SIGNATURE_SIZE};
    use zsm_crypto::handshake::auth_response;
    use zsm_crypto::IdentityKeypair;

    fn frame(packet: &Packet) -> Frame {
        Frame::from_bytes(packet.encode())
    }

    #[test]
    fn test_valid_message_is_routed_unchanged() {
        let alice = IdentityKeypair::generate();
        let bob = IdentityKeypair::generate();
        let packet = zsm_crypto::seal(&alice, &bob.public_key_bytes(), "hi", 1).unwrap();

        let routed = check_message(frame(&packet), &alice.user_id()).unwrap();
        assert_eq!(routed.recipient, bob.user_id());
        assert_eq!(routed.bytes, packet.encode());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let alice = IdentityKeypair::generate();
        let packet = Packet::unsigned(PacketType::Info, vec![1, 2, 3]).unwrap();
        assert_eq!(
            check_message(frame(&packet), &alice.user_id()),
            Err(StatusCode::InvalidType)
        );

        let mut unknown = vec![0x09, 1, 0, 0, 0, 0xAA];
        unknown.extend_from_slice(&[0u8; SIGNATURE_SIZE]);
        let unknown = Frame::from_bytes(unknown);
        assert_eq!(
            check_message(unknown, &alice.user_id()),
            Err(StatusCode::InvalidType)
        );
    }

    #[test]
    fn test_bad_signature_rejected() {
        let alice = IdentityKeypair::generate();
        let bob = IdentityKeypair::generate();
        let packet = zsm_crypto::seal(&alice, &bob.public_key_bytes(), "hi", 1).unwrap();
        let forged = Packet::new(PacketType::Message, packet.payload, [7u8; SIGNATURE_SIZE]).unwrap();

        assert_eq!(
            check_message(frame(&forged), &alice.user_id()),
            Err(StatusCode::ErrorIntegrity)
        );
    }

    #[test]
    fn test_sender_must_be_authenticated_user() {
        let alice = IdentityKeypair::generate();
        let bob = IdentityKeypair::generate();
        let mallory = IdentityKeypair::generate();
        let packet = zsm_crypto::seal(&alice, &bob.public_key_bytes(), "hi", 1).unwrap();

        assert_eq!(
            check_message(frame(&packet), &mallory.user_id()),
            Err(StatusCode::ErrorAuthenticate)
        );
    }

    #[test]
    fn test_short_and_bare_frames_rejected() {
        let alice = IdentityKeypair::generate();
        let short = Packet::new(PacketType::Message, vec![0u8; 40], [0u8; SIGNATURE_SIZE]).unwrap();
        assert_eq!(
            check_message(frame(&short), &alice.user_id()),
            Err(StatusCode::InvalidLength)
        );

        let bare = Frame::from_bytes(vec![0x02, 0, 0, 0, 0]);
        assert_eq!(
            check_message(bare, &alice.user_id()),
            Err(StatusCode::InvalidLength)
        );
    }

    #[tokio::test]
    async fn test_client_gone_after_authentication_is_unregistered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::new(ServerConfig {
            listen: addr.to_string(),
            ..ServerConfig::default()
        }));
        let identity = IdentityKeypair::generate();
        let user = identity.user_id();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut challenge = vec![0u8; HEADER_SIZE + CHALLENGE_SIZE + SIGNATURE_SIZE];
            stream.read_exact(&mut challenge).await.unwrap();
            let challenge = Packet::decode_exact(&challenge).unwrap();
            let response = auth_response(&identity, &challenge.payload).unwrap();
            stream.write_all(&response.encode()).await.unwrap();
            // Hang up without reading the verdict.
        });

        let (stream, peer) = listener.accept().await.unwrap();
        let server = tokio::spawn(handle(stream, peer, state.clone()));
        client.await.unwrap();
        let _ = server.await.unwrap();

        assert!(!state.registry.read().await.contains(&user));
        assert_eq!(state.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_recipient_queue_is_reported_to_sender() {
        let state = ServerState::new(ServerConfig::default());
        let alice = IdentityKeypair::generate();
        let bob = IdentityKeypair::generate();

        let (tx, mut rx) = mpsc::channel(1);
        let bob_handle = ClientHandle {
            conn_id: Uuid::new_v4(),
            tx,
        };
        state
            .registry
            .write()
            .await
            .register(bob.user_id(), bob_handle)
            .unwrap();

        let packet = zsm_crypto::seal(&alice, &bob.public_key_bytes(), "hi", 1).unwrap();
        let routed = check_message(frame(&packet), &alice.user_id()).unwrap();

        assert_eq!(route(&state, routed.clone()).await, Ok(()));
        assert_eq!(
            route(&state, routed.clone()).await,
            Err(StatusCode::WritingSocket)
        );

        assert_eq!(rx.recv().await.unwrap(), packet.encode());
        drop(rx);
        assert_eq!(route(&state, routed).await, Err(StatusCode::UnknownUser));
    }
}
