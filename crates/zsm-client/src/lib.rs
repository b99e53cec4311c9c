//! Async ZSM client.
//!
//! [`ClientConnection`] drives a [`Session`] over any ordered byte stream:
//! a TCP socket in production, an in-memory duplex in tests. The handshake
//! runs under a single deadline; once authenticated, messages are sent
//! fire-and-forget and inbound frames are surfaced as [`SessionEvent`]s in
//! arrival order.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use zsm_common::ClientConfig;
use zsm_core::{Frame, FrameBuffer, PacketError};
use zsm_crypto::{IdentityKeypair, Session, SessionError, SessionEvent, SessionState, UserId};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] PacketError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection closed by peer")]
    ConnectionClosed,
}

impl ClientError {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Session(e) => e.is_fatal(),
            _ => true,
        }
    }
}

/// An authenticated connection to the gatekeeper.
pub struct ClientConnection<S> {
    stream: S,
    session: Session,
    frames: FrameBuffer,
}

/// Connect over TCP and authenticate.
pub async fn connect(
    config: &ClientConfig,
    identity: Arc<IdentityKeypair>,
) -> Result<ClientConnection<TcpStream>, ClientError> {
    let stream = TcpStream::connect(&config.server_addr).await?;
    stream.set_nodelay(true)?;
    info!("connected to {}", config.server_addr);

    ClientConnection::authenticate(stream, identity, config.handshake_timeout()).await
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake on a freshly opened stream.
    ///
    /// Fails closed: if the challenge and verdict do not both arrive within
    /// `timeout`, the session is closed and `HandshakeTimeout` returned.
    pub async fn authenticate(
        stream: S,
        identity: Arc<IdentityKeypair>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut conn = Self {
            stream,
            session: Session::new(identity),
            frames: FrameBuffer::new(),
        };

        match tokio::time::timeout(timeout, conn.handshake()).await {
            Ok(Ok(())) => {
                info!(user = %conn.session.user_id().short(), "authenticated");
                Ok(conn)
            }
            Ok(Err(e)) => {
                conn.session.close();
                Err(e)
            }
            Err(_) => {
                conn.session.close();
                warn!("handshake timed out after {:?}", timeout);
                Err(ClientError::HandshakeTimeout(timeout))
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), ClientError> {
        loop {
            let frame = self.read_frame().await?;
            match self.session.handle_frame(&frame)? {
                SessionEvent::Reply(bytes) => {
                    self.stream.write_all(&bytes).await?;
                    self.stream.flush().await?;
                    debug!("sent challenge response");
                }
                SessionEvent::Authenticated => return Ok(()),
                other => debug!("ignoring {:?} during handshake", other),
            }
        }
    }

    /// Read until one complete frame is buffered.
    ///
    /// Cancel safe: partial frames stay in the buffer.
    async fn read_frame(&mut self) -> Result<Frame, ClientError> {
        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Ok(frame);
            }
            let n = self.stream.read_buf(self.frames.buffer_mut()).await?;
            if n == 0 {
                self.session.close();
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    pub fn user_id(&self) -> UserId {
        self.session.user_id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Encrypt and send `text` to `recipient`, stamped with the current time.
    ///
    /// Returns once the frame is written; there is no delivery receipt.
    pub async fn send_text(&mut self, recipient: &UserId, text: &str) -> Result<(), ClientError> {
        let frame = self
            .session
            .seal_message(recipient, text, chrono::Utc::now().timestamp())?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        debug!(to = %recipient.short(), bytes = text.len(), "sent message");
        Ok(())
    }

    /// Wait for the next inbound event.
    ///
    /// Errors for a single bad packet are returned without closing the
    /// connection; check [`ClientError::is_fatal`]. Cancel safe.
    pub async fn next_event(&mut self) -> Result<SessionEvent, ClientError> {
        let frame = self.read_frame().await?;
        Ok(self.session.handle_frame(&frame)?)
    }

    /// Give back the underlying stream, dropping any buffered bytes.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Close the session and shut down the write half.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        self.session.close();
        self.stream.shutdown().await?;
        Ok(())
    }
}
