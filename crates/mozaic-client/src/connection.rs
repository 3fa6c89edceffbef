//! Framed stream connection with a handshake.
//!
//! A [`Connection`] owns one byte stream and runs two tasks on it:
//! - a reader that defragments frames and drives the state machine
//! - a writer that writes queued frames in call order
//!
//! Lifecycle signals and received frame bodies are delivered, in receive
//! order, on the channel returned by [`Connection::connect`].

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use mozaic_proto::{
    codec::{FrameDecoder, encode_frame},
    constants::{RX_BUFFER_CAPACITY, RX_READ_RESERVE},
    handshake::HandshakeReply,
};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, error, info, trace};

use crate::error::ClientError;

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ConnectionState {
    /// No stream attached yet.
    Disconnected,
    /// Handshake sent, waiting for the acknowledgement.
    Connecting,
    /// Handshake acknowledged; frames carry application events.
    Connected,
    /// Terminal. A new `Connection` is needed to reconnect.
    Closed,
}

/// Signals emitted by a running connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The peer accepted the handshake.
    Connected,
    /// A frame body received while connected.
    Message(Bytes),
    /// The connection reached `Closed`. Always the last event.
    Disconnected { reason: String },
}

enum Command {
    Write(Bytes),
    Shutdown,
}

/// One physical stream connection.
///
/// Dropping the connection closes it.
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    event_tx: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl Inner {
    fn emit(&self, event: ConnectionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

impl Shared {
    /// Feed one complete frame body into the state machine.
    fn on_frame(&self, body: Bytes) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        match inner.state {
            ConnectionState::Connecting => match HandshakeReply::decode(&body)? {
                HandshakeReply::Accepted => {
                    inner.state = ConnectionState::Connected;
                    info!("handshake accepted");
                    inner.emit(ConnectionEvent::Connected);
                    Ok(())
                }
                HandshakeReply::Refused { reason } => Err(ClientError::HandshakeRefused(reason)),
            },
            ConnectionState::Connected => {
                trace!(len = body.len(), "frame received");
                inner.emit(ConnectionEvent::Message(body));
                Ok(())
            }
            state => Err(ClientError::UnexpectedData(state)),
        }
    }

    fn on_bytes(&self, decoder: &mut FrameDecoder) -> Result<(), ClientError> {
        while let Some(frame) = decoder.next_frame()? {
            self.on_frame(frame)?;
        }
        Ok(())
    }

    /// Transition to `Closed`. Only the first call has any effect.
    fn close(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return false;
        }
        let previous = inner.state;
        inner.state = ConnectionState::Closed;

        if let Some(cmd_tx) = inner.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Shutdown);
        }
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }

        let reason = reason.into();
        info!(%previous, %reason, "connection closed");
        if let Some(event_tx) = inner.event_tx.take() {
            let _ = event_tx.send(ConnectionEvent::Disconnected { reason });
        }
        true
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    cmd_tx: None,
                    event_tx: None,
                    reader: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Attach `stream`, send the handshake frame and start the I/O tasks.
    ///
    /// Only valid while `Disconnected`. Must be called inside a tokio runtime.
    pub fn connect<S>(
        &self,
        stream: S,
        handshake: &[u8],
    ) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state != ConnectionState::Disconnected {
            return Err(ClientError::InvalidState(inner.state));
        }
        let frame = encode_frame(handshake)?;

        let (read_half, write_half) = tokio::io::split(stream);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        inner.state = ConnectionState::Connecting;
        let _ = cmd_tx.send(Command::Write(Bytes::from(frame)));
        inner.cmd_tx = Some(cmd_tx);
        inner.event_tx = Some(event_tx);

        tokio::spawn(writer_loop(
            write_half,
            cmd_rx,
            Arc::downgrade(&self.shared),
        ));
        inner.reader = Some(tokio::spawn(reader_loop(
            read_half,
            Arc::downgrade(&self.shared),
        )));

        debug!(len = handshake.len(), "handshake queued");
        Ok(event_rx)
    }

    /// Open a TCP stream to `addr` and [`connect`](Self::connect) over it.
    pub async fn connect_tcp(
        &self,
        addr: SocketAddr,
        handshake: &[u8],
    ) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>, ClientError> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(ClientError::InvalidState(state));
        }

        info!(%addr, "connecting to match server");
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            ClientError::ConnectionFailed(format!("failed to connect to {addr}: {e}"))
        })?;
        let _ = stream.set_nodelay(true);

        self.connect(stream, handshake)
    }

    /// Frame `body` and queue it for writing.
    ///
    /// Fails with `NotConnected` unless the handshake has completed.
    pub fn send(&self, body: &[u8]) -> Result<(), ClientError> {
        let inner = self.shared.inner.lock();
        if inner.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let frame = encode_frame(body)?;
        let cmd_tx = inner.cmd_tx.as_ref().ok_or(ClientError::NotConnected)?;
        cmd_tx
            .send(Command::Write(Bytes::from(frame)))
            .map_err(|_| ClientError::NotConnected)?;
        trace!(len = body.len(), "frame queued");
        Ok(())
    }

    /// Close the connection. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.close("closed locally")
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close("connection dropped");
    }
}

/// Writer task: writes queued frames until shutdown.
async fn writer_loop<W: AsyncWrite + Unpin>(
    mut write: W,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Weak<Shared>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Write(frame) => {
                trace!(len = frame.len(), "writing frame");
                let result = async {
                    write.write_all(&frame).await?;
                    write.flush().await
                }
                .await;
                if let Err(e) = result {
                    error!("Write error: {}", e);
                    if let Some(shared) = shared.upgrade() {
                        shared.close(format!("write error: {e}"));
                    }
                    break;
                }
            }
            Command::Shutdown => {
                debug!("Shutdown command received");
                break;
            }
        }
    }

    let _ = write.shutdown().await;
}

/// Reader task: reads from the stream and feeds frames to the state machine.
async fn reader_loop<R: AsyncRead + Unpin>(mut read: R, shared: Weak<Shared>) {
    let mut decoder = FrameDecoder::new(RX_BUFFER_CAPACITY);

    loop {
        decoder.buf_mut().reserve(RX_READ_RESERVE);
        let result = read.read_buf(decoder.buf_mut()).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };

        match result {
            Ok(0) => {
                info!("Peer closed connection");
                shared.close("peer closed connection");
                return;
            }
            Ok(n) => {
                trace!("Received {} bytes", n);
                if let Err(e) = shared.on_bytes(&mut decoder) {
                    error!("Protocol error: {}", e);
                    shared.close(e.to_string());
                    return;
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                shared.close(format!("read error: {e}"));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    use super::*;

    async fn read_frame(stream: &mut DuplexStream, decoder: &mut FrameDecoder) -> Bytes {
        loop {
            if let Some(frame) = decoder.next_frame().unwrap() {
                return frame;
            }
            let n = timeout(Duration::from_secs(2), stream.read_buf(decoder.buf_mut()))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "stream closed before a full frame arrived");
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn write_reply(peer: &mut DuplexStream, reply: HandshakeReply) {
        let frame = encode_frame(&reply.encode().unwrap()).unwrap();
        peer.write_all(&frame).await.unwrap();
    }

    /// A connection that completed its handshake with `peer`.
    async fn connected() -> (
        Connection,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        DuplexStream,
    ) {
        let (local, mut peer) = tokio::io::duplex(4096);
        let conn = Connection::new();
        let mut events = conn.connect(local, b"hello").unwrap();

        let mut decoder = FrameDecoder::new(64);
        assert_eq!(&read_frame(&mut peer, &mut decoder).await[..], b"hello");
        write_reply(&mut peer, HandshakeReply::Accepted).await;
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        (conn, events, peer)
    }

    #[tokio::test]
    async fn handshake_reaches_connected() {
        let (conn, _events, _peer) = connected().await;
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn send_fails_until_handshake_completes() {
        let conn = Connection::new();
        assert!(matches!(conn.send(b"x"), Err(ClientError::NotConnected)));

        let (local, _peer) = tokio::io::duplex(64);
        let _events = conn.connect(local, b"hi").unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(matches!(conn.send(b"x"), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_is_only_valid_from_disconnected() {
        let conn = Connection::new();
        let (a, _peer_a) = tokio::io::duplex(64);
        let (b, _peer_b) = tokio::io::duplex(64);
        let _events = conn.connect(a, b"").unwrap();
        assert!(matches!(
            conn.connect(b, b""),
            Err(ClientError::InvalidState(ConnectionState::Connecting))
        ));

        conn.close();
        let (c, _peer_c) = tokio::io::duplex(64);
        assert!(matches!(
            conn.connect(c, b""),
            Err(ClientError::InvalidState(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn refused_handshake_closes() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let conn = Connection::new();
        let mut events = conn.connect(local, b"token").unwrap();

        write_reply(
            &mut peer,
            HandshakeReply::Refused {
                reason: "unknown client".to_string(),
            },
        )
        .await;

        match next_event(&mut events).await {
            ConnectionEvent::Disconnected { reason } => {
                assert!(reason.contains("unknown client"), "{reason}")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn malformed_acknowledgement_closes() {
        let (local, mut peer) = tokio::io::duplex(4096);
        let conn = Connection::new();
        let mut events = conn.connect(local, b"token").unwrap();

        peer.write_all(&encode_frame(&[0xEE, 0xEE]).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { .. }
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn frames_are_delivered_in_order_across_reads() {
        let (_conn, mut events, mut peer) = connected().await;

        let mut bytes = encode_frame(b"one").unwrap();
        bytes.extend(encode_frame(b"two").unwrap());
        let three = encode_frame(b"three").unwrap();
        bytes.extend_from_slice(&three[..2]);

        peer.write_all(&bytes).await.unwrap();
        peer.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.write_all(&three[2..]).await.unwrap();

        for expected in [&b"one"[..], &b"two"[..], &b"three"[..]] {
            assert_eq!(
                next_event(&mut events).await,
                ConnectionEvent::Message(Bytes::copy_from_slice(expected))
            );
        }
    }

    #[tokio::test]
    async fn send_writes_one_frame_per_call() {
        let (conn, _events, mut peer) = connected().await;
        conn.send(b"first").unwrap();
        conn.send(b"").unwrap();
        conn.send(b"second").unwrap();

        let mut decoder = FrameDecoder::new(64);
        assert_eq!(&read_frame(&mut peer, &mut decoder).await[..], b"first");
        assert_eq!(&read_frame(&mut peer, &mut decoder).await[..], b"");
        assert_eq!(&read_frame(&mut peer, &mut decoder).await[..], b"second");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_signals_once() {
        let (conn, mut events, _peer) = connected().await;

        assert!(conn.close());
        assert!(!conn.close());
        assert!(!conn.close());

        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { .. }
        ));
        let end = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert!(end.is_none());

        assert!(matches!(conn.send(b"late"), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn close_before_connect_is_allowed() {
        let conn = Connection::new();
        assert!(conn.close());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.close());
    }

    #[tokio::test]
    async fn peer_hangup_closes() {
        let (conn, mut events, peer) = connected().await;
        drop(peer);

        match next_event(&mut events).await {
            ConnectionEvent::Disconnected { reason } => {
                assert_eq!(reason, "peer closed connection")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.close());
    }

    #[tokio::test]
    async fn corrupt_length_prefix_closes() {
        let (conn, mut events, mut peer) = connected().await;
        peer.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01])
            .await
            .unwrap();

        match next_event(&mut events).await {
            ConnectionEvent::Disconnected { reason } => {
                assert!(reason.contains("corrupt"), "{reason}")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn data_outside_a_session_is_a_protocol_error() {
        let conn = Connection::new();
        let err = conn.shared.on_frame(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedData(ConnectionState::Disconnected)
        ));
        assert!(err.is_protocol());

        conn.close();
        assert!(matches!(
            conn.shared.on_frame(Bytes::from_static(b"x")),
            Err(ClientError::UnexpectedData(ConnectionState::Closed))
        ));
    }
}
