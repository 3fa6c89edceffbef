//! Mock match server used by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use mozaic_proto::{
    EventRegistry, Payload, TypedEvent, WireEvent,
    codec::{FrameCodec, encode_frame},
    events::standard_registry,
    handshake::HandshakeReply,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_util::codec::Framed;

pub const STEP: Duration = Duration::from_secs(2);

pub fn registry() -> Arc<EventRegistry> {
    Arc::new(standard_registry().expect("standard registry"))
}

pub async fn listen() -> anyhow::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// Server side of one client connection.
pub struct TestPeer {
    frames: Framed<TcpStream, FrameCodec>,
}

impl TestPeer {
    pub async fn accept(listener: &TcpListener) -> anyhow::Result<Self> {
        let (stream, _) = timeout(STEP, listener.accept()).await??;
        Ok(Self {
            frames: Framed::new(stream, FrameCodec),
        })
    }

    /// Next frame body, or `None` once the client hung up.
    pub async fn recv(&mut self) -> anyhow::Result<Option<Bytes>> {
        match timeout(STEP, self.frames.next()).await? {
            Some(frame) => Ok(Some(frame?)),
            None => Ok(None),
        }
    }

    pub async fn recv_event(&mut self) -> anyhow::Result<WireEvent> {
        let body = self
            .recv()
            .await?
            .ok_or_else(|| anyhow::anyhow!("client hung up"))?;
        Ok(WireEvent::decode(body)?)
    }

    /// Read the handshake frame and accept it.
    pub async fn accept_handshake(&mut self) -> anyhow::Result<Bytes> {
        let handshake = self
            .recv()
            .await?
            .ok_or_else(|| anyhow::anyhow!("no handshake"))?;
        self.send_raw(&HandshakeReply::Accepted.encode()?).await?;
        Ok(handshake)
    }

    pub async fn send_raw(&mut self, body: &[u8]) -> anyhow::Result<()> {
        let stream = self.frames.get_mut();
        stream.write_all(&encode_frame(body)?).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn send_event<T: Payload>(&mut self, event: &TypedEvent<T>) -> anyhow::Result<()> {
        self.send_wire(&event.to_wire()?).await
    }

    pub async fn send_wire(&mut self, event: &WireEvent) -> anyhow::Result<()> {
        self.send_raw(&event.encode()).await
    }
}
