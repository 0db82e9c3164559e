//! Flow streams over QUIC bidirectional streams.
//!
//! Each outbox opens one bidi stream on a connection to the consumer node. Producer
//! messages travel on the send half as framed JSON; consumer signals come back on the
//! receive half. Finishing a half is the stream's end-of-stream.
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::BytesMut;
use flow_common::ids::NodeId;
use flow_transport::{QuicClient, QuicConnection};
use flow_wire::{ConsumerSignal, ProducerHeader, ProducerMessage};
use quinn::{RecvStream, SendStream};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{read_frame_limited_into, write_frame};
use crate::{Dialer, FlowStream, FlowStreamReceiver, FlowStreamSender, OutboxConfig, StreamError};

struct QuicFlowSender {
    send: SendStream,
    ctx: CancellationToken,
    // Keeps the connection open for as long as either half lives.
    _connection: QuicConnection,
}

#[async_trait]
impl FlowStreamSender for QuicFlowSender {
    async fn send(&mut self, message: &ProducerMessage) -> Result<(), StreamError> {
        let frame = message.encode().context("encode producer message")?;
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(StreamError::Cancelled),
            res = write_frame(&mut self.send, &frame) => res,
        }
    }

    async fn close_send(&mut self) -> Result<(), StreamError> {
        self.send
            .finish()
            .map_err(|err| StreamError::Transport(anyhow::Error::from(err).context("finish")))
    }
}

struct QuicFlowReceiver {
    recv: RecvStream,
    ctx: CancellationToken,
    max_frame_bytes: usize,
    scratch: BytesMut,
    _connection: QuicConnection,
}

#[async_trait]
impl FlowStreamReceiver for QuicFlowReceiver {
    async fn recv(&mut self) -> Result<ConsumerSignal, StreamError> {
        let read = read_frame_limited_into(&mut self.recv, self.max_frame_bytes, &mut self.scratch);
        let frame = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => return Err(StreamError::Cancelled),
            res = read => res?,
        };
        let frame = frame.ok_or(StreamError::Eof)?;
        Ok(ConsumerSignal::decode(frame).context("decode consumer signal")?)
    }
}

/// Dials consumer nodes over a shared QUIC client endpoint.
#[derive(Debug, Clone)]
pub struct QuicDialer {
    client: QuicClient,
    nodes: HashMap<NodeId, SocketAddr>,
    server_name: String,
    max_frame_bytes: usize,
}

impl QuicDialer {
    pub fn new(client: QuicClient, config: &OutboxConfig) -> Self {
        Self {
            client,
            nodes: HashMap::new(),
            server_name: config.server_name.clone(),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    pub fn register_node(&mut self, node_id: NodeId, addr: SocketAddr) {
        self.nodes.insert(node_id, addr);
    }

    async fn open(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<(QuicConnection, SendStream, RecvStream)> {
        let connection = self
            .client
            .connect_timeout(addr, &self.server_name, timeout)
            .await?;
        let (send, recv) = connection.open_bi().await?;
        Ok((connection, send, recv))
    }
}

#[async_trait]
impl Dialer for QuicDialer {
    async fn dial(
        &self,
        ctx: &CancellationToken,
        node_id: NodeId,
        timeout: Duration,
    ) -> Result<FlowStream> {
        let addr = *self
            .nodes
            .get(&node_id)
            .ok_or_else(|| anyhow!("no address registered for node {node_id}"))?;
        let (connection, send, recv) = tokio::select! {
            _ = ctx.cancelled() => return Err(anyhow!("dial {node_id} cancelled")),
            res = self.open(addr, timeout) => res.with_context(|| format!("dial {node_id} at {addr}"))?,
        };
        debug!(node_id = %node_id, peer = %addr, "flow stream opened");
        Ok(FlowStream::new(
            QuicFlowSender {
                send,
                ctx: ctx.clone(),
                _connection: connection.clone(),
            },
            QuicFlowReceiver {
                recv,
                ctx: ctx.clone(),
                max_frame_bytes: self.max_frame_bytes,
                scratch: BytesMut::new(),
                _connection: connection,
            },
        ))
    }
}

/// Consumer end of a QUIC flow stream, as seen by the node hosting the inbox.
#[derive(Debug)]
pub struct QuicConsumerStream {
    send: SendStream,
    recv: RecvStream,
    max_frame_bytes: usize,
    scratch: BytesMut,
}

impl QuicConsumerStream {
    /// Accept the next flow stream on `connection` and read its header.
    pub async fn accept(
        connection: &QuicConnection,
        max_frame_bytes: usize,
    ) -> Result<(ProducerHeader, Self)> {
        let (send, recv) = connection.accept_bi().await?;
        let mut stream = Self {
            send,
            recv,
            max_frame_bytes,
            scratch: BytesMut::new(),
        };
        match stream.next_message().await? {
            Some(ProducerMessage::Header(header)) => Ok((header, stream)),
            Some(other) => Err(anyhow!("expected header as first message, got {other:?}")),
            None => Err(anyhow!("flow stream ended before header")),
        }
    }

    /// Next producer message, or `None` once the producer half-closed.
    pub async fn next_message(&mut self) -> Result<Option<ProducerMessage>> {
        let frame =
            read_frame_limited_into(&mut self.recv, self.max_frame_bytes, &mut self.scratch)
                .await
                .map_err(anyhow::Error::from)?;
        frame
            .map(|frame| ProducerMessage::decode(frame).context("decode producer message"))
            .transpose()
    }

    pub async fn send_signal(&mut self, signal: &ConsumerSignal) -> Result<()> {
        let frame = signal.encode().context("encode consumer signal")?;
        write_frame(&mut self.send, &frame)
            .await
            .map_err(anyhow::Error::from)
    }

    /// End the consumer side; the producer's watchdog observes end-of-stream.
    pub fn finish(&mut self) -> Result<()> {
        self.send.finish().context("finish consumer stream")
    }
}
