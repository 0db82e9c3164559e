//! In-process flow streams built on tokio channels.
//!
//! Used when producer and consumer share a process, and as the reference stream for
//! outbox tests. Dropping the consumer end looks like end-of-stream to the producer.
use anyhow::anyhow;
use async_trait::async_trait;
use flow_common::ids::NodeId;
use flow_wire::{ConsumerSignal, ProducerMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Dialer, FlowStream, FlowStreamReceiver, FlowStreamSender, StreamError};

type SignalResult = Result<ConsumerSignal, StreamError>;

/// Build a connected producer/consumer pair. `capacity` bounds buffered messages in
/// each direction.
pub fn pair(capacity: usize) -> (FlowStream, InProcessConsumer) {
    pair_with_context(CancellationToken::new(), capacity)
}

/// Like [`pair`], but producer operations fail with [`StreamError::Cancelled`] once
/// `ctx` is cancelled.
pub fn pair_with_context(
    ctx: CancellationToken,
    capacity: usize,
) -> (FlowStream, InProcessConsumer) {
    let (message_tx, message_rx) = mpsc::channel(capacity);
    let (signal_tx, signal_rx) = mpsc::channel(capacity);
    let stream = FlowStream::new(
        InProcessSender {
            tx: Some(message_tx),
            ctx: ctx.clone(),
        },
        InProcessReceiver { rx: signal_rx, ctx },
    );
    let consumer = InProcessConsumer {
        messages: message_rx,
        signals: signal_tx,
    };
    (stream, consumer)
}

struct InProcessSender {
    tx: Option<mpsc::Sender<ProducerMessage>>,
    ctx: CancellationToken,
}

#[async_trait]
impl FlowStreamSender for InProcessSender {
    async fn send(&mut self, message: &ProducerMessage) -> Result<(), StreamError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("send after close_send"))?;
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(StreamError::Cancelled),
            res = tx.send(message.clone()) => res.map_err(|_| StreamError::Eof),
        }
    }

    async fn close_send(&mut self) -> Result<(), StreamError> {
        self.tx.take();
        Ok(())
    }
}

struct InProcessReceiver {
    rx: mpsc::Receiver<SignalResult>,
    ctx: CancellationToken,
}

#[async_trait]
impl FlowStreamReceiver for InProcessReceiver {
    async fn recv(&mut self) -> Result<ConsumerSignal, StreamError> {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(StreamError::Cancelled),
            signal = self.rx.recv() => signal.unwrap_or(Err(StreamError::Eof)),
        }
    }
}

/// Consumer end of an in-process stream.
#[derive(Debug)]
pub struct InProcessConsumer {
    messages: mpsc::Receiver<ProducerMessage>,
    signals: mpsc::Sender<SignalResult>,
}

impl InProcessConsumer {
    /// Next producer message, or `None` once the producer half-closed or went away.
    pub async fn next_message(&mut self) -> Option<ProducerMessage> {
        self.messages.recv().await
    }

    pub async fn send_signal(&self, signal: ConsumerSignal) -> anyhow::Result<()> {
        self.signals
            .send(Ok(signal))
            .await
            .map_err(|_| anyhow!("producer receiver dropped"))
    }

    /// Make the producer's next receive fail with `err`.
    pub async fn fail(&self, err: StreamError) -> anyhow::Result<()> {
        self.signals
            .send(Err(err))
            .await
            .map_err(|_| anyhow!("producer receiver dropped"))
    }

    /// Read until the producer half-closes, then drop the stream.
    pub async fn collect_all(mut self) -> Vec<ProducerMessage> {
        let mut out = Vec::new();
        while let Some(message) = self.next_message().await {
            out.push(message);
        }
        out
    }
}

/// Dialer handing each new stream's consumer end to an [`InProcessListener`].
#[derive(Debug, Clone)]
pub struct InProcessDialer {
    node_id: NodeId,
    accepted: mpsc::Sender<InProcessConsumer>,
    capacity: usize,
}

#[derive(Debug)]
pub struct InProcessListener {
    accepted: mpsc::Receiver<InProcessConsumer>,
}

impl InProcessListener {
    pub async fn accept(&mut self) -> Option<InProcessConsumer> {
        self.accepted.recv().await
    }
}

/// In-process "node" reachable as `node_id`.
pub fn listener(node_id: NodeId, capacity: usize) -> (InProcessDialer, InProcessListener) {
    let (accepted_tx, accepted_rx) = mpsc::channel(16);
    (
        InProcessDialer {
            node_id,
            accepted: accepted_tx,
            capacity,
        },
        InProcessListener {
            accepted: accepted_rx,
        },
    )
}

#[async_trait]
impl Dialer for InProcessDialer {
    async fn dial(
        &self,
        ctx: &CancellationToken,
        node_id: NodeId,
        timeout: Duration,
    ) -> anyhow::Result<FlowStream> {
        if node_id != self.node_id {
            return Err(anyhow!("unknown node {node_id}"));
        }
        let (stream, consumer) = pair_with_context(ctx.clone(), self.capacity);
        tokio::time::timeout(timeout, self.accepted.send(consumer))
            .await
            .map_err(|_| anyhow!("dial {node_id} timed out after {timeout:?}"))?
            .map_err(|_| anyhow!("connection refused by {node_id}"))?;
        Ok(stream)
    }
}
