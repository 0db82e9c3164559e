// Stream halves and dialing abstraction the outbox drives.
use async_trait::async_trait;
use flow_common::ids::{FlowId, NodeId, StreamId};
use flow_wire::{ConsumerSignal, ProducerMessage};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::StreamError;

/// Producer-to-consumer half. Only the outbox send loop touches it.
#[async_trait]
pub trait FlowStreamSender: Send {
    async fn send(&mut self, message: &ProducerMessage) -> Result<(), StreamError>;

    /// Half-close: the consumer sees end-of-stream after the last message.
    async fn close_send(&mut self) -> Result<(), StreamError>;
}

/// Consumer-to-producer half. Only the watchdog touches it.
#[async_trait]
pub trait FlowStreamReceiver: Send {
    async fn recv(&mut self) -> Result<ConsumerSignal, StreamError>;
}

/// An open bidirectional flow stream, already bound to the cancellation scope it was
/// dialed under.
pub struct FlowStream {
    pub sender: Box<dyn FlowStreamSender>,
    pub receiver: Box<dyn FlowStreamReceiver>,
}

impl FlowStream {
    pub fn new(
        sender: impl FlowStreamSender + 'static,
        receiver: impl FlowStreamReceiver + 'static,
    ) -> Self {
        Self {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
        }
    }
}

impl std::fmt::Debug for FlowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowStream").finish_non_exhaustive()
    }
}

/// Everything the outbox needs to find its consumer and introduce itself.
#[derive(Debug, Clone)]
pub struct DialParams {
    pub node_id: NodeId,
    pub flow_id: FlowId,
    pub stream_id: StreamId,
    pub connection_timeout: Duration,
}

/// Opens flow streams to consumer nodes.
///
/// Stream operations on the returned halves fail with [`StreamError::Cancelled`] once
/// `ctx` is cancelled.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        ctx: &CancellationToken,
        node_id: NodeId,
        timeout: Duration,
    ) -> anyhow::Result<FlowStream>;
}
