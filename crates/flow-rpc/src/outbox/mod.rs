//! Producer end of a flow stream.
//!
//! The outbox dials the consumer node, sends a header, then runs two activities over
//! the stream:
//! - the send loop pulls batches from its input, serializes them, and sends them; once
//!   the input is exhausted (or the consumer asked it to drain) it sends the trailing
//!   metadata and half-closes;
//! - the watchdog receives consumer signals until the stream ends, flipping the outbox
//!   into draining when asked to.
//!
//! Stream errors are routed by kind: end-of-stream cancels only the outbox's own
//! context, anything else cancels the flow.
mod cancel;
mod send;
mod watchdog;


use anyhow::Context;
use bytes::BytesMut;
use flow_columnar::{ColumnType, ColumnarCodec};
use flow_wire::ProducerMessage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info_span, warn};

use crate::{BatchSource, Closers, Deselector, DialParams, Dialer, FlowStream, MetadataSource};
use cancel::{CancelHandles, DrainFlag};
use watchdog::run_watchdog_loop;

/// Sends one producer's batches to a remote consumer.
///
/// ```no_run
/// use flow_rpc::{Closers, DialParams, Outbox};
/// use flow_rpc::inprocess;
/// use flow_common::ids::{FlowId, NodeId, StreamId};
/// use flow_columnar::{Batch, ColumnType};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// struct Exhausted;
///
/// #[async_trait::async_trait]
/// impl flow_rpc::BatchSource for Exhausted {
///     async fn next(&mut self, _ctx: &CancellationToken) -> anyhow::Result<Batch> {
///         Ok(Batch::empty())
///     }
/// }
///
/// async fn run(flow_ctx: CancellationToken) {
///     let (dialer, _listener) = inprocess::listener(NodeId(2), 16);
///     let outbox = Outbox::new(Box::new(Exhausted), vec![ColumnType::Int64], Vec::new(), Closers::new());
///     let params = DialParams {
///         node_id: NodeId(2),
///         flow_id: FlowId::new(),
///         stream_id: StreamId(1),
///         connection_timeout: Duration::from_secs(10),
///     };
///     outbox.run(&flow_ctx, &dialer, params, Some(flow_ctx.clone())).await;
/// }
/// ```
pub struct Outbox {
    input: Deselector<Box<dyn BatchSource>>,
    codec: ColumnarCodec,
    draining: Arc<DrainFlag>,
    metadata_sources: Vec<Box<dyn MetadataSource>>,
    closers: Closers,
    scratch: BytesMut,
}

impl Outbox {
    /// `types` is the schema every input batch must match.
    pub fn new(
        input: Box<dyn BatchSource>,
        types: Vec<ColumnType>,
        metadata_sources: Vec<Box<dyn MetadataSource>>,
        closers: Closers,
    ) -> Self {
        Self {
            input: Deselector::new(input),
            codec: ColumnarCodec::new(types),
            draining: Arc::new(DrainFlag::default()),
            metadata_sources,
            closers,
            scratch: BytesMut::new(),
        }
    }

    /// Dial, send the header, and drive the stream to completion.
    ///
    /// Never returns an error: setup failures are logged and the closers released; the
    /// consumer side is expected to notice the missing stream. `flow_cancel` should
    /// cancel `ctx` (or one of its ancestors) so a flow-wide cancel also unblocks this
    /// outbox.
    pub async fn run(
        mut self,
        ctx: &CancellationToken,
        dialer: &dyn Dialer,
        params: DialParams,
        flow_cancel: Option<CancellationToken>,
    ) {
        let span = info_span!(
            "outbox",
            flow_id = %params.flow_id,
            stream_id = %params.stream_id,
            node_id = %params.node_id,
        );
        self.run_in_span(ctx, dialer, params, flow_cancel)
            .instrument(span)
            .await;
    }

    async fn run_in_span(
        &mut self,
        ctx: &CancellationToken,
        dialer: &dyn Dialer,
        params: DialParams,
        flow_cancel: Option<CancellationToken>,
    ) {
        let outbox_ctx = ctx.child_token();
        let _cancel_on_exit = outbox_ctx.clone().drop_guard();

        let stream = match connect(&outbox_ctx, dialer, &params).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = ?err, "outbox setup failed, distributed query will fail");
                self.closers.close_and_log_on_err(&outbox_ctx, "outbox").await;
                return;
            }
        };
        debug!("outbox starting normal operation");
        self.run_with_stream(&outbox_ctx, stream, flow_cancel, Some(outbox_ctx.clone()))
            .await;
        debug!("outbox exiting");
    }

    /// Drive an already-open stream whose header has been sent.
    ///
    /// Returns only after the watchdog has exited and the closers have been released.
    pub async fn run_with_stream(
        &mut self,
        ctx: &CancellationToken,
        stream: FlowStream,
        flow_cancel: Option<CancellationToken>,
        outbox_cancel: Option<CancellationToken>,
    ) {
        let cancels = CancelHandles::new(flow_cancel, outbox_cancel);
        let FlowStream {
            mut sender,
            receiver,
        } = stream;

        let watchdog = tokio::spawn(
            run_watchdog_loop(receiver, Arc::clone(&self.draining), cancels.clone())
                .instrument(Span::current()),
        );

        let (terminated_gracefully, err_to_send) =
            self.send_batches(ctx, sender.as_mut(), &cancels).await;
        if terminated_gracefully || err_to_send.is_some() {
            // The stream is still usable: tell the consumer why we stopped, then half-close.
            self.draining.move_to_draining();
            match self.send_metadata(ctx, sender.as_mut(), err_to_send).await {
                Err(err) => cancels.handle_stream_err("send (metadata)", &err),
                Ok(()) => {
                    if let Err(err) = sender.close_send().await {
                        cancels.handle_stream_err("close send", &err);
                    }
                }
            }
        }

        self.closers.close_and_log_on_err(ctx, "outbox").await;
        if let Err(err) = watchdog.await {
            warn!(error = %err, "outbox watchdog task failed");
        }
        drop(sender);
    }

    #[cfg(test)]
    pub(crate) fn drain_flag(&self) -> Arc<DrainFlag> {
        Arc::clone(&self.draining)
    }
}

async fn connect(
    ctx: &CancellationToken,
    dialer: &dyn Dialer,
    params: &DialParams,
) -> anyhow::Result<FlowStream> {
    debug!("outbox dialing");
    let mut stream = dialer
        .dial(ctx, params.node_id, params.connection_timeout)
        .await
        .context("outbox dial")?;
    debug!("outbox sending header");
    stream
        .sender
        .send(&ProducerMessage::header(params.flow_id, params.stream_id))
        .await
        .context("outbox send header")?;
    Ok(stream)
}
