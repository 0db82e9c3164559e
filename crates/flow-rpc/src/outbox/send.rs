// Send activity: batches until end of input or draining, then trailing metadata.
use anyhow::Context;
use flow_columnar::BatchCodec;
use flow_wire::{ProducerMessage, ProducerMetadata};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Outbox;
use super::cancel::CancelHandles;
use crate::telemetry::t_counter;
use crate::{BatchSource, FlowStreamSender, StreamError};

impl Outbox {
    /// Returns whether the loop ended gracefully, plus any local fault to report to the
    /// consumer. A stream failure yields `(false, None)` after routing the cancel.
    pub(super) async fn send_batches(
        &mut self,
        ctx: &CancellationToken,
        sender: &mut dyn FlowStreamSender,
        cancels: &CancelHandles,
    ) -> (bool, Option<anyhow::Error>) {
        let result = AssertUnwindSafe(self.send_batches_inner(ctx, sender, cancels))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(terminated_gracefully)) => (terminated_gracefully, None),
            Ok(Err(err)) => {
                warn!(error = ?err, "outbox send loop failed");
                (false, Some(err))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                warn!(panic = %message, "outbox send loop panicked");
                (false, Some(anyhow::anyhow!("outbox panicked: {message}")))
            }
        }
    }

    async fn send_batches_inner(
        &mut self,
        ctx: &CancellationToken,
        sender: &mut dyn FlowStreamSender,
        cancels: &CancelHandles,
    ) -> anyhow::Result<bool> {
        self.input.init().context("outbox input init")?;
        loop {
            if self.draining.is_draining() {
                debug!("outbox draining, stopping send loop");
                return Ok(true);
            }
            let batch = self.input.next(ctx).await?;
            if batch.is_empty() {
                debug!("outbox input exhausted");
                return Ok(true);
            }

            self.scratch.clear();
            self.codec
                .encode(&batch, &mut self.scratch)
                .context("outbox serialize data")?;
            let payload = self.scratch.split().freeze();
            let bytes = payload.len() as u64;
            if let Err(err) = sender.send(&ProducerMessage::data(payload)).await {
                cancels.handle_stream_err("send (batches)", &err);
                return Ok(false);
            }
            t_counter!("flow_outbox_batches_sent_total").increment(1);
            t_counter!("flow_outbox_bytes_sent_total").increment(bytes);
        }
    }

    /// Ship the error to report (first) and every source's metadata (in registration
    /// order) as one message. Nothing is sent when there is nothing to report.
    pub(super) async fn send_metadata(
        &mut self,
        ctx: &CancellationToken,
        sender: &mut dyn FlowStreamSender,
        err_to_send: Option<anyhow::Error>,
    ) -> Result<(), StreamError> {
        let mut metadata = Vec::new();
        if let Some(err) = err_to_send {
            metadata.push(ProducerMetadata::from_error(&*err));
        }
        for source in &mut self.metadata_sources {
            metadata.extend(source.drain_metadata(ctx).await);
        }
        if metadata.is_empty() {
            return Ok(());
        }
        sender.send(&ProducerMessage::metadata(metadata)).await
    }
}
