// Shared draining flag and the cancel routing both outbox activities use on stream errors.
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::StreamError;
use crate::telemetry::t_counter;

/// One-way switch into the draining state.
#[derive(Debug, Default)]
pub(crate) struct DrainFlag(AtomicBool);

impl DrainFlag {
    pub(crate) fn is_draining(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns true only for the call that performed the transition.
    pub(crate) fn move_to_draining(&self) -> bool {
        let moved = self
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!("outbox moved to draining");
        }
        moved
    }
}

/// Cancel functions handed to the outbox. A missing handle is a no-op.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelHandles {
    flow: Option<CancellationToken>,
    outbox: Option<CancellationToken>,
}

impl CancelHandles {
    pub(crate) fn new(flow: Option<CancellationToken>, outbox: Option<CancellationToken>) -> Self {
        Self { flow, outbox }
    }

    /// Route a stream failure: end-of-stream (or an already-cancelled scope) tears down
    /// only this outbox's subtree, a broken link takes down the whole flow.
    pub(crate) fn handle_stream_err(&self, op: &'static str, err: &StreamError) {
        t_counter!("flow_outbox_stream_errors_total", "class" => err.class()).increment(1);
        if err.is_stream_local() {
            debug!(op, class = err.class(), "outbox calling outbox cancel after end of stream");
            if let Some(outbox) = &self.outbox {
                outbox.cancel();
            }
        } else {
            warn!(op, error = %err, "outbox calling flow cancel after connection error");
            if let Some(flow) = &self.flow {
                flow.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draining_is_entered_once() {
        let flag = DrainFlag::default();
        assert!(!flag.is_draining());
        assert!(flag.move_to_draining());
        assert!(!flag.move_to_draining());
        assert!(flag.is_draining());
    }

    #[test]
    fn eof_cancels_outbox_only() {
        let flow = CancellationToken::new();
        let outbox = CancellationToken::new();
        let cancels = CancelHandles::new(Some(flow.clone()), Some(outbox.clone()));
        cancels.handle_stream_err("watchdog recv", &StreamError::Eof);
        assert!(outbox.is_cancelled());
        assert!(!flow.is_cancelled());
    }

    #[test]
    fn cancelled_stream_stays_local() {
        let flow = CancellationToken::new();
        let outbox = CancellationToken::new();
        let cancels = CancelHandles::new(Some(flow.clone()), Some(outbox.clone()));
        cancels.handle_stream_err("send (metadata)", &StreamError::Cancelled);
        assert!(outbox.is_cancelled());
        assert!(!flow.is_cancelled());
    }

    #[test]
    fn transport_errors_cancel_flow_only() {
        let flow = CancellationToken::new();
        let outbox = CancellationToken::new();
        let cancels = CancelHandles::new(Some(flow.clone()), Some(outbox.clone()));
        cancels.handle_stream_err(
            "send (batches)",
            &StreamError::Transport(anyhow::anyhow!("connection reset")),
        );
        assert!(flow.is_cancelled());
        assert!(!outbox.is_cancelled());
    }

    #[test]
    fn missing_handles_are_ignored() {
        let cancels = CancelHandles::default();
        cancels.handle_stream_err("close send", &StreamError::Eof);
        cancels.handle_stream_err("close send", &StreamError::Cancelled);
    }
}
