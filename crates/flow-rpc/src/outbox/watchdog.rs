// Receive loop that runs beside the send loop for the whole life of the stream.
use flow_wire::ConsumerSignal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cancel::{CancelHandles, DrainFlag};
use crate::FlowStreamReceiver;
use crate::telemetry::t_counter;

// Returns only once a receive fails.
pub(crate) async fn run_watchdog_loop(
    mut receiver: Box<dyn FlowStreamReceiver>,
    draining: Arc<DrainFlag>,
    cancels: CancelHandles,
) {
    loop {
        match receiver.recv().await {
            Ok(ConsumerSignal::Handshake(handshake)) => {
                if handshake.is_compatible() {
                    debug!(
                        consumer_scheduled = handshake.consumer_scheduled,
                        version = handshake.version,
                        "outbox received handshake"
                    );
                } else {
                    warn!(
                        version = handshake.version,
                        min_accepted_version = handshake.min_accepted_version,
                        "outbox received handshake from incompatible consumer"
                    );
                }
            }
            Ok(ConsumerSignal::DrainRequest) => {
                t_counter!("flow_outbox_drain_requests_total").increment(1);
                draining.move_to_draining();
            }
            Err(err) => {
                cancels.handle_stream_err("watchdog recv", &err);
                break;
            }
        }
    }
    debug!("outbox watchdog exiting");
}
