use std::{collections::BTreeMap, sync::Arc};

#[cfg(feature = "metrics")]
use {crate::metric_names, metrics::counter};
use {
    relaybot_channels::{Backend, InboundReceiver, MessageEnvelope},
    relaybot_routing::RoutingTable,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, warn},
};

/// Backends addressable as write destinations, by name.
pub(crate) type Destinations = BTreeMap<String, Arc<dyn Backend>>;

/// Drain one backend's inbound queue, forwarding each envelope along every
/// matching edge. Stops when the queue closes or `cancel` fires.
pub(crate) async fn route_messages(
    backend: String,
    mut inbound: InboundReceiver,
    table: RoutingTable,
    destinations: Arc<Destinations>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            msg = inbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = cancel.cancelled() => {
                inbound.close();
                let mut dropped = 0usize;
                while inbound.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    debug!(backend = %backend, dropped, "discarded queued messages on shutdown");
                }
                break;
            }
        };

        #[cfg(feature = "metrics")]
        counter!(metric_names::MESSAGES_RECEIVED_TOTAL, "backend" => backend.clone()).increment(1);

        route_one(&msg, &table, &destinations).await;
    }
    debug!(backend = %backend, "routing task stopped");
}

/// Write `msg` to the destination of every edge leaving its source.
/// Returns the number of successful writes.
pub(crate) async fn route_one(
    msg: &MessageEnvelope,
    table: &RoutingTable,
    destinations: &Destinations,
) -> usize {
    let edges = table.edges_from(&msg.source);
    if edges.is_empty() {
        debug!(source = %msg.source, "no route for message");
        return 0;
    }

    let mut delivered = 0;
    for edge in edges {
        let Some(destination) = destinations.get(&edge.to.backend) else {
            warn!(route = %edge, "route points at a backend that is not running");
            continue;
        };

        let outbound = msg.routed_to(edge.to.clone());
        debug!(route = %edge, text = %outbound.render(), "writing message");
        match destination.write(&outbound).await {
            Ok(()) => {
                delivered += 1;
                #[cfg(feature = "metrics")]
                counter!(metric_names::MESSAGES_DELIVERED_TOTAL, "backend" => edge.to.backend.clone())
                    .increment(1);
            },
            Err(e) => {
                error!(
                    backend = %edge.to.backend,
                    room = %edge.to.room,
                    error = %e,
                    "failed to write message"
                );
                #[cfg(feature = "metrics")]
                counter!(metric_names::WRITE_ERRORS_TOTAL, "backend" => edge.to.backend.clone())
                    .increment(1);
            },
        }
    }
    delivered
}
