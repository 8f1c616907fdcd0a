//! Update propagator
//!
//! Mutations hand events to a bounded queue right after their store write
//! and return. A single worker drains the queue and publishes with bounded
//! concurrency. Delivery is at most once: a full queue or a failed publish
//! lands in the dead-letter log and is not retried.

use super::bus::{DnsEntry, Event, MessageBus, RemovedPeer};
use netmesh_common::ExtClient;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Log target for events that were never delivered
pub const DEAD_LETTER_TARGET: &str = "netmesh::dead_letter";

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time propagation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropagationStats {
    pub submitted: u64,
    pub published: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Clone)]
pub struct Propagator {
    tx: mpsc::Sender<Event>,
    counters: Arc<Counters>,
}

impl Propagator {
    /// Start the worker. Must be called inside a tokio runtime.
    ///
    /// The worker exits once every `Propagator` clone is dropped and all
    /// in-flight publishes have finished.
    pub fn spawn(bus: Arc<dyn MessageBus>, queue_capacity: usize, max_in_flight: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run(rx, bus, max_in_flight.max(1), counters.clone()));
        (Self { tx, counters }, handle)
    }

    /// Queue one event without waiting
    pub fn submit(&self, event: Event) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.tx.try_send(event) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(ev) => ("queue full", ev),
                mpsc::error::TrySendError::Closed(ev) => ("propagator stopped", ev),
            };
            error!(
                target: DEAD_LETTER_TARGET,
                topic = %event.topic(),
                reason,
                "dropped {}",
                event.describe()
            );
        }
    }

    pub fn on_create(&self, client: &ExtClient) {
        self.submit(peer_update(client, None));
        self.submit(Event::DnsCreate {
            entry: DnsEntry::from(client),
        });
    }

    pub fn on_delete(&self, client: &ExtClient) {
        self.submit(peer_update(client, Some(RemovedPeer::from(client))));
        self.submit(Event::DnsDelete {
            entry: DnsEntry::from(client),
        });
    }

    /// `peer_affecting` comes from the ACL engine. A rename always emits one
    /// DNS replace event.
    pub fn on_update(&self, old: &ExtClient, new: &ExtClient, peer_affecting: bool) {
        if peer_affecting {
            self.submit(peer_update(new, None));
        }
        if old.client_id != new.client_id {
            self.submit(Event::DnsReplace {
                old: DnsEntry::from(old),
                new: DnsEntry::from(new),
            });
        }
    }

    pub fn stats(&self) -> PropagationStats {
        self.counters.snapshot()
    }
}

impl Counters {
    fn snapshot(&self) -> PropagationStats {
        PropagationStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn peer_update(client: &ExtClient, removed: Option<RemovedPeer>) -> Event {
    Event::PeerUpdate {
        network: client.network.clone(),
        gateway_id: client.ingress_gateway_id.clone(),
        removed,
    }
}

async fn run(
    mut rx: mpsc::Receiver<Event>,
    bus: Arc<dyn MessageBus>,
    max_in_flight: usize,
    counters: Arc<Counters>,
) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    debug!("Propagator started on {} bus (max in flight {})", bus.name(), max_in_flight);

    while let Some(event) = rx.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let bus = bus.clone();
        let counters = counters.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match bus.publish(&event).await {
                Ok(()) => {
                    counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        target: DEAD_LETTER_TARGET,
                        topic = %event.topic(),
                        error = %e,
                        "failed to publish {}",
                        event.describe()
                    );
                }
            }
        });
    }

    // Wait for in-flight publishes
    let _ = permits.acquire_many(max_in_flight as u32).await;
    debug!("Propagator stopped");
}
