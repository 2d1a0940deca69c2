// Broadcast hub
//
// Multiplexes the single upstream record stream onto every connected
// subscriber with per-client bounded queues and slow-consumer eviction.

pub mod filter;
pub mod sampler;

pub use filter::FieldFilter;
pub use sampler::Sampler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::Result;

/// Capacity of the ingress channel shared by all pollers
pub const INGRESS_CAPACITY: usize = 1024;

/// Capacity of each subscriber's send queue
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Counter for generating unique subscriber IDs
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A connected subscriber as seen by the hub
struct Client {
    id: u64,
    filter: Option<FieldFilter>,
    sampler: Option<Mutex<Sampler>>,
    sender: mpsc::Sender<Vec<u8>>,
}

/// Broadcast hub fanning the record stream out to subscribers.
///
/// Pollers publish serialized records onto a bounded ingress channel; a
/// single dispatcher task offers each record to every subscriber's bounded
/// queue without blocking. A subscriber whose queue is full is evicted.
pub struct Hub {
    clients: RwLock<HashMap<u64, Arc<Client>>>,
    ingress: mpsc::Sender<Vec<u8>>,
}

impl Hub {
    /// Create a hub and the ingress receiver to hand to [`Hub::run`]
    pub fn new() -> (Arc<Hub>, mpsc::Receiver<Vec<u8>>) {
        let (ingress, receiver) = mpsc::channel(INGRESS_CAPACITY);

        let hub = Arc::new(Hub {
            clients: RwLock::new(HashMap::new()),
            ingress,
        });

        (hub, receiver)
    }

    /// Publish a serialized record onto the ingress channel.
    ///
    /// Blocks when the channel is full; this is the back-pressure signal
    /// that slows pollers down when the dispatcher cannot keep up.
    pub async fn publish(&self, msg: Vec<u8>) -> Result<()> {
        self.ingress
            .send(msg)
            .await
            .map_err(|_| StreamError::ChannelClosed {
                context: "hub ingress".to_string(),
            })
    }

    /// Register a subscriber; returns its ID and the receiving end of its
    /// bounded send queue
    pub async fn register(
        &self,
        filter: Option<FieldFilter>,
        sampler: Option<Sampler>,
    ) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE_CAPACITY);

        let client = Arc::new(Client {
            id: CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            filter,
            sampler: sampler.map(Mutex::new),
            sender,
        });
        let id = client.id;

        self.clients.write().await.insert(id, client);

        (id, receiver)
    }

    /// Remove a subscriber.
    ///
    /// Dropping the map entry drops the queue sender, which the write pump
    /// observes as end-of-stream. Safe to call more than once.
    pub async fn remove_client(&self, id: u64) {
        self.clients.write().await.remove(&id);
    }

    /// Number of currently registered subscribers
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether any subscriber currently wants certificate bytes.
    ///
    /// True when a subscriber has no filter, or a filter selecting
    /// `cert_pem` or `cert_fingerprint`. Advisory only: racing with
    /// subscriber churn is acceptable.
    pub async fn needs_cert_data(&self) -> bool {
        let clients = self.clients.read().await;

        clients.values().any(|c| match &c.filter {
            None => true,
            Some(f) => {
                f.should_include(&["cert_pem"]) || f.should_include(&["cert_fingerprint"])
            }
        })
    }

    /// Whether any subscriber's filter explicitly selects the fingerprint
    pub async fn wants_fingerprint(&self) -> bool {
        let clients = self.clients.read().await;

        clients.values().any(|c| {
            c.filter
                .as_ref()
                .is_some_and(|f| f.should_include(&["cert_fingerprint"]))
        })
    }

    /// Take a due sample for a subscriber, if it requested sampling
    pub async fn take_due_sample(&self, id: u64) -> Option<Vec<u8>> {
        let clients = self.clients.read().await;
        let client = clients.get(&id)?;
        let sampler = client.sampler.as_ref()?;

        let mut guard = sampler.lock().ok()?;
        guard.check()
    }

    /// Dispatcher loop: drain the ingress channel and fan each record out.
    ///
    /// Runs until the ingress channel closes or `cancel` fires.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = receiver.recv() => {
                    let Some(msg) = msg else { break };
                    self.dispatch(&msg).await;
                }
            }
        }

        debug!("hub dispatcher stopped");
    }

    /// Offer one record to every subscriber, evicting the slow ones
    async fn dispatch(&self, msg: &[u8]) {
        let mut evicted = Vec::new();

        {
            let clients = self.clients.read().await;

            for (id, client) in clients.iter() {
                let wire = match &client.filter {
                    Some(f) => match filter::project(msg, f) {
                        Ok(mut projected) => {
                            projected.push(b'\n');
                            projected
                        }
                        Err(e) => {
                            // Skip this message for this subscriber only.
                            warn!(client = id, error = %e, "projection failed, skipping message");
                            continue;
                        }
                    },
                    None => msg.to_vec(),
                };

                let outgoing = match &client.sampler {
                    Some(sampler) => {
                        let flushed = sampler.lock().ok().and_then(|mut s| s.add(wire));
                        let Some(flushed) = flushed else { continue };
                        flushed
                    }
                    None => wire,
                };

                match client.sender.try_send(outgoing) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        // Expected under load; eviction, not an error.
                        debug!(client = id, "send queue full, evicting slow subscriber");
                        evicted.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        evicted.push(*id);
                    }
                }
            }
        }

        for id in evicted {
            self.remove_client(id).await;
        }
    }
}
