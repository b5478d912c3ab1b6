use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::{Bus, BusError, BusMessage, Inbound, RedeliveryFilter, decode_inbound};

struct Subscriber {
    topics: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
    resends: RedeliveryFilter,
}

#[derive(Default)]
struct Shared {
    subscribers: Mutex<Vec<Subscriber>>,
    closed: AtomicBool,
    next_pkid: AtomicU16,
}

/// In-process topic fan-out. Payloads go through the same JSON encoding as the
/// network transport, so both ends see exactly what a broker would deliver.
#[derive(Clone, Default)]
pub struct LocalBus {
    shared: Arc<Shared>,
    /// Resend every message with the dup flag, as an at-least-once broker may.
    redeliver: bool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that resends every publish once, under the same packet id.
    pub fn with_redelivery() -> Self {
        Self { redeliver: true, ..Self::default() }
    }

    /// Register a subscriber for `topics`; returns its inbound queue.
    pub fn subscribe(&self, topics: &[&str], buffer: usize) -> Inbound {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.lock().push(Subscriber {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            tx,
            resends: RedeliveryFilter::new(),
        });
        rx
    }

    /// Deliver a raw payload as if it arrived from a broker.
    pub async fn publish_raw(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let pkid = self.next_pkid();
        let deliveries: &[bool] = if self.redeliver { &[false, true] } else { &[false] };
        for &dup in deliveries {
            let targets: Vec<mpsc::Sender<BusMessage>> = self
                .lock()
                .iter_mut()
                .filter_map(|s| {
                    let wanted = s.topics.iter().any(|t| t == topic) && !s.resends.is_redelivery(pkid, dup);
                    wanted.then(|| s.tx.clone())
                })
                .collect();
            for tx in targets {
                let Some(msg) = decode_inbound(topic, payload) else {
                    return Ok(());
                };
                if tx.send(msg).await.is_err() {
                    tracing::debug!(topic, "local subscriber gone");
                }
            }
        }
        Ok(())
    }

    /// Packet ids cycle through 1..=65535; 0 is reserved for QoS 0.
    fn next_pkid(&self) -> u16 {
        self.shared.next_pkid.fetch_add(1, Ordering::Relaxed) % u16::MAX + 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.shared.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Bus for LocalBus {
    async fn publish(&self, msg: &BusMessage) -> Result<(), BusError> {
        self.publish_raw(msg.topic(), &msg.encode()).await
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.shared.closed.store(true, Ordering::Release);
        self.lock().clear();
        Ok(())
    }
}
