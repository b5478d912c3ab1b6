//! Survey message bus: wire payloads plus the transports that carry them.
//!
//! Each process owns exactly one inbound queue (`mpsc::Receiver<BusMessage>`),
//! filled by its transport and drained by a single loop.

pub mod local;
pub mod message;
pub mod mqtt;

use std::collections::VecDeque;

use tokio::sync::mpsc;

pub use local::LocalBus;
pub use message::{BusMessage, WireError};
pub use mqtt::MqttBus;

/// Inbound queue receiver; the process loop consumes from here.
pub type Inbound = mpsc::Receiver<BusMessage>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connect failed: {0}")]
    Connect(String),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: &'static str, reason: String },
    #[error("bus disconnect failed: {0}")]
    Disconnect(String),
    #[error("bus closed")]
    Closed,
}

/// Outbound side of a transport.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, msg: &BusMessage) -> Result<(), BusError>;

    /// Disconnect from the transport. Later publishes fail with `BusError::Closed`.
    async fn disconnect(&self) -> Result<(), BusError>;
}

/// Packet ids remembered per subscriber.
const REDELIVERY_WINDOW: usize = 64;

/// Drops QoS 1 resends: a delivery flagged `dup` whose packet id was already
/// delivered. Messages are told apart by packet identity only, never by content.
#[derive(Debug, Default)]
pub struct RedeliveryFilter {
    recent: VecDeque<u16>,
}

impl RedeliveryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this delivery repeats one already passed on.
    pub fn is_redelivery(&mut self, pkid: u16, dup: bool) -> bool {
        // QoS 0 carries no packet id.
        if pkid == 0 {
            return false;
        }
        if dup && self.recent.contains(&pkid) {
            return true;
        }
        self.recent.retain(|&p| p != pkid);
        self.recent.push_back(pkid);
        if self.recent.len() > REDELIVERY_WINDOW {
            self.recent.pop_front();
        }
        false
    }
}

/// Decode a raw delivery; malformed payloads are logged and dropped.
pub fn decode_inbound(topic: &str, payload: &[u8]) -> Option<BusMessage> {
    match BusMessage::decode(topic, payload) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!(topic, error = %e, bytes = payload.len(), "dropping undecodable message");
            None
        }
    }
}
