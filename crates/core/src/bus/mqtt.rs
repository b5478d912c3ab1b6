use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::{Bus, BusError, BusMessage, Inbound, RedeliveryFilter, decode_inbound};
use crate::config::TrayCfg;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 16;

/// MQTT transport. Publishes and subscribes with QoS 1 (at-least-once).
pub struct MqttBus {
    client: AsyncClient,
    closing: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
    disconnect_timeout: Duration,
}

impl MqttBus {
    /// Connect as `role` and subscribe to `topics`. Subscriptions are re-issued on
    /// every (re)connect. Returns the bus and this process's inbound queue.
    pub fn connect(cfg: &TrayCfg, role: &str, topics: &[&str]) -> Result<(Self, Inbound), BusError> {
        if cfg.broker_host.trim().is_empty() {
            return Err(BusError::Connect("broker host is empty".into()));
        }
        let client_id = format!(
            "{}-{}-{}",
            cfg.client_id_prefix,
            role,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut options = MqttOptions::new(&client_id, &cfg.broker_host, cfg.broker_port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(cfg.bus_buffer.max(1));
        let closing = Arc::new(AtomicBool::new(false));
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();

        tracing::info!(
            client_id = %client_id,
            host = %cfg.broker_host,
            port = cfg.broker_port,
            ?topics,
            "connecting to broker"
        );
        let poller = tokio::spawn(poll_loop(eventloop, client.clone(), topics, tx, closing.clone()));

        let bus = Self {
            client,
            closing,
            poller: Mutex::new(Some(poller)),
            disconnect_timeout: cfg.shutdown_timeout(),
        };
        Ok((bus, rx))
    }
}

async fn poll_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
    closing: Arc<AtomicBool>,
) {
    let mut resends = RedeliveryFilter::new();
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("broker connected");
                for topic in &topics {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        tracing::warn!(topic = %topic, error = %e, "subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if resends.is_redelivery(publish.pkid, publish.dup) {
                    tracing::debug!(topic = %publish.topic, pkid = publish.pkid, "broker resend dropped");
                    continue;
                }
                let Some(msg) = decode_inbound(&publish.topic, &publish.payload) else {
                    continue;
                };
                tracing::debug!(topic = %publish.topic, "message received");
                // Keep polling after the consumer is gone so queued publishes still go out.
                if tx.send(msg).await.is_err() {
                    tracing::debug!("inbound queue closed, message dropped");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("broker disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::Acquire) {
                    break;
                }
                tracing::warn!(error = %e, "broker connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Bus for MqttBus {
    async fn publish(&self, msg: &BusMessage) -> Result<(), BusError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let topic = msg.topic();
        self.client
            .publish(topic, QoS::AtLeastOnce, false, msg.encode())
            .await
            .map_err(|e| BusError::Publish { topic, reason: e.to_string() })?;
        tracing::debug!(topic, "message published");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let requested = self.client.disconnect().await;
        if let Some(mut poller) = self.poller.lock().await.take()
            && tokio::time::timeout(self.disconnect_timeout, &mut poller).await.is_err()
        {
            tracing::warn!(timeout = ?self.disconnect_timeout, "broker poll did not stop in time");
            poller.abort();
        }
        requested.map_err(|e| BusError::Disconnect(e.to_string()))
    }
}
