//! Job bus abstraction over MQTT (§6.1, §6.2).
//!
//! The worker and reconciler only depend on the `JobBus` trait, never on
//! `rumqttc` directly, so tests substitute [`InMemoryBus`] and never open a
//! socket (SPEC_FULL §2.1's "no network dependency in unit tests").

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use transcode_config::BrokerConfig;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Client(String),

    #[error("bus is disconnected")]
    Disconnected,
}

/// Publish/subscribe contract the worker and reconciler depend on.
#[async_trait]
pub trait JobBus: Send + Sync {
    /// Publish a non-retained message at QoS 1 on `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;

    /// Subscribe to `topic`, returning a channel of raw payloads.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, BusError>;
}

/// `rumqttc`-backed bus used in production.
pub struct MqttBus {
    client: AsyncClient,
    // Held so the event loop keeps running for the lifetime of the bus.
    _event_loop_handle: Arc<Mutex<tokio::task::JoinHandle<()>>>,
    subscribers: Arc<Mutex<Vec<(String, mpsc::Sender<String>)>>>,
}

impl MqttBus {
    /// Connect to the broker described by `config`, spawning a background
    /// task that drives the `rumqttc` event loop and fans incoming messages
    /// out to subscribers by topic.
    pub async fn connect(config: &BrokerConfig, client_id: &str) -> Result<Self, BusError> {
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let subscribers: Arc<Mutex<Vec<(String, mpsc::Sender<String>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let subscribers_for_task = subscribers.clone();

        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).to_string();
                        let subs = subscribers_for_task.lock().await;
                        for (topic, tx) in subs.iter() {
                            if *topic == publish.topic {
                                let _ = tx.send(payload.clone()).await;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt event loop error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            _event_loop_handle: Arc::new(Mutex::new(handle)),
            subscribers,
        })
    }
}

#[async_trait]
impl JobBus for MqttBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes())
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, BusError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Client(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().await.push((topic.to_string(), tx));
        Ok(rx)
    }
}

/// In-memory publisher/subscriber used by tests and dry-run modes, so the
/// worker and reconciler never need a live broker to exercise their logic.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    subscribers: Arc<Mutex<Vec<(String, mpsc::Sender<String>)>>>,
    pub published: Arc<Mutex<Vec<(String, String)>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.published
            .lock()
            .await
            .push((topic.to_string(), payload.to_string()));
        let subs = self.subscribers.lock().await;
        for (sub_topic, tx) in subs.iter() {
            if sub_topic == topic {
                let _ = tx.send(payload.to_string()).await;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>, BusError> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().await.push((topic.to_string(), tx));
        Ok(rx)
    }
}
