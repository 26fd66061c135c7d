use crate::messages::telemetry::reading::Reading;
use rumqttc::{AsyncClient, ClientError, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Broker connection and topic for the sensor stream.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Topic every reading is published on.
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_port() -> u16 {
    1883
}

fn default_topic() -> String {
    String::from("major/sensors")
}

fn default_client_id() -> String {
    String::from("terra-field-unit")
}

fn default_keep_alive_secs() -> u64 {
    60
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            topic: default_topic(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("could not encode reading: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("mqtt client rejected publish: {0}")]
    Client(#[from] ClientError),
    #[error("publish sink is closed")]
    Closed,
}

/// Sink for fused readings.
pub trait Publish: Send {
    /// Emit one reading.
    fn publish(&mut self, reading: &Reading)
        -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Flush and disconnect. Called once on shutdown.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Requests buffered by the MQTT client while the broker is unreachable.
pub const REQUEST_QUEUE_CAPACITY: usize = 10;

/// Publishes readings as json to an MQTT topic. The client's event loop
/// runs in its own task and reconnects on its own after broker errors.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Connect to the broker described by `config`. Must be called from
    /// within a tokio runtime.
    pub fn connect(config: &BrokerConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        let host = config.host.clone();
        let port = config.port;
        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => debug!(?event, "mqtt event"),
                    Err(e) => {
                        warn!(%host, port, error = %e, "mqtt connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        info!(host = %config.host, port = config.port, topic = %config.topic, "mqtt publisher started");

        Self {
            client,
            topic: config.topic.clone(),
            event_loop,
        }
    }
}

impl Publish for MqttPublisher {
    async fn publish(&mut self, reading: &Reading) -> Result<(), PublishError> {
        let payload = reading.to_payload()?;
        // Never wait on a full request queue, the cycle must keep its cadence.
        self.client
            .try_publish(&self.topic, QoS::AtMostOnce, false, payload)?;
        info!(topic = %self.topic, ?reading, "reading published");
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "mqtt disconnect failed");
        }
        self.event_loop.abort();
    }
}

/// Hands readings to an in-process consumer over a tokio channel.
pub struct ChannelPublisher {
    sender: mpsc::Sender<Reading>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end for the consumer.
    ///
    /// * `capacity`: readings buffered before `publish` waits.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Reading>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl Publish for ChannelPublisher {
    async fn publish(&mut self, reading: &Reading) -> Result<(), PublishError> {
        self.sender
            .send(reading.clone())
            .await
            .map_err(|_| PublishError::Closed)
    }

    async fn close(&mut self) {}
}
