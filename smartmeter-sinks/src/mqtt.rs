//! MQTT publish sink

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use smartmeter_core::{DerivedState, MeterError, MeterResult, Reading};
use smartmeter_reader::ConsumerHandler;
use std::time::Duration;

const DEFAULT_PORT: u16 = 1883;

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
}

impl MqttSettings {
    /// Settings for a broker given as `host`, `host:port` or `tcp://host:port`
    pub fn from_server(server: &str, topic_prefix: impl Into<String>) -> MeterResult<Self> {
        let address = server
            .strip_prefix("tcp://")
            .or_else(|| server.strip_prefix("mqtt://"))
            .unwrap_or(server)
            .trim_end_matches('/');

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| MeterError::Config(format!("Invalid MQTT port in {}", server)))?;
                (host, port)
            }
            None => (address, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(MeterError::Config(format!("Invalid MQTT server {}", server)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            username: None,
            password: None,
            client_id: format!("smartmeter-{}", std::process::id()),
            topic_prefix: topic_prefix.into(),
        })
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

/// Publishes readings whose rule has a topic
///
/// Payload is the decimal form of the value, sent with QoS 0 and without
/// the retain flag. Readings without a topic are skipped.
pub struct MqttSink {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttSink {
    /// Create the client and spawn its event loop
    ///
    /// The connection is established in the background and re-established
    /// after errors.
    pub fn connect(settings: &MqttSettings) -> Self {
        let mut options = MqttOptions::new(settings.client_id.as_str(), settings.host.as_str(), settings.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let Some(username) = &settings.username {
            options.set_credentials(username.as_str(), settings.password.as_deref().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let broker = format!("{}:{}", settings.host, settings.port);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => log::trace!("MQTT event: {:?}", event),
                    Err(e) => {
                        log::warn!("MQTT connection to {} failed: {}", broker, e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        log::info!("Publishing to MQTT broker {}:{}", settings.host, settings.port);
        Self {
            client,
            topic_prefix: settings.topic_prefix.clone(),
        }
    }

    fn full_topic(&self, topic: &str) -> String {
        full_topic(&self.topic_prefix, topic)
    }
}

fn full_topic(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), topic)
    }
}

fn payload(value: f64) -> String {
    value.to_string()
}

#[async_trait]
impl ConsumerHandler for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn handle(&self, _labels: &DerivedState, reading: &Reading) -> MeterResult<()> {
        let Some(topic) = &reading.rule.topic else {
            return Ok(());
        };
        self.client
            .publish(self.full_topic(topic), QoS::AtMostOnce, false, payload(reading.value))
            .await
            .map_err(|e| MeterError::Sink(format!("MQTT publish failed: {}", e)))
    }
}
