use super::topic::{self, match_topic};
use super::transport::{ConnectOptions, MqttTransport, TransportError};
use crate::clock::{has_elapsed, Millis};
use crate::config::{DeviceIdentity, MqttConfig};
use crate::error::ErrorCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub type MessageCallback = Box<dyn FnMut(&str, &[u8])>;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("No MQTT {0} configured")]
    MissingBroker(&'static str),

    #[error("Messaging manager not initialized")]
    NotInitialized,

    #[error("MQTT client not connected")]
    NotConnected,

    #[error("Broker connection failed: {0}")]
    Connect(#[source] TransportError),

    #[error("Broker unreachable after {0} attempts")]
    RetriesExhausted(u8),

    #[error("Already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("Not subscribed to {0}")]
    NotSubscribed(String),

    #[error("Failed to subscribe to {filter}: {source}")]
    Subscribe {
        filter: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to unsubscribe from {filter}: {source}")]
    Unsubscribe {
        filter: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to publish to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl MessagingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MessagingError::MissingBroker(_) | MessagingError::NotInitialized => {
                ErrorCode::MqttInitFailed
            }
            MessagingError::NotConnected => ErrorCode::MqttLostConnection,
            MessagingError::Connect(_) | MessagingError::RetriesExhausted(_) => {
                ErrorCode::MqttConnectionFailed
            }
            MessagingError::AlreadySubscribed(_)
            | MessagingError::NotSubscribed(_)
            | MessagingError::Subscribe { .. }
            | MessagingError::Unsubscribe { .. } => ErrorCode::MqttSubscriptionFailed,
            MessagingError::Publish { .. }
            | MessagingError::PayloadTooLarge { .. }
            | MessagingError::Encode(_) => ErrorCode::MqttPublishFailed,
        }
    }
}

struct Subscription {
    filter: String,
    callback: MessageCallback,
}

/// Single broker session with a subscription registry.
///
/// Filters are unique. Every registered filter is replayed after a
/// (re)connect, and inbound messages go to every matching callback in
/// registration order.
pub struct MessagingManager {
    transport: Box<dyn MqttTransport>,
    config: MqttConfig,
    client_id: String,
    device_topic: String,
    initialized: bool,
    subscriptions: Vec<Subscription>,
    last_attempt: Option<Millis>,
    failed_attempts: u8,
}

impl MessagingManager {
    pub fn new(
        transport: Box<dyn MqttTransport>,
        config: MqttConfig,
        identity: &DeviceIdentity,
    ) -> Self {
        Self {
            transport,
            client_id: identity.client_id(),
            device_topic: topic::device_topic(&config.base_topic, identity),
            config,
            initialized: false,
            subscriptions: Vec::new(),
            last_attempt: None,
            failed_attempts: 0,
        }
    }

    pub fn begin(&mut self) -> Result<(), MessagingError> {
        if self.initialized {
            return Ok(());
        }

        if self.config.broker.is_empty() {
            warn!("No MQTT broker available, skipping messaging initialization");
            return Err(MessagingError::MissingBroker("broker"));
        }
        if self.config.port == 0 {
            warn!("No MQTT port available, skipping messaging initialization");
            return Err(MessagingError::MissingBroker("port"));
        }

        info!(
            "Messaging initialized for {}:{} as {}",
            self.config.broker, self.config.port, self.client_id
        );
        self.initialized = true;
        Ok(())
    }

    pub fn connect(&mut self) -> Result<(), MessagingError> {
        if !self.initialized {
            error!("Messaging manager not initialized");
            return Err(MessagingError::NotInitialized);
        }
        if self.transport.is_connected() {
            return Ok(());
        }

        debug!("Attempting to connect to MQTT broker...");
        let options = self.connect_options();
        if let Err(e) = self.transport.connect(&options) {
            error!("Connection failed: {}", e);
            return Err(MessagingError::Connect(e));
        }

        info!("Connected to MQTT broker");
        self.failed_attempts = 0;
        for subscription in &self.subscriptions {
            match self.transport.subscribe(&subscription.filter) {
                Ok(()) => debug!("Resubscribed to {}", subscription.filter),
                Err(e) => warn!("Failed to resubscribe to {}: {}", subscription.filter, e),
            }
        }
        Ok(())
    }

    fn connect_options(&self) -> ConnectOptions {
        let username = (!self.config.user.is_empty()).then(|| self.config.user.clone());
        let password = username.as_ref().map(|_| self.config.password.clone());
        ConnectOptions {
            client_id: self.client_id.clone(),
            host: self.config.broker.clone(),
            port: self.config.port,
            username,
            password,
            keep_alive: Duration::from_secs(u64::from(self.config.keep_alive)),
        }
    }

    pub fn disconnect(&mut self) {
        if self.transport.is_connected() {
            self.transport.disconnect();
            info!("Disconnected from MQTT broker");
        }
    }

    pub fn subscribe<F>(&mut self, filter: &str, callback: F) -> Result<(), MessagingError>
    where
        F: FnMut(&str, &[u8]) + 'static,
    {
        if !self.transport.is_connected() {
            error!("MQTT client not connected");
            return Err(MessagingError::NotConnected);
        }

        if self.is_subscribed(filter) {
            warn!("Already subscribed to topic {}", filter);
            return Err(MessagingError::AlreadySubscribed(filter.to_string()));
        }

        if let Err(source) = self.transport.subscribe(filter) {
            error!("Failed to subscribe to topic: {}", filter);
            return Err(MessagingError::Subscribe {
                filter: filter.to_string(),
                source,
            });
        }

        self.subscriptions.push(Subscription {
            filter: filter.to_string(),
            callback: Box::new(callback),
        });
        info!("Subscribed to topic: {}", filter);
        Ok(())
    }

    /// Removes the entry whose filter is exactly `filter`.
    pub fn unsubscribe(&mut self, filter: &str) -> Result<(), MessagingError> {
        let Some(index) = self.subscriptions.iter().position(|s| s.filter == filter) else {
            return Err(MessagingError::NotSubscribed(filter.to_string()));
        };

        if self.transport.is_connected() {
            self.transport
                .unsubscribe(filter)
                .map_err(|source| MessagingError::Unsubscribe {
                    filter: filter.to_string(),
                    source,
                })?;
        }

        self.subscriptions.remove(index);
        info!("Unsubscribed from topic: {}", filter);
        Ok(())
    }

    /// Publishes to `topic`, or to `<device topic>/<topic>` unless `absolute`.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retained: bool,
        absolute: bool,
    ) -> Result<(), MessagingError> {
        if !self.transport.is_connected() {
            error!("MQTT client not connected");
            return Err(MessagingError::NotConnected);
        }

        if payload.len() > self.config.max_payload {
            return Err(MessagingError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload,
            });
        }

        let full_topic = topic::resolve(&self.device_topic, topic, absolute);
        self.transport
            .publish(&full_topic, payload, retained)
            .map_err(|source| MessagingError::Publish {
                topic: full_topic.clone(),
                source,
            })?;
        debug!(
            "Published message ('{}', '{}')",
            full_topic,
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }

    /// Serializes `report` and publishes it under the device topic.
    pub fn publish_json<T: Serialize>(
        &mut self,
        subtopic: &str,
        report: &T,
        retained: bool,
    ) -> Result<(), MessagingError> {
        let payload = serde_json::to_vec(report)?;
        self.publish(subtopic, &payload, retained, false)
    }

    /// Polled every tick. Reconnects no more often than `retry_interval`;
    /// returns `RetriesExhausted` once per `max_connection_attempts` failures.
    pub fn update(&mut self, now: Millis) -> Result<(), MessagingError> {
        if !self.initialized {
            return Ok(());
        }

        if self.transport.is_connected() {
            for message in self.transport.poll() {
                self.dispatch(&message.topic, &message.payload);
            }
            return Ok(());
        }

        let due = self
            .last_attempt
            .map_or(true, |last| has_elapsed(now, last, self.config.retry_interval));
        if !due {
            return Ok(());
        }

        self.last_attempt = Some(now);
        match self.connect() {
            Ok(()) => {
                self.last_attempt = None;
                Ok(())
            }
            Err(e) => {
                self.failed_attempts = self.failed_attempts.saturating_add(1);
                warn!(
                    "Broker reconnect attempt {} of {} failed: {}",
                    self.failed_attempts, self.config.max_connection_attempts, e
                );
                if self.failed_attempts >= self.config.max_connection_attempts {
                    let attempts = self.failed_attempts;
                    self.failed_attempts = 0;
                    return Err(MessagingError::RetriesExhausted(attempts));
                }
                Ok(())
            }
        }
    }

    /// Routes one inbound message to every matching subscription.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) {
        debug!(
            "Received message ('{}', '{}')",
            topic,
            String::from_utf8_lossy(payload)
        );
        for subscription in self.subscriptions.iter_mut() {
            if match_topic(&subscription.filter, topic) {
                (subscription.callback)(topic, payload);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.subscriptions.iter().any(|s| s.filter == filter)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn device_topic(&self) -> &str {
        &self.device_topic
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}
