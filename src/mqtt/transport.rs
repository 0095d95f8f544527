use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A single broker session as seen by the messaging manager.
pub trait MqttTransport {
    /// Blocks until the broker acknowledges or a bounded timeout expires.
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError>;
    fn unsubscribe(&mut self, filter: &str) -> Result<(), TransportError>;
    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool)
        -> Result<(), TransportError>;
    /// Services the session and returns the messages that arrived.
    fn poll(&mut self) -> Vec<InboundMessage>;
}

struct Session {
    client: Client,
    connection: Connection,
}

/// Transport on rumqttc's synchronous client. Must not run inside a tokio
/// runtime context: the connection drives its own current-thread runtime.
pub struct RumqttcTransport {
    session: Option<Session>,
    connect_timeout: Duration,
    poll_timeout: Duration,
    max_events_per_poll: usize,
    capacity: usize,
}

impl RumqttcTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            session: None,
            connect_timeout,
            poll_timeout: Duration::from_millis(1),
            max_events_per_poll: 64,
            capacity: 64,
        }
    }
}

impl MqttTransport for RumqttcTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        self.session = None;

        let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options
            .set_keep_alive(options.keep_alive)
            .set_clean_session(true);
        if let Some(user) = &options.username {
            mqtt_options.set_credentials(user, options.password.as_deref().unwrap_or(""));
        }

        let (client, mut connection) = Client::new(mqtt_options, self.capacity);
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Connect(
                    "timed out waiting for CONNACK".to_string(),
                ));
            }

            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Refused(format!("{:?}", ack.code)));
                    }
                    info!("Broker session established as {}", options.client_id);
                    self.session = Some(Session { client, connection });
                    return Ok(());
                }
                Ok(Ok(event)) => debug!("Event before CONNACK: {:?}", event),
                Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
                Err(_) => {
                    return Err(TransportError::Connect(
                        "timed out waiting for CONNACK".to_string(),
                    ))
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.client.disconnect() {
                debug!("Disconnect request failed: {}", e);
            }
            // Flush the DISCONNECT packet before the event loop is dropped.
            let _ = session.connection.recv_timeout(self.poll_timeout);
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .client
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn unsubscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .client
            .try_unsubscribe(filter)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retained: bool,
    ) -> Result<(), TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, retained, payload.to_vec())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return inbound;
        };

        let mut lost = false;
        for _ in 0..self.max_events_per_poll {
            match session.connection.recv_timeout(self.poll_timeout) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    inbound.push(InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("Broker connection lost: {}", e);
                    lost = true;
                    break;
                }
                Err(_) => break,
            }
        }

        if lost {
            self.session = None;
        }
        inbound
    }
}
