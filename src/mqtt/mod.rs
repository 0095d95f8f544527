//! # Messaging Module
//!
//! One persistent broker session for the device, with wildcard routing of
//! inbound messages to registered callbacks.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── topic.rs      - Filter matching and the device topic namespace
//! ├── transport.rs  - MqttTransport boundary and the rumqttc implementation
//! ├── manager.rs    - MessagingManager: connect/retry, registry, publish
//! └── reports.rs    - JSON status, progress and fault payloads
//! ```
//!
//! ## Topic Layout
//!
//! Everything the device publishes about itself lives under
//! `<base_topic>/<chip id>`:
//!
//! ```text
//! gpsno/devices/3fa2c1/status   retained heartbeat
//! gpsno/devices/3fa2c1/error    retained last fault
//! gpsno/devices/3fa2c1/update   update progress
//! gpsno/devices/3fa2c1/config   inbound requests
//! ```
//!
//! The manager is not thread-safe and does not need to be: it is owned by the
//! device's services and only touched from the control thread. Callbacks
//! cannot reach back into the manager; components that need to act on a
//! message queue it and act on their next tick.

pub mod manager;
pub mod reports;
pub mod topic;
pub mod transport;

pub use manager::{MessageCallback, MessagingError, MessagingManager};
pub use transport::{ConnectOptions, InboundMessage, MqttTransport, RumqttcTransport, TransportError};
