//! Device core for a networked field node: a five-state lifecycle controller
//! that keeps a link and a broker session up, reports its health, recovers
//! from faults and installs firmware updates.

pub mod clock;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod hal;
pub mod logging;
pub mod mqtt;
pub mod ota;
pub mod persistence;

#[cfg(test)]
mod testing;
