//! # Tracemesh Services
//!
//! The three services of the constellation, built on the tracemesh crates:
//!
//! - **Gateway** ([`gateway`]): public HTTP API fanning out over REST, RPC
//!   and events through one `Sender`
//! - **Order** ([`order`]): REST order service
//! - **Payment** ([`payment`]): consumes `process-payment` events and answers
//!   payment lookups
//!
//! Shared pieces are the environment [`config`], logging and trace export
//! ([`telemetry`]), start-up and shutdown steps ([`lifecycle`]) and the wire
//! messages ([`proto`]). Each service has a binary under `src/bin/`.

pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod order;
pub mod payment;
pub mod proto;
pub mod telemetry;

pub use config::{ConfigError, ServiceConfig};
