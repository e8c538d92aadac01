//! HTTP request handlers shared by every service.

pub mod health;

pub use health::{consumer_readiness, health_check};
