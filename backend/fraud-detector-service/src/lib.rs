//! Fraud event detector
//!
//! Consumes fraud events from a partitioned log and applies risk evaluation
//! and alerting with exactly-once effect: a Redis dedup marker is written
//! after the side effects and before the partition's offset is committed, so
//! at-least-once redeliveries are recognised and skipped.

pub mod config;
pub mod consumer;
pub mod counter;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use models::{FraudEvent, RiskLevel};
