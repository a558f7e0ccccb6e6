//! # haven-types
//!
//! Shared identifiers, conversation message types, and the versioned
//! configuration surface used across the Haven safety engine.
//!
//! Everything here is plain data: no I/O, no clocks beyond timestamping
//! constructors, no policy. The policy lives in the crates that consume
//! these types.

#![deny(unsafe_code)]

pub mod config;
pub mod id;
pub mod message;
pub mod profile;

pub use config::{ConfigError, EngineConfig, GovernorLimits, MetricAlertThresholds};
pub use id::{ChildId, EventId, MessageId, SessionId};
pub use message::{ChatMessage, MessageRole};
pub use profile::ChildProfile;
