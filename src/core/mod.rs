// src/core/mod.rs

//! The command/response engine: wire format, response correlation, command
//! issuance, idle tracking, and the background tasks that tie them together.

pub mod correlation;
pub mod errors;
pub mod issuer;
pub mod keepalive;
pub mod metrics;
pub mod protocol;
pub mod tasks;

pub use errors::FurbyError;
pub use protocol::Frame;
