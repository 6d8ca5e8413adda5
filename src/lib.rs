// src/lib.rs

pub mod actions;
pub mod config;
pub mod core;
pub mod repl;
pub mod session;
pub mod transport;

// Re-export
pub use crate::core::FurbyError;
pub use crate::session::{ConnectionSession, Driver, SessionState};
