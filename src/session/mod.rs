// src/session/mod.rs

//! Owns everything that lives for one device connection and exposes the
//! operations callers use.

mod connection;
pub mod driver;

pub use connection::{ConnectionSession, SessionState};
pub use driver::Driver;
