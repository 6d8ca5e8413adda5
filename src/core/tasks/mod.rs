// src/core/tasks/mod.rs

//! This module contains the long-running background tasks owned by a connected
//! session: the keep-alive watchdog and the notification dispatcher.

pub mod dispatcher;
pub mod keepalive;
