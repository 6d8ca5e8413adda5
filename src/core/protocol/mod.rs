// src/core/protocol/mod.rs

//! The device wire format: outbound action and keep-alive commands, and the
//! rules used to recognise inbound notification frames.

pub mod command;
pub mod matcher;

pub use command::{
    ACTION_HEADER, ActionCommand, KEEP_ALIVE_ACK_PREFIX, KEEP_ALIVE_COMMAND, NamedCommand,
};
pub use matcher::ResponseMatcher;

use bytes::Bytes;

/// One inbound or outbound message exchanged with the peripheral.
pub type Frame = Bytes;

/// Renders a frame as lowercase hex for log lines.
pub fn frame_hex(frame: &[u8]) -> String {
    hex::encode(frame)
}
