// src/core/protocol/matcher.rs

use super::command::KEEP_ALIVE_ACK_PREFIX;
use bytes::Bytes;

/// Describes which inbound frame satisfies an outstanding request.
///
/// The device protocol carries no request identifiers, so a reply can only be
/// recognised by its leading bytes. When several expectations accept the same
/// frame, the oldest one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMatcher {
    /// The next notification, whatever it contains.
    AnyFrame,
    /// A notification starting with these bytes.
    Prefix(Bytes),
}

impl ResponseMatcher {
    pub fn prefix(bytes: impl Into<Bytes>) -> Self {
        ResponseMatcher::Prefix(bytes.into())
    }

    /// The keep-alive acknowledgment: only the first byte is checked.
    pub fn keep_alive_ack() -> Self {
        ResponseMatcher::Prefix(Bytes::from_static(&KEEP_ALIVE_ACK_PREFIX))
    }

    pub fn matches(&self, frame: &[u8]) -> bool {
        match self {
            ResponseMatcher::AnyFrame => true,
            ResponseMatcher::Prefix(prefix) => frame.starts_with(prefix),
        }
    }
}
