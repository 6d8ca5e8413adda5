// src/core/protocol/command.rs

//! Outbound command encoding.
//!
//! Every action the Furby performs is triggered by a six byte write of the form
//! `[0x13, 0x00, W, X, Y, Z]`. Named commands are nothing more than well-known
//! `W,X,Y,Z` quadruples.

use crate::core::FurbyError;
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

/// The two leading bytes of every action command.
pub const ACTION_HEADER: [u8; 2] = [0x13, 0x00];

/// The keep-alive command that keeps the device attentive.
pub const KEEP_ALIVE_COMMAND: [u8; 2] = [0x20, 0x06];

/// Any notification whose first byte is `0x22` acknowledges a keep-alive.
/// The remaining bytes are not inspected.
pub const KEEP_ALIVE_ACK_PREFIX: [u8; 1] = [0x22];

/// A validated `W,X,Y,Z` action quadruple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionCommand {
    pub w: u8,
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl ActionCommand {
    pub const fn new(w: u8, x: u8, y: u8, z: u8) -> Self {
        Self { w, x, y, z }
    }

    /// Builds a command from untrusted integers, rejecting anything outside `0..=255`.
    pub fn from_values(values: &[i64]) -> Result<Self, FurbyError> {
        let [w, x, y, z] = values else {
            return Err(FurbyError::InvalidArgument(format!(
                "expected four values, got {}",
                values.len()
            )));
        };
        Ok(Self::new(
            to_byte(*w)?,
            to_byte(*x)?,
            to_byte(*y)?,
            to_byte(*z)?,
        ))
    }

    /// Parses the textual `W,X,Y,Z` form accepted by the REPL.
    pub fn parse_csv(input: &str) -> Result<Self, FurbyError> {
        let values = input
            .split(',')
            .map(|part| part.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_values(&values)
    }

    /// Encodes the command into its exact on-wire representation.
    pub fn encode(&self) -> [u8; 6] {
        [
            ACTION_HEADER[0],
            ACTION_HEADER[1],
            self.w,
            self.x,
            self.y,
            self.z,
        ]
    }
}

impl fmt::Display for ActionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.w, self.x, self.y, self.z)
    }
}

fn to_byte(value: i64) -> Result<u8, FurbyError> {
    u8::try_from(value).map_err(|_| {
        FurbyError::InvalidArgument(format!("{value} is out of range, expected 0-255"))
    })
}

/// The fixed, named actions shipped with the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NamedCommand {
    Fart,
    Snore,
    Toot,
    Laugh,
}

impl NamedCommand {
    pub fn action(&self) -> ActionCommand {
        match self {
            NamedCommand::Fart => ActionCommand::new(0x01, 0x02, 0x01, 0x04),
            NamedCommand::Snore => ActionCommand::new(0x4a, 0x00, 0x00, 0x01),
            NamedCommand::Toot => ActionCommand::new(0x07, 0x00, 0x01, 0x02),
            NamedCommand::Laugh => ActionCommand::new(0x02, 0x00, 0x00, 0x00),
        }
    }

    /// Looks up a command by name, mapping a miss to `UnknownCommand`.
    pub fn lookup(name: &str) -> Result<Self, FurbyError> {
        name.trim()
            .parse::<NamedCommand>()
            .map_err(|_| FurbyError::UnknownCommand(name.trim().to_string()))
    }
}
