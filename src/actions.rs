// src/actions.rs

//! Loads the JSON action list describing known `W,X,Y,Z` quadruples.
//!
//! The file is an array of objects. Only `name` is required; `description` and
//! `command` (four integers) are understood, and any other fields are kept so the
//! list can be echoed back unchanged.

use crate::core::FurbyError;
use crate::core::protocol::ActionCommand;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<[u8; 4]>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionEntry {
    pub fn action(&self) -> Option<ActionCommand> {
        self.command
            .map(|[w, x, y, z]| ActionCommand::new(w, x, y, z))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionList {
    entries: Vec<ActionEntry>,
}

impl ActionList {
    pub async fn load(path: &str) -> Result<Self, FurbyError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, FurbyError> {
        let entries: Vec<ActionEntry> = serde_json::from_str(content)?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ActionEntry] {
        &self.entries
    }

    /// Finds an entry by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<&ActionEntry> {
        let name = name.trim();
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.entries).unwrap_or_else(|e| format!("[] // {e}"))
    }
}
