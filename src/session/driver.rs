// src/session/driver.rs

//! The caller-facing surface: every operation returns a line of text suitable
//! for a REPL or a remote tool response.

use super::{ConnectionSession, SessionState};
use crate::actions::ActionList;
use crate::core::FurbyError;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct Driver {
    session: Arc<ConnectionSession>,
    action_list_path: String,
}

impl Driver {
    pub fn new(session: Arc<ConnectionSession>, action_list_path: impl Into<String>) -> Self {
        Self {
            session,
            action_list_path: action_list_path.into(),
        }
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    pub async fn connect(&self) -> String {
        if self.session.is_connected() {
            return "Furby already connected.".to_string();
        }
        match self.session.start().await {
            Ok(address) => format!("Connected to Furby at {address}"),
            Err(e) => format!("Failed to connect to Furby: {e}"),
        }
    }

    pub async fn disconnect(&self) -> String {
        if !self.session.is_connected() {
            return "Furby is not connected.".to_string();
        }
        match self.session.stop().await {
            Ok(()) => "Disconnected from Furby.".to_string(),
            Err(e) => format!("Disconnected from Furby with errors: {e}"),
        }
    }

    pub async fn send_named_command(&self, name: &str) -> String {
        match self.session.send_named_command(name).await {
            Ok(command) => format!("Sent command: {command}"),
            Err(e) => describe_failure(&e, name),
        }
    }

    pub async fn send_custom_command(&self, w: i64, x: i64, y: i64, z: i64) -> String {
        match self.session.send_custom_command(w, x, y, z).await {
            Ok(action) => format!("Sent custom command: [{action}]"),
            Err(FurbyError::InvalidArgument(_)) => {
                "Enter four numbers between 0 and 255.".to_string()
            }
            Err(e) => describe_failure(&e, &format!("{w},{x},{y},{z}")),
        }
    }

    /// Renders the action list as pretty-printed JSON.
    pub async fn list_actions(&self) -> String {
        match ActionList::load(&self.action_list_path).await {
            Ok(list) => list.to_pretty_json(),
            Err(e) => {
                warn!("Could not load action list: {}", e);
                format!("Could not load action list '{}': {e}", self.action_list_path)
            }
        }
    }

    /// Plays an action from the action list by name.
    pub async fn play_action(&self, name: &str) -> String {
        let list = match ActionList::load(&self.action_list_path).await {
            Ok(list) => list,
            Err(e) => return format!("Could not load action list '{}': {e}", self.action_list_path),
        };
        let Some(entry) = list.find(name) else {
            return format!("Unknown action: {name}");
        };
        let Some(action) = entry.action() else {
            return format!("Action '{}' has no command bytes.", entry.name);
        };
        match self.session.send_action(action).await {
            Ok(()) => format!("Played action: {} [{action}]", entry.name),
            Err(e) => describe_failure(&e, name),
        }
    }

    pub fn status(&self) -> String {
        match (self.session.state(), self.session.address()) {
            (SessionState::Connected, Some(address)) => format!(
                "connected to {address}, {} pending responses",
                self.session.registry().len()
            ),
            (state, _) => state.to_string(),
        }
    }
}

fn describe_failure(error: &FurbyError, what: &str) -> String {
    match error {
        FurbyError::InvalidState(_) => "Furby is not connected.".to_string(),
        FurbyError::UnknownCommand(name) => format!("Unknown command: {name}"),
        other if other.is_recoverable() => format!("Failed to send {what}: {other}"),
        other => format!("Failed to send {what}: {other}. Try 'disconnect' and 'connect'."),
    }
}
