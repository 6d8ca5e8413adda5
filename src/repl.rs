// src/repl.rs

//! A line-oriented command loop on top of the `Driver`.

use crate::core::metrics;
use crate::core::protocol::NamedCommand;
use crate::core::tasks::keepalive::KeepAliveEvent;
use crate::session::Driver;
use anyhow::Result;
use strum::IntoEnumIterator;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Quit,
    Help,
    Connect,
    Disconnect,
    Status,
    Stats,
    Actions,
    Play(String),
    Named(NamedCommand),
    Custom([i64; 4]),
    Invalid(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim().to_lowercase();
        if line.is_empty() {
            return ReplCommand::Empty;
        }
        match line.as_str() {
            "quit" | "exit" => return ReplCommand::Quit,
            "help" | "?" => return ReplCommand::Help,
            "connect" => return ReplCommand::Connect,
            "disconnect" => return ReplCommand::Disconnect,
            "status" => return ReplCommand::Status,
            "stats" => return ReplCommand::Stats,
            "actions" => return ReplCommand::Actions,
            _ => {}
        }
        if let Some(name) = line.strip_prefix("play ") {
            return ReplCommand::Play(name.trim().to_string());
        }
        if let Ok(named) = NamedCommand::lookup(&line) {
            return ReplCommand::Named(named);
        }

        let values: Result<Vec<i64>, _> = line.split(',').map(|v| v.trim().parse()).collect();
        match values.as_deref() {
            Ok([w, x, y, z]) => ReplCommand::Custom([*w, *x, *y, *z]),
            _ => ReplCommand::Invalid(line),
        }
    }
}

pub fn prompt() -> String {
    let names: Vec<String> = NamedCommand::iter().map(|c| c.to_string()).collect();
    format!(
        "Enter a command ({}), 'quit', or 'W,X,Y,Z': ",
        names.join(", ")
    )
}

const HELP: &str = "\
Commands:
  <name>          send a named command
  W,X,Y,Z         send a custom action (each 0-255)
  actions         list the action list
  play <name>     send an action from the action list
  connect         connect to the device
  disconnect      disconnect but keep the prompt open
  status          show the connection state
  stats           show session metrics
  quit            disconnect and exit";

/// Executes one command. Returns `None` when the loop should stop.
pub async fn execute(driver: &Driver, command: ReplCommand) -> Option<String> {
    let output = match command {
        ReplCommand::Quit => return None,
        ReplCommand::Empty => String::new(),
        ReplCommand::Help => HELP.to_string(),
        ReplCommand::Connect => driver.connect().await,
        ReplCommand::Disconnect => driver.disconnect().await,
        ReplCommand::Status => driver.status(),
        ReplCommand::Stats => metrics::gather_metrics(),
        ReplCommand::Actions => driver.list_actions().await,
        ReplCommand::Play(name) => driver.play_action(&name).await,
        ReplCommand::Named(named) => driver.send_named_command(&named.to_string()).await,
        ReplCommand::Custom([w, x, y, z]) => driver.send_custom_command(w, x, y, z).await,
        ReplCommand::Invalid(line) => format!("Unknown command or invalid format: '{line}'"),
    };
    Some(output)
}

/// Reads commands from `input` until `quit` or end of input, writing results to
/// `output`. Failed keep-alives are reported inline.
pub async fn run<R, W>(driver: &Driver, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut events = driver.session().subscribe_events();

    output.write_all(prompt().as_bytes()).await?;
    output.flush().await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Input closed; leaving REPL.");
                    break;
                };
                let Some(text) = execute(driver, ReplCommand::parse(&line)).await else {
                    break;
                };
                if !text.is_empty() {
                    output.write_all(text.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                }
                output.write_all(prompt().as_bytes()).await?;
                output.flush().await?;
            }
            event = events.recv() => {
                match event {
                    Ok(KeepAliveEvent::Acknowledged(_)) => {}
                    Ok(KeepAliveEvent::NoResponse) => {
                        output.write_all(b"\nNo keep-alive response!\n").await?;
                        output.flush().await?;
                    }
                    Ok(KeepAliveEvent::WriteFailed(reason)) => {
                        output.write_all(format!("\nKeep-alive failed: {reason}\n").as_bytes()).await?;
                        output.flush().await?;
                    }
                    Err(RecvError::Lagged(n)) => debug!("Missed {} keep-alive events.", n),
                    // The session outlives the REPL, so the channel never closes here.
                    Err(RecvError::Closed) => {}
                }
            }
        }
    }
    Ok(())
}
