//! Console session: a running log of commands and their output.

use crate::errors::RconError;
use crate::rcon::CommandClient;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Something that can run a command and return its output.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` and return its full output.
    async fn execute(&self, command: &str) -> Result<String, RconError>;
}

#[async_trait]
impl CommandExecutor for CommandClient {
    async fn execute(&self, command: &str) -> Result<String, RconError> {
        CommandClient::execute(self, command).await
    }
}

/// One command and what it printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// The command as submitted, trimmed.
    pub command: String,
    /// Output returned by the server.
    pub result: String,
    /// Milliseconds since the Unix epoch when the output arrived.
    pub timestamp: u64,
}

/// What [`Session::submit`] did with a line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Blank input, nothing was run.
    Ignored,
    /// `clear` was entered and the history was emptied locally.
    Cleared,
    /// The command ran; the new history entry.
    Output(HistoryEntry),
}

/// Command history on top of a [`CommandExecutor`].
///
/// Only commands that succeed are recorded.
#[derive(Debug)]
pub struct Session<E> {
    executor: E,
    history: Vec<HistoryEntry>,
}

impl<E: CommandExecutor> Session<E> {
    /// Start an empty session.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            history: Vec::new(),
        }
    }

    /// Everything run so far, oldest first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// The executor commands are sent to.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Forget the history.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Handle one line of console input.
    ///
    /// # Errors
    /// Returns whatever the executor returns; the history is left untouched.
    pub async fn submit(&mut self, input: &str) -> Result<Submission, RconError> {
        let command = input.trim();

        if command.is_empty() {
            return Ok(Submission::Ignored);
        }

        if command.eq_ignore_ascii_case("clear") {
            self.clear();
            return Ok(Submission::Cleared);
        }

        let result = self.executor.execute(command).await?;
        let entry = HistoryEntry {
            command: command.to_string(),
            result,
            timestamp: unix_millis(),
        };
        self.history.push(entry.clone());

        Ok(Submission::Output(entry))
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
