//! Stateless request/response surface for front-ends.
//!
//! Each call to [`send_command`] opens a connection, runs one command and
//! closes it again. Callers that issue many commands should hold a
//! [`CommandClient`](crate::CommandClient) and use its
//! [`send_command`](crate::CommandClient::send_command) instead, which keeps
//! the session alive between calls.

use crate::config::RconConfig;
use crate::errors::RconError;
use crate::rcon::{CommandResult, Connection, ConnectionSettings};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

/// What a front-end gets back for every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RconResponse {
    /// Whether the command ran.
    pub success: bool,
    /// Command output on success, error message otherwise.
    pub data: String,
}

impl RconResponse {
    /// A successful response carrying `output`.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            data: output.into(),
        }
    }

    /// A failed response describing `err`.
    pub fn failure(err: &RconError) -> Self {
        Self {
            success: false,
            data: err.to_string(),
        }
    }

    /// Render as `{"success":..,"data":".."}`.
    ///
    /// # Errors
    /// Returns `Err` only if serialization itself fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A relay request body: connection settings plus the command to run.
///
/// `port` may be given as a number or as a numeric string.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RelayRequest {
    /// Server hostname or address.
    pub host: String,
    /// RCON port.
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    /// RCON password.
    pub password: String,
    /// Command line to run.
    pub command: String,
}

impl RelayRequest {
    /// Parse a JSON request body.
    ///
    /// # Errors
    /// Returns `Err` if the body is not valid JSON, a field is missing, or the
    /// port is not a valid 16-bit number.
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    /// The connection part of the request.
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::new(self.host.clone(), self.port, self.password.clone())
    }
}

impl fmt::Debug for RelayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("command", &self.command)
            .finish()
    }
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port {text:?}"))),
    }
}

/// Connect, authenticate, run `command` and disconnect.
///
/// Never fails; errors come back as a response with `success: false`.
pub async fn send_command(
    settings: &ConnectionSettings,
    command: &str,
    config: RconConfig,
) -> RconResponse {
    match run_once(settings, command, config).await {
        Ok(result) => RconResponse::success(result.output),
        Err(err) => {
            warn!(addr = %settings.addr(), %err, "relay command failed");
            RconResponse::failure(&err)
        }
    }
}

/// Handle a raw JSON relay request body.
pub async fn handle_json(body: &str, config: RconConfig) -> RconResponse {
    match RelayRequest::from_json(body) {
        Ok(request) => send_command(&request.settings(), &request.command, config).await,
        Err(err) => RconResponse {
            success: false,
            data: format!("invalid request: {err}"),
        },
    }
}

async fn run_once(
    settings: &ConnectionSettings,
    command: &str,
    config: RconConfig,
) -> Result<CommandResult, RconError> {
    let mut connection = Connection::open(settings.clone(), config).await?;
    let result = connection.execute(command).await;
    connection.disconnect().await;
    result
}
