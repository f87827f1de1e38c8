//! Ordered command execution on top of a single [`Connection`].
//!
//! ```text
//!   CommandClient (Clone)       mpsc        ClientActor (spawned task)
//!   ┌─────────────────────┐  ─────────▶  ┌────────────────────────────┐
//!   │ .connect()          │              │ Option<Connection>         │
//!   │ .execute()          │  ◀─────────  │ one request at a time,     │
//!   │ .disconnect()       │   oneshot    │ in submission order        │
//!   └─────────────────────┘              └────────────────────────────┘
//! ```
//!
//! Responses carry no tag beyond the request id, and fragments of two
//! interleaved commands could not be told apart, so the actor never has more
//! than one command on the wire.

use super::connection::{Connection, ConnectionSettings, ConnectionState};
use super::reassembler::CommandResult;
use crate::config::RconConfig;
use crate::errors::RconError;
use crate::relay::RconResponse;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

/// Internal request sent from [`CommandClient`] to the actor.
enum Request {
    Connect {
        settings: ConnectionSettings,
        reply: oneshot::Sender<Result<(), RconError>>,
    },
    Execute {
        command: String,
        /// Disconnect generation at submission time.
        epoch: u64,
        reply: oneshot::Sender<Result<CommandResult, RconError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to an RCON session that serializes commands.
///
/// Cloning is cheap and every clone talks to the same connection. Commands
/// issued concurrently from any number of clones are run one after the other,
/// in the order they were submitted.
///
/// # Examples
///
/// ```no_run
/// use rcon_console::{config::RconConfig, CommandClient, ConnectionSettings};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rcon_console::errors::RconError> {
///     let client = CommandClient::new(RconConfig::default());
///     client
///         .connect(ConnectionSettings::new("127.0.0.1", 27015, "secret"))
///         .await?;
///
///     let output = client.execute("status").await?;
///     println!("{output}");
///
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CommandClient {
    tx: mpsc::UnboundedSender<Request>,
    disconnects: Arc<watch::Sender<u64>>,
    state: watch::Receiver<ConnectionState>,
    config: RconConfig,
}

impl CommandClient {
    /// Spawn the actor backing a new client. No connection is made yet.
    ///
    /// Must be called from within a tokio runtime. The actor stops, closing
    /// its connection, once every clone of the handle is dropped.
    pub fn new(config: RconConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (disconnects, disconnects_rx) = watch::channel(0);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let actor = ClientActor {
            config,
            connection: None,
            disconnects: disconnects_rx,
            state: state_tx,
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            disconnects: Arc::new(disconnects),
            state,
            config,
        }
    }

    /// The timeouts connections are opened with.
    pub fn config(&self) -> RconConfig {
        self.config
    }

    /// State of the underlying connection as of the last finished request.
    ///
    /// A socket that dies while idle is only noticed by the next command.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Connect and authenticate.
    ///
    /// Does nothing if already `Ready` with identical settings; otherwise any
    /// previous connection is closed first.
    ///
    /// # Errors
    /// Returns [`RconError::Connect`] or [`RconError::Authentication`].
    pub async fn connect(&self, settings: ConnectionSettings) -> Result<(), RconError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Connect { settings, reply })
            .map_err(|_| client_stopped())?;
        rx.await.map_err(|_| client_stopped())?
    }

    /// Run `command` and return its full output.
    ///
    /// # Errors
    /// See [`CommandClient::execute_result`].
    pub async fn execute(&self, command: &str) -> Result<String, RconError> {
        self.execute_result(command).await.map(|result| result.output)
    }

    /// Run `command` and return its output along with timing information.
    ///
    /// # Errors
    /// Returns [`RconError::NotConnected`] without a `Ready` connection,
    /// [`RconError::ResponseTimeout`] if the output does not complete in time,
    /// and [`RconError::ConnectionLost`] if the connection fails or
    /// [`CommandClient::disconnect`] is called before the command finishes.
    pub async fn execute_result(&self, command: &str) -> Result<CommandResult, RconError> {
        let (reply, rx) = oneshot::channel();
        let epoch = *self.disconnects.borrow();
        self.tx
            .send(Request::Execute {
                command: command.to_string(),
                epoch,
                reply,
            })
            .map_err(|_| client_stopped())?;
        rx.await.map_err(|_| client_stopped())?
    }

    /// Close the connection.
    ///
    /// The command on the wire, and every command queued before this call,
    /// fails with [`RconError::ConnectionLost`].
    pub async fn disconnect(&self) {
        self.disconnects.send_modify(|epoch| *epoch += 1);

        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Connect if needed, then run `command`, keeping the connection open for
    /// the next call.
    ///
    /// Never fails; errors come back as a response with `success: false`.
    pub async fn send_command(&self, settings: ConnectionSettings, command: &str) -> RconResponse {
        if let Err(err) = self.connect(settings).await {
            return RconResponse::failure(&err);
        }

        match self.execute(command).await {
            Ok(output) => RconResponse::success(output),
            Err(err) => RconResponse::failure(&err),
        }
    }
}

fn client_stopped() -> RconError {
    RconError::ConnectionLost("command client stopped".into())
}

/// Owns the connection and handles requests strictly one at a time.
struct ClientActor {
    config: RconConfig,
    connection: Option<Connection>,
    disconnects: watch::Receiver<u64>,
    state: watch::Sender<ConnectionState>,
}

impl ClientActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = rx.recv().await {
            self.handle(request).await;
        }

        self.disconnect().await;
        debug!("command client shutting down: channel closed");
    }

    /// State is published before replying, so a caller that sees the reply
    /// also sees the state it left behind.
    async fn handle(&mut self, request: Request) {
        match request {
            Request::Connect { settings, reply } => {
                let result = self.connect(settings).await;
                self.publish_state();
                let _ = reply.send(result);
            }
            Request::Execute {
                command,
                epoch,
                reply,
            } => {
                let result = self.execute(&command, epoch).await;
                self.publish_state();
                let _ = reply.send(result);
            }
            Request::Disconnect { reply } => {
                self.disconnect().await;
                self.publish_state();
                let _ = reply.send(());
            }
        }
    }

    async fn connect(&mut self, settings: ConnectionSettings) -> Result<(), RconError> {
        if let Some(connection) = &self.connection {
            if connection.state() == ConnectionState::Ready && *connection.settings() == settings {
                debug!("already connected with these settings");
                return Ok(());
            }
        }

        self.disconnect().await;

        info!(addr = %settings.addr(), "connecting");
        self.state.send_replace(ConnectionState::Connecting);

        let mut connection = Connection::new(settings, self.config);
        let result = connection.connect().await;
        // kept even when failed so the state stays observable
        self.connection = Some(connection);
        result
    }

    async fn execute(&mut self, command: &str, epoch: u64) -> Result<CommandResult, RconError> {
        if epoch < *self.disconnects.borrow() {
            return Err(RconError::ConnectionLost("disconnected before dispatch".into()));
        }

        let Some(connection) = self.connection.as_mut() else {
            return Err(RconError::NotConnected);
        };

        let mut disconnects = self.disconnects.clone();
        let outcome = tokio::select! {
            result = connection.execute(command) => Some(result),
            () = disconnect_requested(&mut disconnects, epoch) => None,
        };

        match outcome {
            Some(result) => result,
            None => {
                connection.disconnect().await;
                Err(RconError::ConnectionLost("disconnected while waiting for response".into()))
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect().await;
        }
    }

    fn publish_state(&self) {
        let state = self
            .connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, Connection::state);
        self.state.send_replace(state);
    }
}

/// Resolves once the disconnect generation moves past `since`.
async fn disconnect_requested(disconnects: &mut watch::Receiver<u64>, since: u64) {
    loop {
        if *disconnects.borrow_and_update() > since {
            return;
        }
        if disconnects.changed().await.is_err() {
            // every handle is gone, nobody can ask anymore
            std::future::pending::<()>().await;
        }
    }
}
