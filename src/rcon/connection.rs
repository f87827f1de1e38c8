//! One TCP socket to an RCON server: connect, authenticate, exchange packets.

use super::packet::{self, Direction, RconPacket, RconPacketType};
use super::reassembler::{CommandResult, Feed, Reassembler};
use super::{MAX_COMMAND_LEN, MAX_PACKET_SIZE};
use crate::config::RconConfig;
use crate::errors::{AuthError, RconError, RconProtocolError};
use bytes::{Bytes, BytesMut};
use rand::random;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

/// Decoded packets the read loop may buffer before it stops reading from the
/// socket.
const INBOUND_CAPACITY: usize = 64;

/// Where to connect and which password to authenticate with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Hostname or IP address of the server.
    pub host: String,
    /// RCON port, usually 27015 for Source games.
    pub port: u16,
    /// RCON password.
    pub password: String,
}

impl ConnectionSettings {
    /// Bundle up connection settings.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    /// `host:port`, suitable for dialing.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Lifecycle of a [`Connection`].
///
/// ```text
/// Disconnected -> Connecting -> Authenticating -> Ready
///                      |              |            |
///                      +--------------+------> Failed
/// ```
///
/// `Failed`, and `Disconnected` after a connect attempt, are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Opening the TCP socket.
    Connecting,
    /// Waiting for the auth response.
    Authenticating,
    /// Commands may be sent.
    Ready,
    /// Connect, auth or a later read/write failed.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the read loop hands to the connection.
#[derive(Debug)]
enum Inbound {
    Packet(RconPacket),
    Closed(CloseReason),
}

#[derive(Debug)]
enum CloseReason {
    Eof,
    Io(io::Error),
    Malformed(RconProtocolError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => f.write_str("server closed the connection"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Malformed(err) => write!(f, "{err}"),
        }
    }
}

impl CloseReason {
    /// The error for a caller that was waiting on the socket when it closed.
    fn into_error(self) -> RconError {
        match self {
            Self::Malformed(err) => RconError::Malformed(err),
            other => RconError::ConnectionLost(other.to_string()),
        }
    }
}

/// An RCON session over one TCP socket.
///
/// A connection goes through [`ConnectionState`] once. After it fails or is
/// disconnected a new one has to be constructed.
///
/// Reads happen on a dedicated task that decodes frames as they arrive and
/// forwards them here, so a slow caller never stalls the socket.
///
/// # Examples
///
/// ```no_run
/// use rcon_console::{config::RconConfig, rcon::{Connection, ConnectionSettings}};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rcon_console::errors::RconError> {
///     let settings = ConnectionSettings::new("127.0.0.1", 27015, "secret");
///     let mut connection = Connection::open(settings, RconConfig::default()).await?;
///
///     let result = connection.execute("status").await?;
///     println!("{}", result.output);
///
///     connection.disconnect().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Connection {
    settings: ConnectionSettings,
    config: RconConfig,
    state: ConnectionState,
    attempted: bool,
    authenticated: bool,
    writer: Option<OwnedWriteHalf>,
    inbound: Option<mpsc::Receiver<Inbound>>,
    reader: Option<JoinHandle<()>>,
    reassembler: Reassembler,
    next_id: i32,
}

impl Connection {
    /// Construct a connection in the `Disconnected` state. Nothing is dialed
    /// until [`Connection::connect`] is called.
    pub fn new(settings: ConnectionSettings, config: RconConfig) -> Self {
        Self {
            settings,
            config,
            state: ConnectionState::Disconnected,
            attempted: false,
            authenticated: false,
            writer: None,
            inbound: None,
            reader: None,
            reassembler: Reassembler::new(),
            next_id: (random::<i32>() & 0x0fff_ffff).max(1),
        }
    }

    /// Construct a connection and drive it to `Ready`.
    ///
    /// # Errors
    /// Same as [`Connection::connect`].
    pub async fn open(settings: ConnectionSettings, config: RconConfig) -> Result<Self, RconError> {
        let mut connection = Self::new(settings, config);
        connection.connect().await?;
        Ok(connection)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The settings this connection was built with.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// The timeouts in effect.
    pub fn config(&self) -> &RconConfig {
        &self.config
    }

    /// Open the socket and authenticate.
    ///
    /// Does nothing if the connection is already `Ready`.
    ///
    /// # Errors
    /// Returns [`RconError::Connect`] if the socket could not be opened within
    /// the connect timeout, [`RconError::Authentication`] if the handshake
    /// failed, and [`RconError::NotConnected`] if this connection already went
    /// through a connect attempt.
    pub async fn connect(&mut self) -> Result<(), RconError> {
        if self.state == ConnectionState::Ready {
            return Ok(());
        }
        if self.attempted {
            return Err(RconError::NotConnected);
        }
        self.attempted = true;

        let addr = self.settings.addr();
        self.set_state(ConnectionState::Connecting);

        let connect_timeout = self.config.connect_timeout;
        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.set_state(ConnectionState::Failed);
                return Err(RconError::Connect { addr, source });
            }
            Err(_) => {
                self.set_state(ConnectionState::Failed);
                return Err(RconError::Connect {
                    addr,
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no connection within {connect_timeout:?}"),
                    ),
                });
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "could not set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.reader = Some(tokio::spawn(read_loop(read_half, tx)));
        self.writer = Some(write_half);
        self.inbound = Some(rx);

        self.set_state(ConnectionState::Authenticating);

        let auth_timeout = self.config.auth_timeout;
        let id = self.next_request_id();
        let result = timeout(auth_timeout, self.authenticate_raw(id))
            .await
            .unwrap_or(Err(AuthError::TimedOut(auth_timeout)));

        match result {
            Ok(()) => {
                self.authenticated = true;
                self.set_state(ConnectionState::Ready);
                info!(%addr, "authenticated");
                Ok(())
            }
            Err(err) => {
                warn!(%addr, %err, "authentication failed");
                self.fail();
                Err(err.into())
            }
        }
    }

    /// Run `command` and wait for its complete output.
    ///
    /// A response timeout fails only this command; the connection stays
    /// `Ready` and any fragments that arrive late are discarded.
    ///
    /// # Errors
    /// Returns [`RconError::NotConnected`] unless the connection is `Ready`
    /// ([`RconError::ConnectionLost`] if it was and has since failed),
    /// [`RconError::CommandTooLong`] if the command does not fit in a packet,
    /// [`RconError::ResponseTimeout`] if the terminator does not arrive in
    /// time, and [`RconError::ConnectionLost`] or [`RconError::Malformed`] if
    /// the socket breaks. The last two also move the connection to `Failed`.
    pub async fn execute(&mut self, command: &str) -> Result<CommandResult, RconError> {
        match self.state {
            ConnectionState::Ready => {}
            ConnectionState::Failed if self.authenticated => {
                return Err(RconError::ConnectionLost("connection already failed".into()))
            }
            _ => return Err(RconError::NotConnected),
        }

        if command.len() > MAX_COMMAND_LEN {
            return Err(RconError::CommandTooLong {
                len: command.len(),
                max: MAX_COMMAND_LEN,
            });
        }

        self.drain_stale()?;

        let id = self.next_request_id();
        let sentinel_id = self.next_request_id();
        self.reassembler.begin(id, sentinel_id, command);
        debug!(id, sentinel_id, command, "dispatching command");

        // The timer only starts once both frames are out, a write cut short
        // would leave the stream out of sync.
        if let Err(err) = self.send_frames(id, sentinel_id, command).await {
            warn!(%err, "connection failed while sending command");
            self.reassembler.discard();
            self.fail();
            return Err(RconError::ConnectionLost(err.to_string()));
        }

        let response_timeout = self.config.response_timeout;
        match timeout(response_timeout, self.collect()).await {
            Ok(Ok(result)) => {
                debug!(id, elapsed = ?result.elapsed, "command complete");
                Ok(result)
            }
            Ok(Err(err)) => {
                self.reassembler.discard();
                if err.is_fatal() {
                    warn!(%err, "connection failed during command");
                    self.fail();
                }
                Err(err)
            }
            Err(_) => {
                let fragments = self
                    .reassembler
                    .discard()
                    .map_or(0, |pending| pending.fragment_count());
                warn!(id, fragments, "response timed out");
                Err(RconError::ResponseTimeout(response_timeout))
            }
        }
    }

    /// Close the socket. Any partially assembled response is dropped.
    pub async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.shutdown().await {
                debug!(%err, "error shutting down socket");
            }
        }
        self.close_socket();
        self.reassembler.discard();

        if self.state != ConnectionState::Disconnected {
            info!(addr = %self.settings.addr(), "disconnected");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn authenticate_raw(&mut self, id: i32) -> Result<(), AuthError> {
        let packet = RconPacket::new(id, RconPacketType::Auth, self.settings.password.clone());
        self.write_frames(packet.bytes())
            .await
            .map_err(|err| AuthError::Handshake(err.to_string()))?;

        loop {
            let packet = match self.recv().await {
                Some(Inbound::Packet(packet)) => packet,
                Some(Inbound::Closed(reason)) => return Err(AuthError::Handshake(reason.to_string())),
                None => return Err(AuthError::Handshake("read loop stopped".into())),
            };

            match packet.packet_type {
                // Source servers send an empty RESPONSE_VALUE ahead of the auth
                // response.
                RconPacketType::ResponseValue => {
                    debug!(id = packet.id, "skipping pre-auth response");
                }
                RconPacketType::AuthResponse if packet.id < 0 => return Err(AuthError::Rejected),
                RconPacketType::AuthResponse => {
                    if packet.id != id {
                        debug!(sent = id, received = packet.id, "server assigned its own auth id");
                    }
                    return Ok(());
                }
                other => {
                    return Err(AuthError::Handshake(format!("unexpected {other:?} packet")));
                }
            }
        }
    }

    async fn send_frames(&mut self, id: i32, sentinel_id: i32, command: &str) -> io::Result<()> {
        let mut frames = BytesMut::new();
        frames.extend_from_slice(
            &RconPacket::new(id, RconPacketType::ExecCommand, command.to_owned()).bytes(),
        );
        frames.extend_from_slice(
            &RconPacket::new(sentinel_id, RconPacketType::ExecCommand, Bytes::new()).bytes(),
        );
        self.write_frames(frames.freeze()).await
    }

    async fn collect(&mut self) -> Result<CommandResult, RconError> {
        loop {
            match self.recv().await {
                Some(Inbound::Packet(packet)) => match self.reassembler.feed(packet) {
                    Feed::Complete(result) => return Ok(result),
                    Feed::Incomplete => {}
                    Feed::Stray(packet) => {
                        debug!(id = packet.id, "dropping stray packet");
                    }
                },
                Some(Inbound::Closed(reason)) => return Err(reason.into_error()),
                None => return Err(RconError::ConnectionLost("read loop stopped".into())),
            }
        }
    }

    /// Throw away anything that arrived while no command was pending, and
    /// notice if the socket closed in the meantime.
    fn drain_stale(&mut self) -> Result<(), RconError> {
        let Some(rx) = self.inbound.as_mut() else {
            return Err(RconError::NotConnected);
        };

        let mut closed = None;
        while let Ok(inbound) = rx.try_recv() {
            match inbound {
                Inbound::Packet(packet) => {
                    debug!(id = packet.id, "dropping stray packet");
                }
                Inbound::Closed(reason) => {
                    closed = Some(reason);
                    break;
                }
            }
        }

        match closed {
            Some(reason) => {
                warn!(%reason, "connection closed while idle");
                self.fail();
                Err(RconError::ConnectionLost(reason.to_string()))
            }
            None => Ok(()),
        }
    }

    async fn recv(&mut self) -> Option<Inbound> {
        match self.inbound.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn write_frames(&mut self, frames: Bytes) -> io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };

        writer.write_all(&frames).await?;
        writer.flush().await
    }

    fn fail(&mut self) {
        self.close_socket();
        self.set_state(ConnectionState::Failed);
    }

    fn close_socket(&mut self) {
        self.writer = None;
        self.inbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "connection state");
            self.state = state;
        }
    }

    /// Ids are positive and never reused within one connection's lifetime of
    /// practical length, so late fragments cannot match a newer request.
    fn next_request_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if id == i32::MAX { 1 } else { id + 1 };
        id
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Decode frames off the socket until it closes or the stream is corrupt.
async fn read_loop(mut socket: OwnedReadHalf, tx: mpsc::Sender<Inbound>) {
    let mut buf = BytesMut::with_capacity(MAX_PACKET_SIZE);

    let reason = loop {
        match packet::decode(&mut buf, Direction::Clientbound) {
            Ok(Some(packet)) => {
                debug!(
                    id = packet.id,
                    kind = ?packet.packet_type,
                    len = packet.body.len(),
                    "received packet"
                );
                if tx.send(Inbound::Packet(packet)).await.is_err() {
                    return;
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => break CloseReason::Malformed(err),
        }

        match socket.read_buf(&mut buf).await {
            Ok(0) => break CloseReason::Eof,
            Ok(_) => {}
            Err(err) => break CloseReason::Io(err),
        }
    };

    debug!(%reason, "read loop stopped");
    let _ = tx.send(Inbound::Closed(reason)).await;
}
