//! Async client for the [Source RCON](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol)
//! protocol used by game servers for remote administration.
//!
//! [`CommandClient`] is the main entry point: it holds one authenticated
//! connection, runs commands strictly in submission order and stitches
//! fragmented output back together. [`relay::send_command`] offers a
//! one-shot, connection-per-call alternative for stateless front-ends.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]

pub mod config;
pub mod errors;
pub mod rcon;
pub mod relay;
pub mod session;

pub use config::RconConfig;
pub use errors::RconError;
pub use rcon::{CommandClient, ConnectionSettings, ConnectionState};
pub use relay::{send_command, RconResponse};
