//! Remote command execution for game servers speaking
//! [Source RCON](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol).
//! See the documentation for [`CommandClient`] for more information.

mod client;
mod connection;
pub mod packet;
mod reassembler;

pub use client::CommandClient;
pub use connection::{Connection, ConnectionSettings, ConnectionState};
pub use reassembler::{CommandResult, Feed, PendingRequest, Reassembler};

/// Largest `length` field a Source server accepts in a serverbound packet.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Largest command body that fits in [`MAX_PACKET_SIZE`].
pub const MAX_COMMAND_LEN: usize = MAX_PACKET_SIZE - packet::FRAME_OVERHEAD;

/// Largest `length` field accepted from the wire. Some servers exceed the
/// 4096 byte packet limit on output, so this is generous; anything above it
/// means the stream is out of sync.
const MAX_FRAME_LEN: i32 = 1 << 20;
