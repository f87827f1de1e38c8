//! Framing for the [Source RCON](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol)
//! wire format.
//!
//! ```text
//! | length: i32 LE | id: i32 LE | type: i32 LE | body ... | 0x00 | 0x00 |
//! ```
//!
//! `length` counts every byte after itself.

use super::MAX_FRAME_LEN;
use crate::errors::RconProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use std::mem::size_of;

/// Size of the id and type fields plus the two terminators.
pub const FRAME_OVERHEAD: usize = size_of::<i32>() * 2 + 2;

const LENGTH_PREFIX: usize = size_of::<i32>();

/// Which way a packet travels. Needed because type `2` means different things
/// in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Serverbound,
    /// Server to client.
    Clientbound,
}

/// The kind of an [`RconPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RconPacketType {
    /// `SERVERDATA_AUTH`, carries the password.
    Auth,
    /// `SERVERDATA_AUTH_RESPONSE`, id -1 signals a rejected password.
    AuthResponse,
    /// `SERVERDATA_EXECCOMMAND`, carries a command line.
    ExecCommand,
    /// `SERVERDATA_RESPONSE_VALUE`, one fragment of command output.
    ResponseValue,
}

impl RconPacketType {
    /// The direction packets of this type travel in.
    pub fn direction(self) -> Direction {
        match self {
            Self::Auth | Self::ExecCommand => Direction::Serverbound,
            Self::AuthResponse | Self::ResponseValue => Direction::Clientbound,
        }
    }

    /// Interpret a wire discriminant seen travelling in `direction`.
    ///
    /// # Errors
    /// Returns [`RconProtocolError::InvalidPacketType`] for values that are
    /// not defined for that direction.
    pub fn from_wire(value: i32, direction: Direction) -> Result<Self, RconProtocolError> {
        match (value, direction) {
            (0, Direction::Clientbound) => Ok(Self::ResponseValue),
            (2, Direction::Clientbound) => Ok(Self::AuthResponse),
            (2, Direction::Serverbound) => Ok(Self::ExecCommand),
            (3, Direction::Serverbound) => Ok(Self::Auth),
            _ => Err(RconProtocolError::InvalidPacketType(value)),
        }
    }
}

impl From<RconPacketType> for i32 {
    fn from(packet_type: RconPacketType) -> Self {
        match packet_type {
            RconPacketType::ResponseValue => 0,
            RconPacketType::AuthResponse | RconPacketType::ExecCommand => 2,
            RconPacketType::Auth => 3,
        }
    }
}

/// One frame of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    /// Caller-chosen id, echoed back by the server.
    pub id: i32,
    /// What the packet means.
    pub packet_type: RconPacketType,
    /// Payload, without the trailing terminators.
    pub body: Bytes,
}

impl RconPacket {
    /// Build a packet.
    pub fn new(id: i32, packet_type: RconPacketType, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// The body as text. Invalid UTF-8 is replaced rather than rejected, some
    /// servers prefix color codes that are not valid on their own.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Serialize into a complete frame.
    pub fn bytes(&self) -> Bytes {
        encode(self)
    }
}

/// Encode `packet` as one frame.
pub fn encode(packet: &RconPacket) -> Bytes {
    let mut bytes = BytesMut::with_capacity(LENGTH_PREFIX + FRAME_OVERHEAD + packet.body.len());

    bytes.put_i32_le(get_remaining_length(packet.body.len()));
    bytes.put_i32_le(packet.id);
    bytes.put_i32_le(packet.packet_type.into());
    bytes.put_slice(&packet.body);
    bytes.put_u16(0x00_00);

    bytes.freeze()
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` without touching `buf` when the frame is not complete
/// yet, so this can be called again after more bytes have been read. A frame
/// is only consumed once it has been fully validated; on error `buf` is left
/// as it was.
///
/// # Errors
/// Returns an [`RconProtocolError`] if the frame violates the wire format.
pub fn decode(
    buf: &mut BytesMut,
    direction: Direction,
) -> Result<Option<RconPacket>, RconProtocolError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }

    let mut prefix = &buf[..LENGTH_PREFIX];
    let len = prefix.get_i32_le();
    if len < FRAME_OVERHEAD as i32 || len > MAX_FRAME_LEN {
        return Err(RconProtocolError::LengthOutOfRange(len));
    }

    let frame_len = LENGTH_PREFIX + len as usize;
    if buf.len() < frame_len {
        return Ok(None);
    }

    if buf[frame_len - 2..frame_len] != [0, 0] {
        return Err(RconProtocolError::MissingTerminator);
    }

    let mut header = &buf[LENGTH_PREFIX..LENGTH_PREFIX + 8];
    let id = header.get_i32_le();
    let packet_type = RconPacketType::from_wire(header.get_i32_le(), direction)?;

    let mut frame = buf.split_to(frame_len).freeze();
    frame.advance(LENGTH_PREFIX + 8);
    let body = frame.slice(..frame.len() - 2);

    Ok(Some(RconPacket {
        id,
        packet_type,
        body,
    }))
}

/// Get the *remaining length* of a frame given the length of its body.
///
/// Remaining length here refers to the length of the frame in bytes excluding
/// the first four bytes which communicate this value: two [i32]s (id and
/// type), the body, and **TWO** 0 bytes (one closing the body string, one
/// closing the packet).
fn get_remaining_length(body_len: usize) -> i32 {
    (body_len + FRAME_OVERHEAD) as i32
}
