//! Recombines fragmented command output.
//!
//! Long output can be split over several `RESPONSE_VALUE` packets and the
//! protocol has no end-of-response marker. Every command is therefore followed
//! by an empty `EXECCOMMAND` with its own id (the sentinel). Servers answer in
//! order, so once the empty response carrying the sentinel id shows up, every
//! fragment of the real command has already been read.

use super::packet::{RconPacket, RconPacketType};
use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// The finished output of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// The command line that was run.
    pub command: String,
    /// All fragments concatenated in arrival order.
    pub output: String,
    /// When the result was assembled.
    pub timestamp: SystemTime,
    /// Time from dispatch to the terminator arriving.
    pub elapsed: Duration,
}

/// A command whose output is still arriving.
#[derive(Debug)]
pub struct PendingRequest {
    id: i32,
    sentinel_id: i32,
    command: String,
    issued_at: Instant,
    fragments: Vec<Bytes>,
}

impl PendingRequest {
    /// Id of the real command.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Id of the empty command sent after it.
    pub fn sentinel_id(&self) -> i32 {
        self.sentinel_id
    }

    /// When the command was dispatched.
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Number of fragments collected so far.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    fn finish(self) -> CommandResult {
        let total = self.fragments.iter().map(Bytes::len).sum();
        let mut joined = BytesMut::with_capacity(total);
        for fragment in &self.fragments {
            joined.extend_from_slice(fragment);
        }

        CommandResult {
            command: self.command,
            output: String::from_utf8_lossy(&joined).into_owned(),
            timestamp: SystemTime::now(),
            elapsed: self.issued_at.elapsed(),
        }
    }
}

/// Outcome of feeding one packet to the [`Reassembler`].
#[derive(Debug)]
pub enum Feed {
    /// The packet was a fragment of the pending command, or a non-terminating
    /// sentinel echo. More is expected.
    Incomplete,
    /// The terminator arrived; here is the full output.
    Complete(CommandResult),
    /// The packet belongs to nothing that is pending and was dropped.
    Stray(RconPacket),
}

/// Holds at most one [`PendingRequest`] and routes incoming packets into it.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<PendingRequest>,
}

impl Reassembler {
    /// Create an idle reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting output for `command`, sent with `id` and followed by a
    /// sentinel sent with `sentinel_id`. Any previous request is discarded.
    pub fn begin(&mut self, id: i32, sentinel_id: i32, command: &str) {
        if let Some(old) = self.pending.take() {
            debug!(id = old.id, "discarding unfinished request");
        }

        self.pending = Some(PendingRequest {
            id,
            sentinel_id,
            command: command.to_string(),
            issued_at: Instant::now(),
            fragments: Vec::new(),
        });
    }

    /// The request currently being assembled, if any.
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Drop the pending request along with any partial output.
    pub fn discard(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    /// Route one packet read from the server.
    pub fn feed(&mut self, packet: RconPacket) -> Feed {
        let Some(pending) = self.pending.as_mut() else {
            return Feed::Stray(packet);
        };

        if packet.packet_type != RconPacketType::ResponseValue {
            return Feed::Stray(packet);
        }

        if packet.id == pending.id {
            pending.fragments.push(packet.body);
            return Feed::Incomplete;
        }

        if packet.id == pending.sentinel_id {
            // Some servers echo the empty command back with a non-empty body
            // before (or after) the real terminator.
            if !packet.body.is_empty() {
                return Feed::Incomplete;
            }

            return match self.pending.take() {
                Some(pending) => Feed::Complete(pending.finish()),
                None => Feed::Stray(packet),
            };
        }

        Feed::Stray(packet)
    }
}
