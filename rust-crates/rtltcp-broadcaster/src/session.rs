//! Per-connection state

use std::io;
use std::net::SocketAddr;
use tokio::net::tcp::OwnedWriteHalf;
use uuid::Uuid;

/// Unique identifier handed to the connect and command hooks
pub type SessionId = Uuid;

/// Result of offering one segment to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Whole segment written
    Complete(usize),
    /// Socket took part of the segment; the tail is queued for the next write
    Deferred(usize),
    /// Client is behind. Only backlog bytes (if any) went out and the segment
    /// was skipped whole.
    Skipped(usize),
}

impl Delivery {
    pub(crate) fn written(self) -> usize {
        match self {
            Self::Complete(n) | Self::Deferred(n) | Self::Skipped(n) => n,
        }
    }
}

/// Server-side half of one client connection
///
/// The reader half lives in the session's own task. This struct holds the
/// write half and is owned by the server's session map, so sample writes are
/// serialized by the map lock.
///
/// A short write leaves the unsent tail in `backlog`. The tail is flushed
/// before any new segment and segments are only ever dropped whole, so the
/// client never sees a stream that resumes in the middle of an I/Q pair.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    backlog: Vec<u8>,
}

impl Session {
    pub(crate) fn new(id: SessionId, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            writer,
            backlog: Vec::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Non-blocking write of one segment
    ///
    /// Errors other than `WouldBlock` are returned as is.
    pub(crate) fn try_send(&mut self, segment: &[u8]) -> io::Result<Delivery> {
        let mut written = 0;

        if !self.backlog.is_empty() {
            match self.writer.try_write(&self.backlog) {
                Ok(n) => {
                    self.backlog.drain(..n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            if !self.backlog.is_empty() {
                return Ok(Delivery::Skipped(written));
            }
        }

        match self.writer.try_write(segment) {
            Ok(n) if n == segment.len() => Ok(Delivery::Complete(written + n)),
            Ok(n) => {
                self.backlog.extend_from_slice(&segment[n..]);
                Ok(Delivery::Deferred(written + n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Delivery::Skipped(written)),
            Err(e) => Err(e),
        }
    }
}

/// Why a session read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// Peer closed the stream
    Eof,
    /// Read failed
    ReadError,
    /// Command handler asked to close
    Handler,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eof => f.write_str("peer closed"),
            Self::ReadError => f.write_str("read error"),
            Self::Handler => f.write_str("closed by command handler"),
        }
    }
}
