//! Codec for the runtime's multiplexed exec output stream.
//!
//! When a process runs without a TTY, the runtime interleaves its stdout and
//! stderr on one connection. Every frame starts with an 8-byte header:
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | stream |   0    |   0    |   0    |        payload length (u32 BE)    |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! followed by exactly `length` payload bytes. Frames may be split across or
//! coalesced within transport chunks, so [`FrameDecoder`] buffers input until
//! a full frame is available.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Logical stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    /// Runtime-side diagnostics emitted on the same connection.
    System,
}

impl StreamKind {
    /// Decode the stream id byte of a frame header.
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            3 => Ok(Self::System),
            other => Err(FrameError::UnknownStream(other)),
        }
    }

    /// The stream id byte written into a frame header.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
            Self::System => 3,
        }
    }
}

/// One demultiplexed chunk of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: StreamKind,
    pub payload: Bytes,
}

/// Errors raised while decoding the frame stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown stream id {0} in frame header")]
    UnknownStream(u8),

    #[error("stream ended inside a frame ({0} bytes left over)")]
    Truncated(usize),
}

/// Incremental decoder for the 8-byte-header frame format.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw transport bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, or `None` if more input is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = StreamKind::from_byte(self.buf[0])?;
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        tracing::trace!(stream = ?kind, len, "Decoded frame");
        Ok(Some(Frame { kind, payload }))
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Signal end of input; fails if a partial frame is still buffered.
    pub fn finish(self) -> Result<(), FrameError> {
        match self.buf.len() {
            0 => Ok(()),
            left => Err(FrameError::Truncated(left)),
        }
    }
}

/// Encode a single frame. Used by fakes and tests that stand in for the runtime.
pub fn encode_frame(kind: StreamKind, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u8(kind.as_byte());
    out.put_bytes(0, 3);
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(payload);
    out.freeze()
}
