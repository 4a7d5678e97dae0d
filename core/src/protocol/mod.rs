//! # RapidMQ Wire Protocol
//!
//! Every connection starts with the 4-byte preamble `aav1` (magic + protocol
//! version). After that the stream is a sequence of frames:
//!
//! ```text
//! command  ' '  length  '\n'  body
//! ```
//!
//! - `command` is a single byte (see the `MSG_*` constants)
//! - `length` is the body length as ASCII decimal, right-justified into five
//!   bytes and padded with spaces; byte 1 of the header is always a space
//! - byte 7 is always `'\n'`
//! - `body` is 0..=65523 raw bytes, so a whole frame never exceeds 65535 bytes
//!
//! The verbose ASCII length makes captures human-auditable while keeping the
//! header fixed-width, so the decoder never needs a second parse pass.
//!
//! ## Modules
//!
//! - [`codec`] - the streaming [`FrameReader`] used by server sessions and the
//!   [`FrameCodec`] used with `tokio_util::codec::Framed`

pub mod codec;

pub use codec::{FrameCodec, FrameReader};

use crate::{RapidmqError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Maximum size of anything a connection carries in one unit, preamble
/// included.
pub const MAX_ENVELOPE_LENGTH: usize = 65535;
/// Maximum frame body length (`65535 - 12`: preamble + header).
pub const MAX_BODY_LENGTH: usize = 65523;
/// Fixed frame header size.
pub const HEAD_LENGTH: usize = 8;
/// Connection preamble: magic + protocol version.
pub const MAGIC: [u8; 4] = *b"aav1";

pub const MSG_ERROR: u8 = b'e';
pub const MSG_DATA: u8 = b'd';
pub const MSG_PUB: u8 = b'p';
pub const MSG_SUB: u8 = b's';
pub const MSG_ACK: u8 = b'a';
pub const MSG_NOOP: u8 = b'n';
pub const MSG_CLOSE: u8 = b'c';
pub const MSG_ID: u8 = b'i';
pub const MSG_KILL: u8 = b'k';

/// Human-readable command name for logging.
pub fn command_name(cmd: u8) -> &'static str {
    match cmd {
        MSG_ERROR => "error",
        MSG_DATA => "data",
        MSG_PUB => "pub",
        MSG_SUB => "sub",
        MSG_ACK => "ack",
        MSG_NOOP => "noop",
        MSG_CLOSE => "close",
        MSG_ID => "id",
        MSG_KILL => "kill",
        _ => "unknown",
    }
}

/// A complete wire frame: the 8-byte header plus the body.
///
/// Backed by [`Bytes`], so cloning a message for topic fan-out only bumps a
/// reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(Bytes);

impl Message {
    /// Wrap raw frame bytes that have already been validated by a codec.
    pub(crate) fn from_bytes_unchecked(frame: Bytes) -> Self {
        debug_assert!(frame.len() >= HEAD_LENGTH);
        Message(frame)
    }

    pub fn command(&self) -> u8 {
        self.0[0]
    }

    pub fn body(&self) -> &[u8] {
        &self.0[HEAD_LENGTH..]
    }

    pub fn body_len(&self) -> usize {
        self.0.len() - HEAD_LENGTH
    }

    /// The full frame, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Incremental frame builder.
///
/// The header is laid down first with a blank length field; [`build`]
/// backfills the ASCII length once the body is complete. Appending past
/// [`MAX_BODY_LENGTH`] fails with `LengthExceed`, so `build` itself cannot
/// overflow.
///
/// [`build`]: MessageBuilder::build
pub struct MessageBuilder {
    buf: BytesMut,
}

impl MessageBuilder {
    pub fn new(command: u8) -> Self {
        Self::with_capacity(command, 64)
    }

    pub fn with_capacity(command: u8, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(HEAD_LENGTH + capacity);
        buf.put_u8(command);
        buf.put_slice(b"      \n");
        MessageBuilder { buf }
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        if self.buf.len() - HEAD_LENGTH + bytes.len() > MAX_BODY_LENGTH {
            return Err(RapidmqError::LengthExceed);
        }
        self.buf.put_slice(bytes);
        Ok(self)
    }

    pub fn build(mut self) -> Message {
        let length = self.buf.len() - HEAD_LENGTH;
        let field = format!("{:5}", length);
        self.buf[2..7].copy_from_slice(field.as_bytes());
        Message(self.buf.freeze())
    }
}

/// Build a `d` frame carrying `body`.
pub fn data_message(body: &[u8]) -> Result<Message> {
    let mut builder = MessageBuilder::with_capacity(MSG_DATA, body.len());
    builder.append(body)?;
    Ok(builder.build())
}

/// Build an `e` frame carrying `text`, truncating oversized error text rather
/// than failing.
pub fn error_message(text: &str) -> Message {
    let body = text.as_bytes();
    let body = &body[..body.len().min(MAX_BODY_LENGTH)];
    let mut builder = MessageBuilder::with_capacity(MSG_ERROR, body.len());
    builder
        .append(body)
        .expect("truncated error body fits a frame");
    builder.build()
}

/// The constant `a` frame sent to acknowledge a bind or close.
pub fn ack_message() -> Message {
    MessageBuilder::with_capacity(MSG_ACK, 0).build()
}

/// The constant `n` heartbeat frame.
pub fn noop_message() -> Message {
    MessageBuilder::with_capacity(MSG_NOOP, 0).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_small_body() {
        let msg = data_message(b"hello").unwrap();
        assert_eq!(msg.as_bytes(), b"d     5\nhello");
        assert_eq!(msg.command(), MSG_DATA);
        assert_eq!(msg.body(), b"hello");
    }

    #[test]
    fn header_layout_all_digit_widths() {
        for (len, field) in [
            (0usize, b"    0".as_slice()),
            (7, b"    7"),
            (42, b"   42"),
            (999, b"  999"),
            (1000, b" 1000"),
            (65523, b"65523"),
        ] {
            let body = vec![b'x'; len];
            let msg = data_message(&body).unwrap();
            assert_eq!(&msg.as_bytes()[2..7], field, "length {}", len);
            assert_eq!(msg.as_bytes()[1], b' ');
            assert_eq!(msg.as_bytes()[7], b'\n');
            assert_eq!(msg.body_len(), len);
        }
    }

    #[test]
    fn body_length_boundary() {
        assert!(data_message(&vec![0u8; MAX_BODY_LENGTH]).is_ok());
        assert!(matches!(
            data_message(&vec![0u8; MAX_BODY_LENGTH + 1]),
            Err(RapidmqError::LengthExceed)
        ));
    }

    #[test]
    fn append_accumulates_and_checks_overflow() {
        let mut builder = MessageBuilder::new(MSG_DATA);
        builder.append(b"abc").unwrap();
        builder.append(b"def").unwrap();
        let msg = builder.build();
        assert_eq!(msg.body(), b"abcdef");

        let mut builder = MessageBuilder::new(MSG_DATA);
        builder.append(&vec![0u8; MAX_BODY_LENGTH]).unwrap();
        assert!(matches!(
            builder.append(b"x"),
            Err(RapidmqError::LengthExceed)
        ));
    }

    #[test]
    fn control_frames_are_bare_headers() {
        assert_eq!(ack_message().as_bytes(), b"a     0\n");
        assert_eq!(noop_message().as_bytes(), b"n     0\n");
        let err = error_message("state error.");
        assert_eq!(err.command(), MSG_ERROR);
        assert_eq!(err.body(), b"state error.");
    }
}
