//! Client-side wire protocol
//!
//! Frames are an 8-byte header followed by the body:
//!
//! ```text
//! command  ' '  length  '\n'  body
//! ```
//!
//! with the body length as ASCII decimal right-justified into five
//! space-padded bytes. Connections open with the 4-byte preamble `aav1`.

use crate::error::RapidmqClientError;
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Connection preamble: magic + protocol version.
pub const MAGIC: [u8; 4] = *b"aav1";
/// Fixed frame header size.
pub const HEAD_LENGTH: usize = 8;
/// Maximum frame body length.
pub const MAX_BODY_LENGTH: usize = 65523;

pub const MSG_ERROR: u8 = b'e';
pub const MSG_DATA: u8 = b'd';
pub const MSG_PUB: u8 = b'p';
pub const MSG_SUB: u8 = b's';
pub const MSG_ACK: u8 = b'a';
pub const MSG_NOOP: u8 = b'n';
pub const MSG_CLOSE: u8 = b'c';
pub const MSG_ID: u8 = b'i';
pub const MSG_KILL: u8 = b'k';

/// A complete wire frame, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(Bytes);

impl Message {
    pub fn command(&self) -> u8 {
        self.0[0]
    }

    pub fn body(&self) -> &[u8] {
        &self.0[HEAD_LENGTH..]
    }

    pub fn body_len(&self) -> usize {
        self.0.len() - HEAD_LENGTH
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Build a frame with the given command and body.
pub fn build_message(command: u8, body: &[u8]) -> Result<Message> {
    if body.len() > MAX_BODY_LENGTH {
        return Err(RapidmqClientError::MessageTooLarge {
            size: body.len(),
            max_size: MAX_BODY_LENGTH,
        });
    }
    let mut buf = BytesMut::with_capacity(HEAD_LENGTH + body.len());
    buf.put_u8(command);
    buf.put_u8(b' ');
    buf.put_slice(format!("{:5}", body.len()).as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(body);
    Ok(Message(buf.freeze()))
}

/// Build a `d` frame carrying `payload`.
pub fn data_message(payload: &[u8]) -> Result<Message> {
    build_message(MSG_DATA, payload)
}

/// Build a `p`/`s` frame for `"<kind> <name>"` targets.
pub fn bind_message(command: u8, kind: &str, name: &str) -> Result<Message> {
    build_message(command, format!("{} {}", kind, name).as_bytes())
}

/// Build an `i` frame carrying the client label.
pub fn id_message(name: &str) -> Result<Message> {
    build_message(MSG_ID, name.as_bytes())
}

/// Build a bare `c` frame.
pub fn close_message() -> Message {
    build_message(MSG_CLOSE, b"").expect("empty body fits a frame")
}

/// `Decoder`/`Encoder` for `Framed` transports.
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = RapidmqClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < HEAD_LENGTH {
            return Ok(None);
        }

        let body_len = decode_length(&src[2..7])?;
        if body_len > MAX_BODY_LENGTH {
            return Err(RapidmqClientError::protocol(format!(
                "frame body length {} exceeds maximum {}",
                body_len, MAX_BODY_LENGTH
            )));
        }

        let total = HEAD_LENGTH + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        Ok(Some(Message(src.split_to(total).freeze())))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = RapidmqClientError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

/// Parse the five-byte ASCII length field: leading spaces, then digits.
fn decode_length(field: &[u8]) -> Result<usize> {
    let mut pos = 0;
    while pos < field.len() && field[pos] == b' ' {
        pos += 1;
    }
    if pos == field.len() {
        return Err(RapidmqClientError::protocol(
            "frame length field is blank".to_string(),
        ));
    }
    let mut length = 0usize;
    for &b in &field[pos..] {
        if !b.is_ascii_digit() {
            return Err(RapidmqClientError::protocol(
                "frame length field is not a number".to_string(),
            ));
        }
        length = length * 10 + usize::from(b - b'0');
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_decode_round_trip() {
        let mut codec = FrameCodec;
        let msg = data_message(b"payload").unwrap();
        assert_eq!(msg.as_bytes(), b"d     7\npayload");

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn bind_message_layout() {
        let msg = bind_message(MSG_PUB, "queue", "orders").unwrap();
        assert_eq!(msg.command(), MSG_PUB);
        assert_eq!(msg.body(), b"queue orders");
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; MAX_BODY_LENGTH + 1];
        assert!(matches!(
            data_message(&payload),
            Err(RapidmqClientError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = FrameCodec;
        let msg = data_message(b"abcdef").unwrap();
        let wire = msg.as_bytes();

        let mut buf = BytesMut::from(&wire[..HEAD_LENGTH + 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[HEAD_LENGTH + 2..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), msg);
    }
}
