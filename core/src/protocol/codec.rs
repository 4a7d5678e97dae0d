//! Frame decoding
//!
//! Two decoders share the header logic here:
//!
//! - [`FrameReader`] reads frames straight off an `AsyncRead` with its own
//!   growable buffer. Server sessions use it; its `read_message` performs at
//!   most one underlying read per call and reports "not ready" with
//!   `Ok(None)` so the caller's loop stays in control.
//! - [`FrameCodec`] implements `tokio_util::codec::{Decoder, Encoder}` for use
//!   with `Framed` streams on the client side and in tests.
//!
//! Length-field errors (`LengthNotDigit`, `LengthExceed`) are terminal for the
//! connection that produced them.

use super::{Message, HEAD_LENGTH, MAX_BODY_LENGTH};
use crate::{RapidmqError, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

/// Default preferred buffer size for [`FrameReader`].
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Free tail space below which the reader compacts before waiting for more
/// header bytes.
const COMPACT_THRESHOLD: usize = HEAD_LENGTH + 16;

/// Parse the five-byte ASCII length field: leading spaces, then digits.
fn decode_length(field: &[u8]) -> Result<usize> {
    debug_assert_eq!(field.len(), 5);
    let mut pos = 0;
    while pos < field.len() && field[pos] == b' ' {
        pos += 1;
    }
    if pos == field.len() {
        return Err(RapidmqError::LengthNotDigit);
    }
    let mut length = 0usize;
    for &b in &field[pos..] {
        if !b.is_ascii_digit() {
            return Err(RapidmqError::LengthNotDigit);
        }
        length = length * 10 + usize::from(b - b'0');
    }
    Ok(length)
}

/// Validate the header at the start of `buf` and return the total frame
/// length if the body length is acceptable. `buf` must hold at least
/// [`HEAD_LENGTH`] bytes.
fn frame_length(buf: &[u8]) -> Result<usize> {
    let body_len = decode_length(&buf[2..7])?;
    if body_len > MAX_BODY_LENGTH {
        return Err(RapidmqError::LengthExceed);
    }
    Ok(HEAD_LENGTH + body_len)
}

/// Streaming frame reader with incremental buffering.
///
/// Keeps live bytes between `start` and `end`. When the free tail shrinks the
/// live region is shifted back to offset zero, and the buffer grows to
/// `max(preferred, needed)` when a frame cannot fit at all.
pub struct FrameReader<R> {
    conn: R,
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    buffer_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(conn: R) -> Self {
        Self::with_capacity(conn, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(conn: R, size: usize) -> Self {
        let size = size.max(COMPACT_THRESHOLD);
        FrameReader {
            conn,
            buffer: vec![0u8; size],
            start: 0,
            end: 0,
            buffer_size: size,
        }
    }

    pub fn into_inner(self) -> R {
        self.conn
    }

    /// Compact the live region to offset zero and grow the buffer to at least
    /// `max(preferred, size)`.
    fn ensure_capacity(&mut self, size: usize) {
        let size = size.max(self.buffer_size);
        let mut tmp = vec![0u8; size];
        let live = self.end - self.start;
        tmp[..live].copy_from_slice(&self.buffer[self.start..self.end]);
        self.buffer = tmp;
        self.start = 0;
        self.end = live;
    }

    /// Try to carve the next complete frame out of the buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed, after making sure the
    /// free tail can make progress on the next read.
    fn next_frame(&mut self) -> Result<Option<Message>> {
        let available = self.end - self.start;
        if available < HEAD_LENGTH {
            if self.buffer.len() - self.end < COMPACT_THRESHOLD {
                self.ensure_capacity(DEFAULT_BUFFER_SIZE);
            }
            return Ok(None);
        }

        let total = frame_length(&self.buffer[self.start..])?;
        if total <= available {
            let frame = Bytes::copy_from_slice(&self.buffer[self.start..self.start + total]);
            self.start += total;
            return Ok(Some(Message::from_bytes_unchecked(frame)));
        }

        let residue = total - available;
        if residue > self.buffer.len() - self.end {
            self.ensure_capacity(total);
        }
        Ok(None)
    }

    /// Read the next frame.
    ///
    /// Performs at most one underlying read. `Ok(None)` means the frame is
    /// still incomplete and the caller should come back; `Ok(Some(_))` is the
    /// next frame in arrival order. A zero-length read maps to
    /// `UnexpectedEof`, which the session treats as the peer hanging up.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        if let Some(msg) = self.next_frame()? {
            return Ok(Some(msg));
        }

        let n = self.conn.read(&mut self.buffer[self.end..]).await?;
        if n == 0 {
            return Err(RapidmqError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }
        self.end += n;

        self.next_frame()
    }
}

/// `Decoder`/`Encoder` over the same header logic, for `Framed` transports.
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = RapidmqError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < HEAD_LENGTH {
            return Ok(None);
        }

        let total = frame_length(src)?;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total).freeze();
        Ok(Some(Message::from_bytes_unchecked(frame)))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = RapidmqError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
