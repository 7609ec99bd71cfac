use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite, LinesCodec};

use crate::error::TransportError;

/// Longest line accepted from a peer before the connection is faulted.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

const LINE_BREAKS: &[char] = &['\n', '\r'];

pub type MessageReader<R> = FramedRead<R, ChatCodec>;
pub type MessageWriter<W> = FramedWrite<W, ChatCodec>;

/// Newline-delimited UTF-8 framing. One line is one chat message, which
/// keeps the wire usable from netcat-style tools.
#[derive(Debug, Clone)]
pub struct ChatCodec {
    lines: LinesCodec,
}

impl ChatCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_MESSAGE_LEN),
        }
    }
}

impl Default for ChatCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChatCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        Ok(self.lines.decode(src)?)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        Ok(self.lines.decode_eof(src)?)
    }
}

impl<T: AsRef<str>> Encoder<T> for ChatCodec {
    type Error = TransportError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), TransportError> {
        let text = item.as_ref();
        ensure_single_line(text)?;
        Ok(self.lines.encode(text, dst)?)
    }
}

/// Rejects text that would be split into several frames on the wire.
pub fn ensure_single_line(text: &str) -> Result<(), TransportError> {
    if text.contains(LINE_BREAKS) {
        return Err(TransportError::InvalidMessage);
    }
    Ok(())
}

pub fn reader<R: AsyncRead>(inner: R) -> MessageReader<R> {
    FramedRead::new(inner, ChatCodec::new())
}

pub fn writer<W: AsyncWrite>(inner: W) -> MessageWriter<W> {
    FramedWrite::new(inner, ChatCodec::new())
}
