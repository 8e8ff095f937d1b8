//! Protocol codec for encoding/decoding messages
//!
//! Handles type-length-value framing of messages over a byte stream.

use std::fmt;
use std::io;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Message;

/// Size of the type field in bytes
pub const TYPE_FIELD_SIZE: usize = 1;

/// Largest amount of buffer the stream reader grows by before data arrives
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Payload too large: {len} bytes (max: {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Width of the length field, fixed per deployment
///
/// Serialized as the number of bytes (`1`, `2` or `4`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LengthWidth {
    /// One byte, payloads up to 255 bytes
    #[default]
    U8,
    /// Two bytes big-endian, payloads up to 65535 bytes
    U16,
    /// Four bytes big-endian
    U32,
}

impl LengthWidth {
    /// Number of bytes occupied by the length field
    pub fn bytes(self) -> usize {
        match self {
            LengthWidth::U8 => 1,
            LengthWidth::U16 => 2,
            LengthWidth::U32 => 4,
        }
    }

    /// Total header size: type field plus length field
    pub fn header_len(self) -> usize {
        TYPE_FIELD_SIZE + self.bytes()
    }

    /// Largest payload length the field can represent
    pub fn max_payload(self) -> usize {
        match self {
            LengthWidth::U8 => u8::MAX as usize,
            LengthWidth::U16 => u16::MAX as usize,
            LengthWidth::U32 => u32::MAX as usize,
        }
    }

    /// Caller must have checked `len <= self.max_payload()`.
    fn put_len(self, buf: &mut BytesMut, len: usize) {
        match self {
            LengthWidth::U8 => buf.put_u8(len as u8),
            LengthWidth::U16 => buf.put_u16(len as u16),
            LengthWidth::U32 => buf.put_u32(len as u32),
        }
    }

    fn get_len(self, mut field: &[u8]) -> usize {
        match self {
            LengthWidth::U8 => field.get_u8() as usize,
            LengthWidth::U16 => field.get_u16() as usize,
            LengthWidth::U32 => field.get_u32() as usize,
        }
    }
}

impl TryFrom<u8> for LengthWidth {
    type Error = String;

    fn try_from(bytes: u8) -> Result<Self, Self::Error> {
        match bytes {
            1 => Ok(LengthWidth::U8),
            2 => Ok(LengthWidth::U16),
            4 => Ok(LengthWidth::U32),
            other => Err(format!(
                "unsupported length width: {} (expected 1, 2 or 4)",
                other
            )),
        }
    }
}

impl From<LengthWidth> for u8 {
    fn from(width: LengthWidth) -> Self {
        width.bytes() as u8
    }
}

impl fmt::Display for LengthWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte", self.bytes())
    }
}

/// Framing parameters shared by both peers of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    width: LengthWidth,
    max_payload: usize,
}

impl FrameFormat {
    pub fn new(width: LengthWidth) -> Self {
        Self {
            width,
            max_payload: width.max_payload(),
        }
    }

    /// Lower the payload limit below what the length field allows
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.min(self.width.max_payload());
        self
    }

    pub fn width(&self) -> LengthWidth {
        self.width
    }

    pub fn header_len(&self) -> usize {
        self.width.header_len()
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Fails with `PayloadTooLarge` if `len` exceeds the payload limit
    pub fn check_len(&self, len: usize) -> CodecResult<()> {
        if len > self.max_payload {
            return Err(CodecError::PayloadTooLarge {
                len,
                max: self.max_payload,
            });
        }
        Ok(())
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(LengthWidth::default())
    }
}

/// Encodes messages into the wire format
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    format: FrameFormat,
}

impl Encoder {
    pub fn new(format: FrameFormat) -> Self {
        Self { format }
    }

    /// Encode a message into a buffer
    ///
    /// On error nothing is appended to `buf`.
    pub fn encode(&self, message: &Message, buf: &mut BytesMut) -> CodecResult<()> {
        let len = message.payload.len();
        self.format.check_len(len)?;

        buf.reserve(self.format.header_len() + len);
        buf.put_u8(message.msg_type);
        self.format.width.put_len(buf, len);
        buf.put_slice(&message.payload);

        Ok(())
    }
}

/// Encode a single message into a freshly allocated buffer
pub fn encode(message: &Message, format: FrameFormat) -> CodecResult<BytesMut> {
    let mut buf = BytesMut::with_capacity(format.header_len() + message.payload.len());
    Encoder::new(format).encode(message, &mut buf)?;
    Ok(buf)
}

/// Decodes messages from the wire format
#[derive(Debug)]
pub struct Decoder {
    format: FrameFormat,
    state: DecodeState,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    #[default]
    Header,
    Payload {
        msg_type: u8,
        length: usize,
    },
}

impl Decoder {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            state: DecodeState::Header,
        }
    }

    /// Attempt to decode a message from the buffer
    /// Returns Ok(None) if more data is needed
    ///
    /// Only the bytes of the returned message are consumed; anything after
    /// it stays in `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> CodecResult<Option<Message>> {
        loop {
            match self.state {
                DecodeState::Header => {
                    let header_len = self.format.header_len();
                    if buf.len() < header_len {
                        return Ok(None);
                    }

                    let msg_type = buf[0];
                    let length = self.format.width.get_len(&buf[TYPE_FIELD_SIZE..header_len]);
                    self.format.check_len(length)?;

                    buf.advance(header_len);
                    self.state = DecodeState::Payload { msg_type, length };
                }
                DecodeState::Payload { msg_type, length } => {
                    if buf.len() < length {
                        return Ok(None);
                    }

                    let payload = buf.split_to(length).freeze();
                    self.state = DecodeState::Header;

                    return Ok(Some(Message::new(msg_type, payload)));
                }
            }
        }
    }

    /// Decode once the stream has ended
    ///
    /// Leftover bytes or a half-read frame mean the peer closed mid-message.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> CodecResult<Option<Message>> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if self.is_idle() && buf.is_empty() => Ok(None),
            None => Err(CodecError::UnexpectedEndOfStream),
        }
    }

    /// How many more bytes the current frame needs beyond `buffered`
    pub fn bytes_needed(&self, buffered: usize) -> usize {
        match self.state {
            DecodeState::Header => self.format.header_len().saturating_sub(buffered),
            DecodeState::Payload { length, .. } => length.saturating_sub(buffered),
        }
    }

    /// True when no part of a frame has been consumed yet
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Header
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(FrameFormat::default())
    }
}

/// Read exactly one message from a stream
///
/// Returns Ok(None) if the stream closes cleanly before the first header
/// byte. Reads are sized to the frame so no byte past the message is
/// consumed from `reader`, and the payload buffer grows in chunks of at most
/// [`READ_CHUNK_SIZE`] as bytes arrive rather than up front.
pub async fn read_message<R>(reader: &mut R, format: FrameFormat) -> CodecResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Decoder::new(format);
    let mut buf = BytesMut::with_capacity(format.header_len());

    loop {
        if let Some(message) = decoder.decode(&mut buf)? {
            return Ok(Some(message));
        }

        let start = buf.len();
        let end = start + decoder.bytes_needed(start).min(READ_CHUNK_SIZE);
        buf.resize(end, 0);

        let mut filled = start;
        while filled < end {
            let n = reader.read(&mut buf[filled..end]).await?;
            if n == 0 {
                buf.truncate(filled);
                return decoder.decode_eof(&mut buf);
            }
            filled += n;
        }
    }
}

/// Read exactly one message, treating any end of stream as an error
pub async fn decode_from<R>(reader: &mut R, format: FrameFormat) -> CodecResult<Message>
where
    R: AsyncRead + Unpin,
{
    read_message(reader, format)
        .await?
        .ok_or(CodecError::UnexpectedEndOfStream)
}

/// Encode and write a whole message, returning the number of bytes written
///
/// The payload length is validated before any byte reaches `writer`.
pub async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    format: FrameFormat,
) -> CodecResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode(message, format)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(buf.len())
}
