//! Mux frame codec.
//!
//! Wire format:
//! ```text
//! ┌─────────────┬──────────┬────────────┬──────────────────────┐
//! │ Size (4B)   │ Type (1B)│ Tag (3B)   │ Body (Size - 4 B)    │
//! │ BE u32      │ i8       │ BE u24     │                      │
//! └─────────────┴──────────┴────────────┴──────────────────────┘
//! ```
//!
//! `Size` counts everything after itself, so it is never below 4. The
//! decoder accumulates incoming bytes and yields complete frames: a single
//! socket read may return part of a header, part of a body, or several
//! frames back to back. Body bytes are only ever consumed by exact count.

use std::collections::VecDeque;
use std::fmt;

use crate::error::ProtocolError;

/// Size field width.
const SIZE_LEN: usize = 4;

/// Type + tag width, counted inside `Size`.
const TYPE_TAG_LEN: usize = 4;

/// Full fixed header width.
pub const HEADER_LEN: usize = SIZE_LEN + TYPE_TAG_LEN;

/// Largest tag the 24-bit field can carry.
pub const MAX_TAG: u32 = 0x00FF_FFFF;

/// Connection-scoped correlation id chosen by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mux message kinds. `T*` travel toward the server, `R*` back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Treq,
    Rreq,
    Tdispatch,
    Rdispatch,
    Tdrain,
    Rdrain,
    Tping,
    Rping,
    Tdiscarded,
    Rdiscarded,
    Tlease,
    Tinit,
    Rinit,
    Rerr,
    /// A code this implementation does not know.
    Unknown(i8),
}

impl MessageType {
    pub fn from_i8(code: i8) -> Self {
        match code {
            1 => Self::Treq,
            -1 => Self::Rreq,
            2 => Self::Tdispatch,
            -2 => Self::Rdispatch,
            64 => Self::Tdrain,
            -64 => Self::Rdrain,
            65 => Self::Tping,
            -65 => Self::Rping,
            66 => Self::Tdiscarded,
            -66 => Self::Rdiscarded,
            67 => Self::Tlease,
            68 => Self::Tinit,
            -68 => Self::Rinit,
            // 127 is the pre-standard Rerr code, still sent by old peers
            -128 | 127 => Self::Rerr,
            other => Self::Unknown(other),
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            Self::Treq => 1,
            Self::Rreq => -1,
            Self::Tdispatch => 2,
            Self::Rdispatch => -2,
            Self::Tdrain => 64,
            Self::Rdrain => -64,
            Self::Tping => 65,
            Self::Rping => -65,
            Self::Tdiscarded => 66,
            Self::Rdiscarded => -66,
            Self::Tlease => 67,
            Self::Tinit => 68,
            Self::Rinit => -68,
            Self::Rerr => -128,
            Self::Unknown(code) => code,
        }
    }

    /// `T` messages originate at the peer that starts the exchange.
    pub fn is_request(self) -> bool {
        self.as_i8() > 0
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(tag: Tag, message_type: MessageType, body: Vec<u8>) -> Self {
        Self {
            tag,
            message_type,
            body,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self.tag, self.message_type, &self.body)
    }
}

/// Build the 8-byte header for a frame carrying `body_len` bytes.
pub fn encode_header(
    tag: Tag,
    message_type: MessageType,
    body_len: usize,
) -> Result<[u8; HEADER_LEN], ProtocolError> {
    if tag.0 > MAX_TAG {
        return Err(ProtocolError::TagOutOfRange { tag: tag.0 });
    }
    let size = u32::try_from(body_len + TYPE_TAG_LEN)
        .map_err(|_| ProtocolError::BodyTooLarge { len: body_len })?;

    let mut header = [0u8; HEADER_LEN];
    header[..SIZE_LEN].copy_from_slice(&size.to_be_bytes());
    // type occupies the top byte of the second word, tag the low three
    let word = (u32::from(message_type.as_i8() as u8) << 24) | tag.0;
    header[SIZE_LEN..].copy_from_slice(&word.to_be_bytes());
    Ok(header)
}

/// Encode a complete frame: header followed by `body`.
pub fn encode_frame(
    tag: Tag,
    message_type: MessageType,
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let header = encode_header(tag, message_type, body.len())?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(body);
    Ok(out)
}

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading exactly `expected` body bytes.
    ReadingBody {
        tag: Tag,
        message_type: MessageType,
        expected: usize,
    },
    /// A protocol error was seen; the stream cannot be trusted any more.
    Failed(ProtocolError),
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; HEADER_LEN],
    body_buf: Vec<u8>,
    ready: VecDeque<Frame>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// `max_frame_size` bounds the declared size field (type + tag + body).
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; HEADER_LEN],
            body_buf: Vec::new(),
            ready: VecDeque::new(),
            max_frame_size,
        }
    }

    /// Feed bytes into the decoder. Completed frames are queued for
    /// [`next_frame`](Self::next_frame).
    ///
    /// Once a malformed header is seen every later call fails with the same
    /// error; the caller is expected to drop the connection.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::Failed(e) => return Err(*e),

                DecoderState::ReadingHeader { collected } => {
                    let needed = HEADER_LEN - *collected;
                    let to_copy = needed.min(data.len() - offset);

                    self.header_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == HEADER_LEN {
                        self.on_header()?;
                    }
                }

                DecoderState::ReadingBody { expected, .. } => {
                    let needed = *expected - self.body_buf.len();
                    let to_copy = needed.min(data.len() - offset);

                    self.body_buf
                        .extend_from_slice(&data[offset..offset + to_copy]);
                    offset += to_copy;

                    if self.body_buf.len() == *expected {
                        self.finish_frame();
                    }
                }
            }
        }

        if let DecoderState::Failed(e) = self.state {
            return Err(e);
        }
        Ok(())
    }

    /// Pop the oldest complete frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
        self.body_buf.clear();
        self.ready.clear();
    }

    fn on_header(&mut self) -> Result<(), ProtocolError> {
        let mut size = [0u8; SIZE_LEN];
        size.copy_from_slice(&self.header_buf[..SIZE_LEN]);
        let size = u32::from_be_bytes(size);

        if (size as usize) < TYPE_TAG_LEN {
            return Err(self.fail(ProtocolError::FrameTooShort { size }));
        }
        if size as usize > self.max_frame_size {
            return Err(self.fail(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }));
        }

        let mut word = [0u8; TYPE_TAG_LEN];
        word.copy_from_slice(&self.header_buf[SIZE_LEN..]);
        let word = u32::from_be_bytes(word);
        let message_type = MessageType::from_i8((word >> 24) as u8 as i8);
        let tag = Tag(word & MAX_TAG);
        let expected = size as usize - TYPE_TAG_LEN;

        self.body_buf = Vec::with_capacity(expected);
        self.state = DecoderState::ReadingBody {
            tag,
            message_type,
            expected,
        };
        if expected == 0 {
            self.finish_frame();
        }
        Ok(())
    }

    fn finish_frame(&mut self) {
        let state = std::mem::replace(
            &mut self.state,
            DecoderState::ReadingHeader { collected: 0 },
        );
        if let DecoderState::ReadingBody {
            tag, message_type, ..
        } = state
        {
            let body = std::mem::take(&mut self.body_buf);
            self.ready.push_back(Frame::new(tag, message_type, body));
        }
    }

    fn fail(&mut self, e: ProtocolError) -> ProtocolError {
        self.state = DecoderState::Failed(e);
        e
    }
}
