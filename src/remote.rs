//! Cross-node operation control messages.
//!
//! Operations can be cancelled or re-prioritized from any node that knows
//! their finish event. When the operation lives elsewhere, the operation
//! table sends one of the messages below to the node that owns it.
//!
//! - **No state shipping**: messages name the operation only by its finish
//!   event. The receiving node resolves it through its own table.
//! - **Opaque reasons**: the cancellation reason travels as a payload blob
//!   next to the message and is never interpreted in transit.
//!
//! # Wire format
//!
//! ```text
//! cancel:   [0x01][event: 16][reason_len: u32 LE][reason bytes]
//! priority: [0x02][event: 16][priority: i32 LE]
//! ```

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::{CancelOutcome, OperationTable};
use crate::types::{Event, NodeId};
use core::fmt;
use thiserror::Error as ThisError;
use tracing::{debug, trace};

const TAG_CANCEL: u8 = 0x01;
const TAG_SET_PRIORITY: u8 = 0x02;

/// Largest cancellation reason carried in a frame.
pub const MAX_REASON_LEN: usize = 8 * 1024 * 1024;

/// Asks the receiving node to cancel the operation completing `finish_event`.
///
/// The reason travels as the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOperationMessage {
    /// Finish event of the operation to cancel.
    pub finish_event: Event,
}

impl CancelOperationMessage {
    /// Handles a cancellation received from `sender`.
    ///
    /// The request is resolved through the local table. An event unknown to
    /// the receiver is parked there rather than forwarded again, so a
    /// cancellation never bounces between nodes.
    pub fn handle_message(
        table: &OperationTable,
        sender: NodeId,
        message: &Self,
        payload: &[u8],
    ) -> Result<CancelOutcome> {
        debug!(
            %sender,
            finish_event = %message.finish_event,
            reason_len = payload.len(),
            "remote cancellation received"
        );
        table.request_cancellation_from_remote(message.finish_event, payload)
    }
}

/// Forwards a priority change to the node running the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPriorityMessage {
    /// Finish event of the operation.
    pub finish_event: Event,
    /// New priority.
    pub priority: i32,
}

impl SetPriorityMessage {
    /// Handles a priority change received from `sender`.
    pub fn handle_message(table: &OperationTable, sender: NodeId, message: &Self) -> Result<bool> {
        trace!(
            %sender,
            finish_event = %message.finish_event,
            priority = message.priority,
            "remote priority change received"
        );
        table.set_priority(message.finish_event, message.priority)
    }
}

/// Any operation control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMessage {
    /// See [`CancelOperationMessage`].
    Cancel(CancelOperationMessage),
    /// See [`SetPriorityMessage`].
    SetPriority(SetPriorityMessage),
}

impl OperationMessage {
    /// Returns the finish event the message refers to.
    #[must_use]
    pub const fn finish_event(&self) -> Event {
        match self {
            Self::Cancel(m) => m.finish_event,
            Self::SetPriority(m) => m.finish_event,
        }
    }
}

impl fmt::Display for OperationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel(m) => write!(f, "cancel {}", m.finish_event),
            Self::SetPriority(m) => write!(f, "priority {} -> {}", m.finish_event, m.priority),
        }
    }
}

/// Outbound side of the node-to-node channel used by the operation table.
pub trait OperationTransport: Send + Sync {
    /// Returns the node this transport sends from.
    fn local_node(&self) -> NodeId;

    /// Sends `message` with `payload` to `target`.
    fn send(&self, target: NodeId, message: OperationMessage, payload: Vec<u8>) -> Result<()>;
}

/// Transport for single-node deployments; every send fails.
#[derive(Debug, Clone, Copy)]
pub struct LocalOnlyTransport {
    node: NodeId,
}

impl LocalOnlyTransport {
    /// Creates a transport for `node`.
    #[must_use]
    pub const fn new(node: NodeId) -> Self {
        Self { node }
    }
}

impl OperationTransport for LocalOnlyTransport {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn send(&self, target: NodeId, _message: OperationMessage, _payload: Vec<u8>) -> Result<()> {
        Err(Error::node_unavailable(target))
    }
}

/// Errors from encoding or decoding an operation message frame.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum MessageCodecError {
    /// A cancellation reason exceeds [`MAX_REASON_LEN`].
    #[error("reason payload too large: {size} bytes (max {MAX_REASON_LEN})")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
    },
    /// The frame ended early.
    #[error("frame truncated: needed {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },
    /// The first byte is not a known message tag.
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    /// Bytes remain after the message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

impl From<MessageCodecError> for Error {
    fn from(err: MessageCodecError) -> Self {
        Self::new(ErrorKind::ProtocolError)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Encodes `message` and its payload into a frame.
///
/// Fails rather than truncating when the payload exceeds [`MAX_REASON_LEN`].
pub fn encode(
    message: &OperationMessage,
    payload: &[u8],
) -> core::result::Result<Vec<u8>, MessageCodecError> {
    match message {
        OperationMessage::Cancel(m) => {
            let len = reason_len(payload.len())?;
            let mut frame = Vec::with_capacity(1 + Event::ENCODED_LEN + 4 + payload.len());
            frame.push(TAG_CANCEL);
            frame.extend_from_slice(&m.finish_event.to_bytes());
            frame.extend_from_slice(&len.to_le_bytes());
            frame.extend_from_slice(payload);
            Ok(frame)
        }
        OperationMessage::SetPriority(m) => {
            let mut frame = Vec::with_capacity(1 + Event::ENCODED_LEN + 4);
            frame.push(TAG_SET_PRIORITY);
            frame.extend_from_slice(&m.finish_event.to_bytes());
            frame.extend_from_slice(&m.priority.to_le_bytes());
            Ok(frame)
        }
    }
}

fn reason_len(size: usize) -> core::result::Result<u32, MessageCodecError> {
    if size > MAX_REASON_LEN {
        return Err(MessageCodecError::PayloadTooLarge { size });
    }
    u32::try_from(size).map_err(|_| MessageCodecError::PayloadTooLarge { size })
}

/// Decodes a frame produced by [`encode`].
pub fn decode(frame: &[u8]) -> core::result::Result<(OperationMessage, Vec<u8>), MessageCodecError> {
    let mut reader = Reader { buf: frame, pos: 0 };
    let tag = reader.take(1)?[0];
    let event = reader.event()?;
    let decoded = match tag {
        TAG_CANCEL => {
            let len = reader.u32()? as usize;
            if len > MAX_REASON_LEN {
                return Err(MessageCodecError::PayloadTooLarge { size: len });
            }
            let payload = reader.take(len)?.to_vec();
            (
                OperationMessage::Cancel(CancelOperationMessage {
                    finish_event: event,
                }),
                payload,
            )
        }
        TAG_SET_PRIORITY => {
            let priority = reader.i32()?;
            (
                OperationMessage::SetPriority(SetPriorityMessage {
                    finish_event: event,
                    priority,
                }),
                Vec::new(),
            )
        }
        other => return Err(MessageCodecError::UnknownTag(other)),
    };
    match frame.len() - reader.pos {
        0 => Ok(decoded),
        extra => Err(MessageCodecError::TrailingBytes(extra)),
    }
}

/// Routes a received message to its handler.
pub fn dispatch(
    table: &OperationTable,
    sender: NodeId,
    message: &OperationMessage,
    payload: &[u8],
) -> Result<()> {
    match message {
        OperationMessage::Cancel(m) => {
            CancelOperationMessage::handle_message(table, sender, m, payload).map(|_| ())
        }
        OperationMessage::SetPriority(m) => {
            SetPriorityMessage::handle_message(table, sender, m).map(|_| ())
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> core::result::Result<&'a [u8], MessageCodecError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        let Some(end) = end else {
            return Err(MessageCodecError::Truncated {
                needed: self.pos.saturating_add(n),
                got: self.buf.len(),
            });
        };
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> core::result::Result<u32, MessageCodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> core::result::Result<i32, MessageCodecError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn event(&mut self) -> core::result::Result<Event, MessageCodecError> {
        let got = self.buf.len();
        let bytes = self.take(Event::ENCODED_LEN)?;
        Event::from_bytes(bytes).ok_or(MessageCodecError::Truncated {
            needed: self.pos,
            got,
        })
    }
}
