//! # Peer Wire Messages
//!
//! Length-prefixed message framing for the peer wire protocol. Every frame
//! has the same shape:
//!
//! ```text
//! <length: u32 big-endian><id: u8><payload: [u8]>
//! ```
//!
//! A frame of length 0 carries no id and no payload: it is a keep-alive,
//! surfaced to callers as `None`.
//!
//! | ID | Name | Payload |
//! |----|------|---------|
//! | 0 | CHOKE | none |
//! | 1 | UNCHOKE | none |
//! | 2 | INTERESTED | none |
//! | 3 | NOT INTERESTED | none |
//! | 4 | HAVE | piece index |
//! | 5 | BITFIELD | availability bits |
//! | 6 | REQUEST | index, begin, length |
//! | 7 | PIECE | index, begin, block data |
//! | 8 | CANCEL | index, begin, length |

use std::io::{Cursor, Read};

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Message payload data
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a new message without a payload.
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a new message with a payload.
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Self {
        Message { id, payload }
    }

    /// Serialize the message: 4-byte big-endian length (`1 + payload`),
    /// then the id, then the payload.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let message_len = 1 + self.payload.len();

        let mut serialized: Vec<u8> = Vec::with_capacity(4 + message_len);
        serialized.write_u32::<BigEndian>(message_len as u32)?;
        serialized.push(self.id);
        serialized.extend_from_slice(&self.payload);

        Ok(serialized)
    }

    /// The serialized form of a keep-alive: a zero length and nothing else.
    pub fn keep_alive() -> Vec<u8> {
        vec![0; 4]
    }
}

/// Reads exactly one message frame from the stream.
///
/// Returns `Ok(None)` for a keep-alive. A stream that ends mid-frame is a
/// truncated frame error.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>> {
    let message_len = reader
        .read_u32::<BigEndian>()
        .map_err(|_| anyhow!("could not read message length from peer"))?
        as usize;

    if message_len == 0 {
        return Ok(None);
    }

    let mut message_buf: Vec<u8> = vec![0; message_len];
    reader
        .read_exact(&mut message_buf)
        .map_err(|_| anyhow!("truncated message frame from peer"))?;

    Ok(Some(Message {
        id: message_buf[0],
        payload: message_buf[1..].to_vec(),
    }))
}

/// Parses a PIECE message into the piece buffer.
///
/// The payload carries the piece index, the begin offset, and the block
/// data. The block is copied into `buf[begin..]`; the number of bytes
/// copied is returned.
pub fn parse_piece(index: u32, buf: &mut [u8], message: &Message) -> Result<usize> {
    if message.id != MESSAGE_PIECE {
        return Err(anyhow!("expected PIECE message, got id {}", message.id));
    }
    if message.payload.len() < 8 {
        return Err(anyhow!(
            "PIECE payload too short: {} bytes",
            message.payload.len()
        ));
    }

    let mut cursor = Cursor::new(&message.payload[0..8]);
    let parsed_index = cursor.read_u32::<BigEndian>()?;
    if parsed_index != index {
        return Err(anyhow!(
            "expected piece {}, got piece {}",
            index,
            parsed_index
        ));
    }

    let begin = cursor.read_u32::<BigEndian>()? as usize;
    if begin >= buf.len() {
        return Err(anyhow!("block offset {} is past the end of the piece", begin));
    }

    let data = &message.payload[8..];
    if begin + data.len() > buf.len() {
        return Err(anyhow!(
            "block of {} bytes at offset {} overflows the piece",
            data.len(),
            begin
        ));
    }

    buf[begin..begin + data.len()].copy_from_slice(data);

    Ok(data.len())
}

/// Parses a HAVE message into a piece index.
pub fn parse_have(message: &Message) -> Result<u32> {
    if message.id != MESSAGE_HAVE {
        return Err(anyhow!("expected HAVE message, got id {}", message.id));
    }
    if message.payload.len() != 4 {
        return Err(anyhow!(
            "HAVE payload must be 4 bytes, got {}",
            message.payload.len()
        ));
    }

    let mut cursor = Cursor::new(&message.payload);
    Ok(cursor.read_u32::<BigEndian>()?)
}
