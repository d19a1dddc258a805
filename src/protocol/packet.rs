//! Packet framing.
//!
//! A logical payload travels as one or more physical packets of at most
//! [`MAX_PAYLOAD_LEN`] bytes, each prefixed by a 4-byte header. A payload whose
//! length is an exact multiple of the maximum (including zero) ends with an
//! empty packet.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::MAX_PAYLOAD_LEN;
use crate::error::{Error, Result};

/// MySQL packet header (zero-copy)
///
/// Layout matches MySQL wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        let header = data.get(..4).ok_or(Error::UnexpectedEof)?;
        Self::ref_from_bytes(header).map_err(|_| Error::InvalidPacket)
    }
}

/// Sequence id bookkeeping for one command exchange.
///
/// Both directions share one counter: each packet written or read takes the
/// next id, wrapping at 255. The counter restarts at zero for every command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequenceId(u8);

impl SequenceId {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// The id the next packet must carry.
    pub fn peek(&self) -> u8 {
        self.0
    }

    /// Take the id for an outgoing packet.
    pub fn next_outgoing(&mut self) -> u8 {
        let id = self.0;
        self.0 = self.0.wrapping_add(1);
        id
    }

    /// Validate the id of an incoming packet.
    pub fn check_incoming(&mut self, received: u8) -> Result<()> {
        if received != self.0 {
            return Err(Error::ProtocolDesync {
                expected: self.0,
                received,
            });
        }
        self.0 = self.0.wrapping_add(1);
        Ok(())
    }
}

/// Physical chunks of a logical payload, in wire order.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a [u8],
    done: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.done {
            return None;
        }
        let len = self.rest.len().min(MAX_PAYLOAD_LEN);
        let (chunk, rest) = self.rest.split_at(len);
        self.rest = rest;
        if len < MAX_PAYLOAD_LEN {
            self.done = true;
        }
        Some(chunk)
    }
}

pub fn chunks(payload: &[u8]) -> Chunks<'_> {
    Chunks {
        rest: payload,
        done: false,
    }
}

/// Append the framed form of `payload` to `out`.
pub fn write_framed(out: &mut Vec<u8>, payload: &[u8], seq: &mut SequenceId) {
    for chunk in chunks(payload) {
        out.extend_from_slice(PacketHeader::encode(chunk.len(), seq.next_outgoing()).as_bytes());
        out.extend_from_slice(chunk);
    }
}

/// Reassemble one logical payload from the front of `wire` into `out`.
///
/// Returns the number of bytes consumed, or `None` if `wire` does not yet hold the
/// whole payload. `seq` and `out` are only modified when a payload completes.
pub fn read_framed(wire: &[u8], seq: &mut SequenceId, out: &mut Vec<u8>) -> Result<Option<usize>> {
    let mut cursor = 0;
    let mut next_seq = *seq;
    let mut ranges = Vec::new();
    loop {
        let Some(header) = wire.get(cursor..cursor + 4) else {
            return Ok(None);
        };
        let header = PacketHeader::from_bytes(header)?;
        next_seq.check_incoming(header.sequence_id)?;
        let start = cursor + 4;
        let end = start + header.length();
        if wire.len() < end {
            return Ok(None);
        }
        ranges.push(start..end);
        cursor = end;
        if header.length() < MAX_PAYLOAD_LEN {
            break;
        }
    }
    for range in ranges {
        out.extend_from_slice(&wire[range]);
    }
    *seq = next_seq;
    Ok(Some(cursor))
}

/// Frame `payload` into wire bytes.
pub fn frame(payload: &[u8], seq: &mut SequenceId) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4 * (payload.len() / MAX_PAYLOAD_LEN + 1));
    write_framed(&mut out, payload, seq);
    out
}

/// Reassemble the first logical payload of `wire`, returning it with the unread rest.
pub fn unframe<'a>(wire: &'a [u8], seq: &mut SequenceId) -> Result<(Vec<u8>, &'a [u8])> {
    let mut payload = Vec::new();
    match read_framed(wire, seq, &mut payload)? {
        Some(consumed) => Ok((payload, &wire[consumed..])),
        None => Err(Error::UnexpectedEof),
    }
}

/// OK packet payload (unparsed)
///
/// Layout: 0x00 (or 0xFE when it replaces EOF) followed by
/// - affected_rows: length-encoded integer
/// - last_insert_id: length-encoded integer
/// - status_flags: 2 bytes
/// - warnings: 2 bytes
/// - info: rest of packet
#[derive(Debug)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

impl OkPayloadBytes<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.0
    }
}

/// ERR packet payload (unparsed)
#[derive(Debug)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);
