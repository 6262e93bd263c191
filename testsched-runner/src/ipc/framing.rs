// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chunk framing for messages sent over the shared result channel.
//!
//! A message is split into chunks that each fit in one channel slot. Every chunk starts with a
//! 16-byte [`MessageHeader`] in host byte order:
//!
//! | offset | field             |
//! |--------|-------------------|
//! | 0      | `sequence_number` |
//! | 4      | `chunk_count`     |
//! | 8      | `chunk_number`    |
//! | 12     | `total_bytes`     |
//!
//! `total_bytes` is the length of the whole message payload. Every chunk except the last carries
//! exactly `chunk_capacity` payload bytes, and the last carries the remainder.

use crate::errors::{ChannelError, MalformedHeaderReason};
use std::collections::HashMap;
use tracing::warn;

/// The length of a serialized [`MessageHeader`].
pub const HEADER_LEN: usize = 16;

/// The smallest allowed slot size: room for a header and at least as many payload bytes.
pub const MIN_SLOT_SIZE: usize = 2 * HEADER_LEN;

/// Partial messages lagging the newest sequence number by more than this are abandoned.
const STALE_WINDOW: u32 = 16;

/// The header at the start of every chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    /// Identifies the message. Wraps around after `u32::MAX`.
    pub sequence_number: u32,

    /// The number of chunks in the message. Always at least 1.
    pub chunk_count: u32,

    /// The 0-based index of this chunk.
    pub chunk_number: u32,

    /// The length of the whole message payload.
    pub total_bytes: u32,
}

impl MessageHeader {
    /// Serializes the header.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.sequence_number.to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.chunk_count.to_ne_bytes());
        bytes[8..12].copy_from_slice(&self.chunk_number.to_ne_bytes());
        bytes[12..16].copy_from_slice(&self.total_bytes.to_ne_bytes());
        bytes
    }

    /// Parses and validates the header at the start of `entry`, returning it along with the
    /// chunk payload.
    pub fn parse(
        entry: &[u8],
        chunk_capacity: usize,
    ) -> Result<(Self, &[u8]), MalformedHeaderReason> {
        let Some((header, payload)) = entry.split_first_chunk::<HEADER_LEN>() else {
            return Err(MalformedHeaderReason::Truncated { len: entry.len() });
        };
        let field = |at: usize| {
            u32::from_ne_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let header = Self {
            sequence_number: field(0),
            chunk_count: field(4),
            chunk_number: field(8),
            total_bytes: field(12),
        };

        if header.chunk_count == 0 {
            return Err(MalformedHeaderReason::ZeroChunkCount);
        }
        if header.chunk_number >= header.chunk_count {
            return Err(MalformedHeaderReason::ChunkNumberOutOfRange {
                chunk_number: header.chunk_number,
                chunk_count: header.chunk_count,
            });
        }
        let expected_count = chunk_count_for(header.total_bytes as usize, chunk_capacity);
        if expected_count != header.chunk_count as usize {
            return Err(MalformedHeaderReason::TotalBytesMismatch {
                total_bytes: header.total_bytes,
                chunk_count: header.chunk_count,
            });
        }
        let expected = header.payload_len(chunk_capacity);
        if payload.len() != expected {
            return Err(MalformedHeaderReason::PayloadLengthMismatch {
                expected,
                actual: payload.len(),
            });
        }

        Ok((header, payload))
    }

    /// The number of payload bytes this chunk carries.
    fn payload_len(&self, chunk_capacity: usize) -> usize {
        let total = self.total_bytes as usize;
        if self.chunk_number + 1 < self.chunk_count {
            chunk_capacity
        } else {
            total - chunk_capacity * (self.chunk_count as usize - 1)
        }
    }
}

/// Returns the number of chunks needed for a payload of `total_bytes`.
pub fn chunk_count_for(total_bytes: usize, chunk_capacity: usize) -> usize {
    total_bytes.div_ceil(chunk_capacity).max(1)
}

/// Splits `payload` into framed chunks, each at most `HEADER_LEN + chunk_capacity` bytes long.
///
/// Returns `None` if the payload is too large to describe in a header.
pub fn split_into_chunks(
    sequence_number: u32,
    payload: &[u8],
    chunk_capacity: usize,
) -> Option<Vec<Vec<u8>>> {
    let total_bytes = u32::try_from(payload.len()).ok()?;
    let chunk_count = u32::try_from(chunk_count_for(payload.len(), chunk_capacity)).ok()?;

    let mut chunks = Vec::with_capacity(chunk_count as usize);
    for chunk_number in 0..chunk_count {
        let start = chunk_number as usize * chunk_capacity;
        let end = (start + chunk_capacity).min(payload.len());
        let header = MessageHeader {
            sequence_number,
            chunk_count,
            chunk_number,
            total_bytes,
        };
        let mut chunk = Vec::with_capacity(HEADER_LEN + end - start);
        chunk.extend_from_slice(&header.to_bytes());
        chunk.extend_from_slice(&payload[start..end]);
        chunks.push(chunk);
    }
    Some(chunks)
}

#[derive(Debug)]
struct PartialMessage {
    chunk_count: u32,
    total_bytes: u32,
    received: u32,
    chunks: Vec<Option<Vec<u8>>>,
}

/// Buffers chunks by sequence number until complete messages can be returned.
#[derive(Debug)]
pub struct Reassembler {
    chunk_capacity: usize,
    partials: HashMap<u32, PartialMessage>,
}

impl Reassembler {
    /// Creates a reassembler for chunks with the given payload capacity.
    pub fn new(chunk_capacity: usize) -> Self {
        Self {
            chunk_capacity,
            partials: HashMap::new(),
        }
    }

    /// Returns the number of messages currently partially received.
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    /// Accepts one channel entry, returning the sequence number and payload of the message it
    /// completes, if any.
    pub fn accept(&mut self, entry: &[u8]) -> Result<Option<(u32, Vec<u8>)>, ChannelError> {
        let (header, payload) = MessageHeader::parse(entry, self.chunk_capacity)
            .map_err(|reason| ChannelError::MalformedHeader { reason })?;
        self.evict_stale(header.sequence_number);

        if header.chunk_count == 1 {
            return Ok(Some((header.sequence_number, payload.to_vec())));
        }

        let partial = self
            .partials
            .entry(header.sequence_number)
            .or_insert_with(|| PartialMessage {
                chunk_count: header.chunk_count,
                total_bytes: header.total_bytes,
                received: 0,
                chunks: vec![None; header.chunk_count as usize],
            });
        let slot = &mut partial.chunks[header.chunk_number as usize];
        if partial.chunk_count != header.chunk_count
            || partial.total_bytes != header.total_bytes
            || slot.is_some()
        {
            // A writer died mid-message and its sequence number was reused: drop both.
            self.partials.remove(&header.sequence_number);
            return Err(ChannelError::MalformedHeader {
                reason: MalformedHeaderReason::InconsistentChunk {
                    sequence_number: header.sequence_number,
                },
            });
        }
        *slot = Some(payload.to_vec());
        partial.received += 1;

        if partial.received < partial.chunk_count {
            return Ok(None);
        }
        let Some(partial) = self.partials.remove(&header.sequence_number) else {
            return Ok(None);
        };
        let mut message = Vec::with_capacity(partial.total_bytes as usize);
        for chunk in partial.chunks.into_iter().flatten() {
            message.extend_from_slice(&chunk);
        }
        Ok(Some((header.sequence_number, message)))
    }

    fn evict_stale(&mut self, newest: u32) {
        self.partials.retain(|&sequence_number, partial| {
            // Sequence numbers behind `newest` give small differences, ones ahead of it (after
            // wraparound on the sender) give huge ones. Only the former can be stale.
            let lag = newest.wrapping_sub(sequence_number);
            let stale = lag > STALE_WINDOW && lag < u32::MAX / 2;
            if stale {
                warn!(
                    "{}",
                    ChannelError::Abandoned {
                        sequence_number,
                        received: partial.received,
                        chunk_count: partial.chunk_count,
                    }
                );
            }
            !stale
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CAPACITY: usize = 8;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn header_layout() {
        let header = MessageHeader {
            sequence_number: 1,
            chunk_count: 2,
            chunk_number: 1,
            total_bytes: 12,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &1_u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &12_u32.to_ne_bytes());

        let mut entry = bytes.to_vec();
        entry.extend_from_slice(&[0; 4]);
        let (parsed, rest) = MessageHeader::parse(&entry, CAPACITY).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(rest.len(), 4);
    }

    #[test]
    fn chunk_sizes() {
        let chunks = split_into_chunks(7, &payload(20), CAPACITY).unwrap();
        let lens: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(lens, [HEADER_LEN + 8, HEADER_LEN + 8, HEADER_LEN + 4]);

        let empty = split_into_chunks(0, &[], CAPACITY).unwrap();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].len(), HEADER_LEN);
    }

    #[test]
    fn reassembles_out_of_order() {
        let data = payload(28);
        let mut chunks = split_into_chunks(3, &data, CAPACITY).unwrap();
        chunks.reverse();

        let mut reassembler = Reassembler::new(CAPACITY);
        let mut completed = None;
        for chunk in &chunks {
            if let Some(message) = reassembler.accept(chunk).unwrap() {
                assert!(completed.is_none(), "only one message completes");
                completed = Some(message);
            }
        }
        assert_eq!(completed, Some((3, data)));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn rejects_malformed_headers() {
        let mut reassembler = Reassembler::new(CAPACITY);

        let err = reassembler.accept(&[0; 10]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::MalformedHeader {
                reason: MalformedHeaderReason::Truncated { len: 10 }
            }
        ));

        let zero_count = MessageHeader {
            sequence_number: 0,
            chunk_count: 0,
            chunk_number: 0,
            total_bytes: 0,
        };
        let err = reassembler.accept(&zero_count.to_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::MalformedHeader {
                reason: MalformedHeaderReason::ZeroChunkCount
            }
        ));

        let mut short = split_into_chunks(0, &payload(5), CAPACITY).unwrap().remove(0);
        short.pop();
        let err = reassembler.accept(&short).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::MalformedHeader {
                reason: MalformedHeaderReason::PayloadLengthMismatch {
                    expected: 5,
                    actual: 4
                }
            }
        ));

        let wrong_count = MessageHeader {
            sequence_number: 0,
            chunk_count: 5,
            chunk_number: 0,
            total_bytes: 9,
        };
        let err = MessageHeader::parse(&wrong_count.to_bytes(), CAPACITY).unwrap_err();
        assert_eq!(
            err,
            MalformedHeaderReason::TotalBytesMismatch {
                total_bytes: 9,
                chunk_count: 5
            }
        );
    }

    #[test]
    fn duplicate_chunk_drops_message() {
        let chunks = split_into_chunks(9, &payload(20), CAPACITY).unwrap();
        let mut reassembler = Reassembler::new(CAPACITY);
        assert_eq!(reassembler.accept(&chunks[0]).unwrap(), None);
        assert!(reassembler.accept(&chunks[0]).is_err());
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn stale_partials_are_evicted_across_wraparound() {
        let mut reassembler = Reassembler::new(CAPACITY);
        let stale = split_into_chunks(u32::MAX - 2, &payload(20), CAPACITY).unwrap();
        assert_eq!(reassembler.accept(&stale[0]).unwrap(), None);
        assert_eq!(reassembler.pending(), 1);

        // Within the window: still pending.
        let single = split_into_chunks(3, &payload(1), CAPACITY).unwrap();
        assert!(reassembler.accept(&single[0]).unwrap().is_some());
        assert_eq!(reassembler.pending(), 1);

        // Past the window: evicted.
        let single = split_into_chunks(40, &payload(1), CAPACITY).unwrap();
        assert!(reassembler.accept(&single[0]).unwrap().is_some());
        assert_eq!(reassembler.pending(), 0);
    }
}
