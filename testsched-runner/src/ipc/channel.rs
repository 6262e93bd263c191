// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    framing::{HEADER_LEN, MIN_SLOT_SIZE, Reassembler, split_into_chunks},
    shm::SharedMapping,
    sync::{Deadline, SharedCondvar, SharedMutex, WaitStatus},
};
use crate::errors::{ChannelError, SharedMemoryError};
use serde::{Serialize, de::DeserializeOwned};
use std::{cell::UnsafeCell, fmt, marker::PhantomData, ptr, time::Duration};

#[repr(C)]
struct RingIndexes {
    head: u32,
    len: u32,
    next_sequence: u32,
}

// Lives at the start of the shared mapping. The slots follow it.
#[repr(C)]
struct ChannelControl {
    lock: SharedMutex,
    // Held by a writer for the whole of one message, so chunks of different messages never
    // interleave.
    writer_lock: SharedMutex,
    not_empty: SharedCondvar,
    not_full: SharedCondvar,
    ring: UnsafeCell<RingIndexes>,
    capacity: u32,
    slot_size: u32,
}

/// A ring buffer of result messages in memory shared across processes.
///
/// The channel is created by the parent before forking workers. Any number of processes may
/// [`enqueue`](Self::enqueue) messages, and one process (the creator) reads them with
/// [`try_dequeue`](Self::try_dequeue). Messages are serialized as JSON and split into chunks of at
/// most `slot_size` bytes, header included, so a message may be larger than one slot.
pub struct ShareableResultChannel<T> {
    mapping: SharedMapping,
    slot_stride: usize,
    slots_offset: usize,
    reassembler: Reassembler,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> ShareableResultChannel<T> {
    /// Creates a channel with `capacity` slots of `slot_size` bytes each.
    ///
    /// A capacity of zero is treated as one, and slot sizes are raised to at least
    /// [`MIN_SLOT_SIZE`].
    pub fn new(capacity: usize, slot_size: usize) -> Result<Self, SharedMemoryError> {
        let capacity = u32::try_from(capacity.max(1)).map_err(|_| {
            SharedMemoryError::new("size channel", std::io::Error::other("capacity too large"))
        })?;
        let slot_size = u32::try_from(slot_size.max(MIN_SLOT_SIZE)).map_err(|_| {
            SharedMemoryError::new("size channel", std::io::Error::other("slot size too large"))
        })?;

        let slots_offset = size_of::<ChannelControl>().next_multiple_of(8);
        let slot_stride = (size_of::<u32>() + slot_size as usize).next_multiple_of(8);
        let mapping = SharedMapping::new(slots_offset + slot_stride * capacity as usize)?;

        let control = mapping.as_ptr().cast::<ChannelControl>();
        // SAFETY: the mapping is freshly created, zero-filled and large enough for the control
        // block, and nothing else refers to it yet.
        unsafe {
            SharedMutex::init(&raw mut (*control).lock)?;
            SharedMutex::init(&raw mut (*control).writer_lock)?;
            SharedCondvar::init(&raw mut (*control).not_empty)?;
            SharedCondvar::init(&raw mut (*control).not_full)?;
            (&raw mut (*control).capacity).write(capacity);
            (&raw mut (*control).slot_size).write(slot_size);
        }

        Ok(Self {
            mapping,
            slot_stride,
            slots_offset,
            reassembler: Reassembler::new(slot_size as usize - HEADER_LEN),
            _marker: PhantomData,
        })
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.control().capacity as usize
    }

    /// Returns the size of each slot in bytes, header included.
    pub fn slot_size(&self) -> usize {
        self.control().slot_size as usize
    }

    /// Returns the number of payload bytes each chunk can carry.
    pub fn chunk_capacity(&self) -> usize {
        self.slot_size() - HEADER_LEN
    }

    fn control(&self) -> &ChannelControl {
        // SAFETY: the control block was initialized in `new` and the mapping outlives `self`.
        unsafe { &*self.mapping.as_ptr().cast::<ChannelControl>() }
    }

    fn ring(&self) -> *mut RingIndexes {
        self.control().ring.get()
    }

    fn slot(&self, index: u32) -> *mut u8 {
        // SAFETY: index < capacity, so the slot lies within the mapping.
        unsafe {
            self.mapping
                .as_ptr()
                .add(self.slots_offset + index as usize * self.slot_stride)
        }
    }

    /// Sends a raw payload, returning its sequence number.
    ///
    /// Blocks while the ring is full.
    pub fn send_bytes(&self, payload: &[u8]) -> Result<u32, ChannelError> {
        let control = self.control();
        let _writer = control.writer_lock.lock()?;

        let sequence_number = {
            let _guard = control.lock.lock()?;
            let ring = self.ring();
            // SAFETY: ring indexes are only accessed with `lock` held.
            unsafe {
                let sequence_number = (*ring).next_sequence;
                (*ring).next_sequence = sequence_number.wrapping_add(1);
                sequence_number
            }
        };

        let chunks = split_into_chunks(sequence_number, payload, self.chunk_capacity())
            .ok_or_else(|| {
                ChannelError::Serialize(<serde_json::Error as serde::ser::Error>::custom(
                    "message payload is too large",
                ))
            })?;

        for chunk in chunks {
            let guard = control.lock.lock()?;
            // SAFETY (for each block below): ring indexes and slots are only accessed with
            // `lock` held, and every slot index is reduced modulo the capacity.
            while unsafe { (*self.ring()).len } >= control.capacity {
                control.not_full.wait(&guard)?;
            }
            unsafe {
                let ring = self.ring();
                let tail = ((*ring).head + (*ring).len) % control.capacity;
                let slot = self.slot(tail);
                slot.cast::<u32>().write(chunk.len() as u32);
                ptr::copy_nonoverlapping(chunk.as_ptr(), slot.add(size_of::<u32>()), chunk.len());
                (*ring).len += 1;
            }
            control.not_empty.notify_all();
        }

        Ok(sequence_number)
    }

    /// Receives a raw payload, waiting up to `timeout` for it to be complete.
    ///
    /// Returns `Ok(None)` if no complete message arrived in time. Chunks of an incomplete message
    /// are kept for the next call.
    pub fn try_receive_bytes(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ChannelError> {
        Ok(self.receive_message(timeout)?.map(|(_, payload)| payload))
    }

    fn receive_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<(u32, Vec<u8>)>, ChannelError> {
        let deadline = Deadline::after(timeout)?;
        loop {
            let Some(entry) = self.pop_entry(&deadline)? else {
                return Ok(None);
            };
            if let Some(message) = self.reassembler.accept(&entry)? {
                return Ok(Some(message));
            }
        }
    }

    fn pop_entry(&self, deadline: &Deadline) -> Result<Option<Vec<u8>>, ChannelError> {
        let control = self.control();
        let guard = control.lock.lock()?;
        // SAFETY (for each block below): as in `send_bytes`.
        while unsafe { (*self.ring()).len } == 0 {
            if control.not_empty.wait_until(&guard, deadline)? == WaitStatus::TimedOut
                && unsafe { (*self.ring()).len } == 0
            {
                return Ok(None);
            }
        }
        let entry = unsafe {
            let ring = self.ring();
            let slot = self.slot((*ring).head);
            let len = (slot.cast::<u32>().read() as usize).min(control.slot_size as usize);
            let entry = std::slice::from_raw_parts(slot.add(size_of::<u32>()), len).to_vec();
            (*ring).head = ((*ring).head + 1) % control.capacity;
            (*ring).len -= 1;
            entry
        };
        control.not_full.notify_all();
        Ok(Some(entry))
    }
}

impl<T: Serialize> ShareableResultChannel<T> {
    /// Serializes and sends a message. Blocks while the ring is full.
    pub fn enqueue(&self, message: &T) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec(message).map_err(ChannelError::Serialize)?;
        self.send_bytes(&payload)?;
        Ok(())
    }
}

impl<T: DeserializeOwned> ShareableResultChannel<T> {
    /// Receives a message, waiting up to `timeout` for one to be complete.
    ///
    /// Returns `Ok(None)` on timeout. An error for a malformed or undecodable message means that
    /// message is lost; the channel remains usable unless [`ChannelError::is_fatal`] says
    /// otherwise.
    pub fn try_dequeue(&mut self, timeout: Duration) -> Result<Option<T>, ChannelError> {
        let Some((sequence_number, payload)) = self.receive_message(timeout)? else {
            return Ok(None);
        };
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|err| ChannelError::Deserialize {
                sequence_number,
                err,
            })
    }
}

impl<T> fmt::Debug for ShareableResultChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareableResultChannel")
            .field("capacity", &self.capacity())
            .field("slot_size", &self.slot_size())
            .field("pending_partial_messages", &self.reassembler.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Message {
        id: u32,
        text: String,
    }

    #[test]
    fn small_message() {
        let mut channel = ShareableResultChannel::<Message>::new(4, 256).unwrap();
        let message = Message {
            id: 3,
            text: "hello".to_owned(),
        };
        channel.enqueue(&message).unwrap();
        assert_eq!(channel.try_dequeue(Duration::from_millis(100)).unwrap(), Some(message));
        assert_eq!(channel.try_dequeue(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn multi_chunk_payload() {
        let mut channel = ShareableResultChannel::<Message>::new(8, 64).unwrap();
        let payload: Vec<u8> = (0..channel.slot_size() * 7 / 2)
            .map(|i| (i % 256) as u8)
            .collect();
        channel.send_bytes(&payload).unwrap();
        let received = channel
            .try_receive_bytes(Duration::from_millis(100))
            .unwrap()
            .expect("message received");
        assert_eq!(received, payload);
    }

    #[test]
    fn slot_size_is_clamped() {
        let channel = ShareableResultChannel::<Message>::new(0, 1).unwrap();
        assert_eq!(channel.capacity(), 1);
        assert_eq!(channel.slot_size(), MIN_SLOT_SIZE);
        assert_eq!(channel.chunk_capacity(), HEADER_LEN);
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut channel = ShareableResultChannel::<Message>::new(4, 64).unwrap();
        assert_eq!(channel.send_bytes(b"a").unwrap(), 0);
        assert_eq!(channel.send_bytes(b"b").unwrap(), 1);
        assert_eq!(
            channel.try_receive_bytes(Duration::ZERO).unwrap().as_deref(),
            Some(&b"a"[..])
        );
        assert_eq!(
            channel.try_receive_bytes(Duration::ZERO).unwrap().as_deref(),
            Some(&b"b"[..])
        );
    }

    #[test]
    fn undecodable_message_is_not_fatal() {
        let mut channel = ShareableResultChannel::<Message>::new(4, 64).unwrap();
        channel.send_bytes(b"not json").unwrap();
        let err = channel.try_dequeue(Duration::ZERO).unwrap_err();
        assert!(matches!(err, ChannelError::Deserialize { sequence_number: 0, .. }));
        assert!(!err.is_fatal());
    }
}
