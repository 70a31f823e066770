// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-to-many broadcast channel carrying driver responses to clients.
//!
//! A single writer (the conductor's client proxy) transmits records that
//! any number of readers observe without coordination. Readers that fall
//! more than a buffer length behind are lapped and must resync; the
//! protocol favors the writer, which never blocks.
//!
//! Record layout:
//!
//! ```text
//!   0        4        8
//!   +--------+--------+------------------------+
//!   | length | type   | encoded message ...    |
//!   +--------+--------+------------------------+
//! ```
//!
//! The trailer holds the tail intent (pre-write), tail (post-write), and
//! latest record offset. A reader validates after copying: if the tail
//! intent moved past its cursor by more than a buffer length, the copy may
//! be torn and is discarded.

use crate::bits::{align, is_power_of_two, CACHE_LINE_LENGTH};
use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{DriverError, Result};

/// Record header: i32 length + i32 message type.
pub const RECORD_HEADER_LENGTH: usize = 8;

/// Record alignment within the broadcast buffer.
pub const RECORD_ALIGNMENT: usize = 8;

/// Message type for the padding record written at the wrap point.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

const TAIL_INTENT_COUNTER_OFFSET: usize = 0;
const TAIL_COUNTER_OFFSET: usize = 8;
const LATEST_COUNTER_OFFSET: usize = 16;

/// Bytes reserved after the data region for broadcast state.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

fn check_capacity(buffer: &AtomicBuffer) -> Result<usize> {
    let total = buffer.capacity();
    if total <= TRAILER_LENGTH {
        return Err(DriverError::InvalidConfiguration(format!(
            "broadcast region too small: {total}"
        )));
    }
    let capacity = total - TRAILER_LENGTH;
    if !is_power_of_two(capacity as u64) {
        return Err(DriverError::InvalidConfiguration(format!(
            "broadcast capacity not a power of two: {capacity}"
        )));
    }
    Ok(capacity)
}

/// Single-writer side of the broadcast channel.
pub struct BroadcastTransmitter {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
}

impl BroadcastTransmitter {
    /// Wrap a shared region (capacity minus trailer must be a power of two).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a bad region size.
    pub fn wrap(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = check_capacity(&buffer)?;
        Ok(Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
        })
    }

    /// Transmit one message to all attached receivers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a zero/oversized message or a
    /// non-positive type id.
    pub fn transmit(&self, msg_type_id: i32, msg: &[u8]) -> Result<()> {
        if msg_type_id < 1 {
            return Err(DriverError::InvalidConfiguration(format!(
                "message type id must be positive: {msg_type_id}"
            )));
        }
        if msg.is_empty() || msg.len() > self.max_msg_length {
            return Err(DriverError::InvalidConfiguration(format!(
                "message length out of range: {} (max {})",
                msg.len(),
                self.max_msg_length
            )));
        }

        let current_tail = self.buffer.get_i64(self.tail_counter_offset());
        let mask = self.capacity - 1;
        let mut record_offset = (current_tail as usize) & mask;
        let record_length = RECORD_HEADER_LENGTH + msg.len();
        let aligned_length = align(record_length, RECORD_ALIGNMENT);
        let to_end = self.capacity - record_offset;

        let mut new_tail = current_tail + aligned_length as i64;
        if aligned_length > to_end {
            // Pad out the remainder and wrap to the start.
            new_tail += to_end as i64;

            self.buffer
                .put_i64_ordered(self.tail_intent_offset(), new_tail);
            self.buffer.put_i32(record_offset + 4, PADDING_MSG_TYPE_ID);
            self.buffer.put_i32(record_offset, to_end as i32);
            record_offset = 0;
        } else {
            self.buffer
                .put_i64_ordered(self.tail_intent_offset(), new_tail);
        }

        self.buffer.put_i32(record_offset, record_length as i32);
        self.buffer.put_i32(record_offset + 4, msg_type_id);
        self.buffer
            .put_bytes(record_offset + RECORD_HEADER_LENGTH, msg);

        self.buffer
            .put_i64(self.latest_counter_offset(), new_tail - aligned_length as i64);
        self.buffer.put_i64_ordered(self.tail_counter_offset(), new_tail);

        Ok(())
    }

    #[inline]
    fn tail_intent_offset(&self) -> usize {
        self.capacity + TAIL_INTENT_COUNTER_OFFSET
    }

    #[inline]
    fn tail_counter_offset(&self) -> usize {
        self.capacity + TAIL_COUNTER_OFFSET
    }

    #[inline]
    fn latest_counter_offset(&self) -> usize {
        self.capacity + LATEST_COUNTER_OFFSET
    }
}

/// One reader's view of the broadcast channel.
///
/// Each client holds its own receiver; receivers never write to the shared
/// region and never affect the transmitter or each other.
pub struct BroadcastReceiver {
    buffer: AtomicBuffer,
    capacity: usize,
    cursor: i64,
    next_record: i64,
    lapped_count: u64,
}

impl BroadcastReceiver {
    /// Wrap the shared region and join at the current tail: a new receiver
    /// sees only messages transmitted after it attaches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a bad region size.
    pub fn wrap(buffer: AtomicBuffer) -> Result<Self> {
        let capacity = check_capacity(&buffer)?;
        let tail = buffer.get_i64_volatile(capacity + TAIL_COUNTER_OFFSET);
        Ok(Self {
            buffer,
            capacity,
            cursor: tail,
            next_record: tail,
            lapped_count: 0,
        })
    }

    /// Times this receiver was overrun by the transmitter and had to resync.
    #[must_use]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Receive the next message, copying it out through `handler`.
    ///
    /// Returns false when no new message is available. A lapped receiver
    /// resynchronizes to the latest record and counts the loss.
    pub fn receive_next<F: FnMut(i32, &[u8])>(&mut self, mut handler: F) -> bool {
        loop {
            let tail = self.buffer.get_i64_volatile(self.capacity + TAIL_COUNTER_OFFSET);
            if self.next_record >= tail {
                return false;
            }

            if !self.validate(self.next_record) {
                // Overrun: jump to the latest complete record.
                self.lapped_count += 1;
                self.next_record = self
                    .buffer
                    .get_i64_volatile(self.capacity + LATEST_COUNTER_OFFSET);
            }

            self.cursor = self.next_record;
            let mask = self.capacity - 1;
            let record_offset = (self.cursor as usize) & mask;
            let length = self.buffer.get_i32(record_offset) as usize;
            let msg_type_id = self.buffer.get_i32(record_offset + 4);

            self.next_record = self.cursor + align(length, RECORD_ALIGNMENT) as i64;

            if msg_type_id == PADDING_MSG_TYPE_ID {
                continue; // wrap point, try the real record at offset 0
            }

            let mut msg = vec![0u8; length - RECORD_HEADER_LENGTH];
            self.buffer
                .get_bytes(record_offset + RECORD_HEADER_LENGTH, &mut msg);

            // The copy is only good if the transmitter has not started
            // overwriting this range while we read it.
            if self.validate(self.cursor) {
                handler(msg_type_id, &msg);
                return true;
            }

            self.lapped_count += 1;
            self.next_record = self
                .buffer
                .get_i64_volatile(self.capacity + LATEST_COUNTER_OFFSET);
        }
    }

    fn validate(&self, cursor: i64) -> bool {
        let tail_intent = self
            .buffer
            .get_i64_volatile(self.capacity + TAIL_INTENT_COUNTER_OFFSET);
        cursor + self.capacity as i64 > tail_intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: usize = 1024;

    fn channel() -> (Vec<u8>, BroadcastTransmitter, BroadcastReceiver) {
        let mut backing = vec![0u8; CAPACITY + TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        let tx = BroadcastTransmitter::wrap(buffer).expect("transmitter");
        let rx = BroadcastReceiver::wrap(buffer).expect("receiver");
        (backing, tx, rx)
    }

    #[test]
    fn test_transmit_receive_one() {
        let (_backing, tx, mut rx) = channel();

        tx.transmit(3, b"publication ready").expect("transmit");

        let mut got = None;
        assert!(rx.receive_next(|msg_type, msg| {
            got = Some((msg_type, msg.to_vec()));
        }));
        assert_eq!(got, Some((3, b"publication ready".to_vec())));

        assert!(!rx.receive_next(|_, _| panic!("no more messages")));
    }

    #[test]
    fn test_receiver_sees_messages_in_order_across_wrap() {
        let (_backing, tx, mut rx) = channel();

        // 40-byte payloads -> 48-byte records; 1024/48 is fractional so the
        // stream wraps mid-buffer.
        for i in 0..100u8 {
            let mut msg = [0u8; 40];
            msg[0] = i;
            tx.transmit(1, &msg).expect("transmit");

            let mut got = None;
            assert!(rx.receive_next(|_, m| got = Some(m[0])));
            assert_eq!(got, Some(i));
        }
        assert_eq!(rx.lapped_count(), 0);
    }

    #[test]
    fn test_slow_receiver_is_lapped_and_resyncs() {
        let (_backing, tx, mut rx) = channel();

        // Fill the buffer several times over while the receiver sleeps.
        for i in 0..200u8 {
            let mut msg = [0u8; 56];
            msg[0] = i;
            tx.transmit(1, &msg).expect("transmit");
        }

        // The receiver recovers at some recent record rather than stalling.
        let mut received = Vec::new();
        while rx.receive_next(|_, m| received.push(m[0])) {}

        assert!(rx.lapped_count() >= 1);
        assert!(!received.is_empty());
        assert_eq!(*received.last().expect("non-empty"), 199);
    }

    #[test]
    fn test_late_joiner_starts_at_latest() {
        let mut backing = vec![0u8; CAPACITY + TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        let tx = BroadcastTransmitter::wrap(buffer).expect("transmitter");

        for _ in 0..10 {
            tx.transmit(1, &[0u8; 16]).expect("transmit");
        }

        // Joins after the fact: sees only what is transmitted from now on.
        let mut rx = BroadcastReceiver::wrap(buffer).expect("receiver");
        assert!(!rx.receive_next(|_, _| panic!("nothing new yet")));

        tx.transmit(2, &[7u8; 16]).expect("transmit");
        let mut got = None;
        assert!(rx.receive_next(|msg_type, _| got = Some(msg_type)));
        assert_eq!(got, Some(2));
    }
}
