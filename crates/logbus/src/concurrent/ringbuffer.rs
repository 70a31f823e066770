// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Many-to-one ring buffer carrying client commands to the driver.
//!
//! Multiple client processes claim space with a CAS on the tail position,
//! write their record, then publish it with a release-store of the record
//! length. The single consumer (the conductor) drains records in order,
//! zeroes the consumed region, and advances the head.
//!
//! Record layout (all little-endian):
//!
//! ```text
//!   0        4        8
//!   +--------+--------+------------------------+
//!   | length | type   | encoded message ...    |
//!   +--------+--------+------------------------+
//! ```
//!
//! `length` is zero while a record is claimed but not yet committed; the
//! consumer stops at the first zero length. A crashed producer therefore
//! blocks the ring, which the conductor resolves with [`ManyToOneRingBuffer::unblock`]
//! after `client_liveness_timeout_ns`.
//!
//! The trailer behind the data region holds the tail position, cached head,
//! head position, correlation id counter, and consumer heartbeat time, each
//! group on its own pair of cache lines.

use crate::bits::{align, is_power_of_two, CACHE_LINE_LENGTH};
use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{DriverError, Result};

/// Record header: i32 length + i32 message type.
pub const RECORD_HEADER_LENGTH: usize = 8;

/// Records are aligned so a header never straddles a cache line pair.
pub const RECORD_ALIGNMENT: usize = 32;

/// Message type reserved for padding records (skipped by the consumer).
pub const PADDING_MSG_TYPE_ID: i32 = -1;

// Trailer field offsets, relative to the end of the data region.
const TAIL_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
const HEAD_CACHE_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 4;
const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 6;
const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 8;
const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 10;

/// Bytes reserved after the data region for ring state.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 12;

/// Multi-producer, single-consumer ring buffer over shared memory.
pub struct ManyToOneRingBuffer {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
}

impl ManyToOneRingBuffer {
    /// Wrap a shared region. The data capacity (total minus trailer) must
    /// be a power of two.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when the region is too small or the
    /// capacity is not a power of two.
    pub fn wrap(buffer: AtomicBuffer) -> Result<Self> {
        let total = buffer.capacity();
        if total <= TRAILER_LENGTH {
            return Err(DriverError::InvalidConfiguration(format!(
                "ring buffer region too small: {total}"
            )));
        }

        let capacity = total - TRAILER_LENGTH;
        if !is_power_of_two(capacity as u64) {
            return Err(DriverError::InvalidConfiguration(format!(
                "ring buffer capacity not a power of two: {capacity}"
            )));
        }

        Ok(Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
        })
    }

    /// Data capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write a message. Returns false when the ring has insufficient space.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a zero/oversized message or a
    /// non-positive type id.
    pub fn write(&self, msg_type_id: i32, msg: &[u8]) -> Result<bool> {
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

        let required = align(RECORD_HEADER_LENGTH + msg.len(), RECORD_ALIGNMENT);
        let record_offset = match self.claim(required) {
            Some(offset) => offset,
            None => return Ok(false),
        };

        self.buffer.put_i32(record_offset + 4, msg_type_id);
        self.buffer.put_bytes(record_offset + RECORD_HEADER_LENGTH, msg);
        // Publish: readers gate on a non-zero length.
        self.buffer
            .put_i32_ordered(record_offset, (RECORD_HEADER_LENGTH + msg.len()) as i32);

        Ok(true)
    }

    /// Drain up to `limit` records into `handler(msg_type_id, payload)`.
    ///
    /// Consumed space is zeroed before the head advances so producers can
    /// distinguish committed records from claimed-but-unwritten space.
    pub fn read<F: FnMut(i32, &[u8])>(&self, limit: usize, mut handler: F) -> usize {
        let head = self.buffer.get_i64(self.head_position_offset());
        let head_index = (head as usize) & (self.capacity - 1);
        let contiguous = self.capacity - head_index;

        let mut bytes_read = 0;
        let mut messages_read = 0;

        while bytes_read < contiguous && messages_read < limit {
            let record_offset = head_index + bytes_read;
            let record_length = self.buffer.get_i32_volatile(record_offset);
            if record_length <= 0 {
                break; // next record not yet committed
            }

            let aligned = align(record_length as usize, RECORD_ALIGNMENT);
            bytes_read += aligned;

            let msg_type_id = self.buffer.get_i32(record_offset + 4);
            if msg_type_id == PADDING_MSG_TYPE_ID {
                continue;
            }

            messages_read += 1;
            let payload = self.buffer.slice(
                record_offset + RECORD_HEADER_LENGTH,
                record_length as usize - RECORD_HEADER_LENGTH,
            );
            handler(msg_type_id, payload);
        }

        if bytes_read > 0 {
            self.buffer.set_memory(head_index, bytes_read, 0);
            self.buffer
                .put_i64_ordered(self.head_position_offset(), head + bytes_read as i64);
        }

        messages_read
    }

    /// Producer cursor (bytes claimed since creation).
    #[must_use]
    pub fn producer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.tail_position_offset())
    }

    /// Consumer cursor (bytes consumed since creation).
    #[must_use]
    pub fn consumer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.head_position_offset())
    }

    /// Stamp the consumer heartbeat (epoch milliseconds). Clients watch
    /// this to detect a dead driver.
    pub fn consumer_heartbeat_time(&self, time_ms: i64) {
        self.buffer
            .put_i64_ordered(self.consumer_heartbeat_offset(), time_ms);
    }

    /// Last stamped consumer heartbeat (epoch milliseconds).
    #[must_use]
    pub fn consumer_heartbeat_time_value(&self) -> i64 {
        self.buffer.get_i64_volatile(self.consumer_heartbeat_offset())
    }

    /// Next id from the shared correlation counter.
    #[must_use]
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer.get_and_add_i64(self.correlation_counter_offset(), 1)
    }

    /// Skip a stuck producer by writing a padding record over its claim.
    ///
    /// Called by the conductor when the consumer has not moved, the
    /// producer position is ahead, and the liveness timeout has expired.
    /// Returns true when padding was written (idempotent: a second call on
    /// the same state is a no-op returning false).
    pub fn unblock(&self) -> bool {
        let head = self.buffer.get_i64(self.head_position_offset());
        let tail = self.buffer.get_i64_volatile(self.tail_position_offset());
        if head == tail {
            return false;
        }

        let mask = self.capacity - 1;
        let head_index = (head as usize) & mask;
        let claimed = (tail - head) as usize;
        let contiguous = claimed.min(self.capacity - head_index);

        if self.buffer.get_i32_volatile(head_index) != 0 {
            return false; // head record is committed; consumer just lagging
        }

        // Find the first committed record after the dead claim. Every
        // record starts on an alignment boundary, so scan in those steps.
        let mut scan = RECORD_ALIGNMENT;
        while scan < contiguous {
            if self.buffer.get_i32_volatile(head_index + scan) > 0 {
                self.pad_record(head_index, scan);
                return true;
            }
            scan += RECORD_ALIGNMENT;
        }

        // Nothing committed behind the claim: pad the whole claimed range
        // so the consumer can move past the dead producer.
        self.pad_record(head_index, contiguous);
        true
    }

    fn pad_record(&self, offset: usize, length: usize) {
        self.buffer.put_i32(offset + 4, PADDING_MSG_TYPE_ID);
        self.buffer.put_i32_ordered(offset, length as i32);
    }

    fn claim(&self, required: usize) -> Option<usize> {
        let mask = self.capacity - 1;
        let mut head = self.buffer.get_i64_volatile(self.head_cache_position_offset());

        loop {
            let tail = self.buffer.get_i64_volatile(self.tail_position_offset());
            let available = self.capacity - (tail - head) as usize;

            if required > available {
                head = self.buffer.get_i64_volatile(self.head_position_offset());
                if required > self.capacity - (tail - head) as usize {
                    return None;
                }
                self.buffer
                    .put_i64_ordered(self.head_cache_position_offset(), head);
            }

            let tail_index = (tail as usize) & mask;
            let to_buffer_end = self.capacity - tail_index;

            if required > to_buffer_end {
                // Record would straddle the end: pad to the wrap point,
                // provided the start of the buffer is free too.
                let mut head_index = (head as usize) & mask;
                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_position_offset());
                    head_index = (head as usize) & mask;
                    if required > head_index {
                        return None;
                    }
                    self.buffer
                        .put_i64_ordered(self.head_cache_position_offset(), head);
                }

                if self.buffer.compare_and_set_i64(
                    self.tail_position_offset(),
                    tail,
                    tail + (to_buffer_end + required) as i64,
                ) {
                    self.pad_record(tail_index, to_buffer_end);
                    return Some(0);
                }
            } else if self.buffer.compare_and_set_i64(
                self.tail_position_offset(),
                tail,
                tail + required as i64,
            ) {
                return Some(tail_index);
            }
        }
    }

    #[inline]
    fn tail_position_offset(&self) -> usize {
        self.capacity + TAIL_POSITION_OFFSET
    }

    #[inline]
    fn head_cache_position_offset(&self) -> usize {
        self.capacity + HEAD_CACHE_POSITION_OFFSET
    }

    #[inline]
    fn head_position_offset(&self) -> usize {
        self.capacity + HEAD_POSITION_OFFSET
    }

    #[inline]
    fn correlation_counter_offset(&self) -> usize {
        self.capacity + CORRELATION_COUNTER_OFFSET
    }

    #[inline]
    fn consumer_heartbeat_offset(&self) -> usize {
        self.capacity + CONSUMER_HEARTBEAT_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: usize = 4096;

    fn ring() -> (Vec<u8>, ManyToOneRingBuffer) {
        let mut backing = vec![0u8; CAPACITY + TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        let ring = ManyToOneRingBuffer::wrap(buffer).expect("valid ring");
        (backing, ring)
    }

    #[test]
    fn test_rejects_non_power_of_two_capacity() {
        let mut backing = vec![0u8; 1000 + TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        assert!(ManyToOneRingBuffer::wrap(buffer).is_err());
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_backing, ring) = ring();

        assert!(ring.write(7, b"hello driver").expect("write"));

        let mut received = Vec::new();
        let count = ring.read(10, |msg_type, payload| {
            received.push((msg_type, payload.to_vec()));
        });

        assert_eq!(count, 1);
        assert_eq!(received, vec![(7, b"hello driver".to_vec())]);
    }

    #[test]
    fn test_read_in_order_and_zeroes_consumed_space() {
        let (_backing, ring) = ring();

        for i in 0..5u8 {
            assert!(ring.write(1, &[i; 16]).expect("write"));
        }

        let mut seen = Vec::new();
        ring.read(100, |_, payload| seen.push(payload[0]));
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        // Consumed region is zeroed; next write lands cleanly.
        assert!(ring.write(1, &[9; 16]).expect("write"));
        let mut tail = Vec::new();
        ring.read(100, |_, payload| tail.push(payload[0]));
        assert_eq!(tail, vec![9]);
    }

    #[test]
    fn test_fills_up_and_reports_back_pressure() {
        let (_backing, ring) = ring();

        let msg = [0u8; 56]; // 64-byte records
        let mut writes = 0;
        while ring.write(1, &msg).expect("write") {
            writes += 1;
            assert!(writes < 1000, "ring never filled");
        }

        assert_eq!(writes, CAPACITY / 64);

        // Draining frees the space again.
        ring.read(usize::MAX, |_, _| {});
        assert!(ring.write(1, &msg).expect("write"));
    }

    #[test]
    fn test_wrap_pads_and_preserves_messages() {
        let (_backing, ring) = ring();

        // Offset the stream by one 64-byte record so the 128-byte records
        // below eventually straddle the wrap point.
        assert!(ring.write(1, &[0u8; 56]).expect("write"));
        ring.read(usize::MAX, |_, _| {});

        let msg = [0xEEu8; 120]; // 128-byte records

        // Enough rounds to cross the wrap point and force a padding record.
        // A read drains one contiguous region, so the wrap round needs a
        // second call to pick up the record placed at the buffer start.
        for round in 0..40 {
            assert!(ring.write(2, &msg).expect("write"), "round {round}");
            let mut count = 0;
            for _ in 0..2 {
                ring.read(usize::MAX, |msg_type, payload| {
                    assert_eq!(msg_type, 2);
                    assert_eq!(payload.len(), 120);
                    count += 1;
                });
                if count == 1 {
                    break;
                }
            }
            assert_eq!(count, 1, "round {round}");
        }
    }

    #[test]
    fn test_correlation_ids_are_monotone() {
        let (_backing, ring) = ring();
        let a = ring.next_correlation_id();
        let b = ring.next_correlation_id();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_consumer_heartbeat_round_trip() {
        let (_backing, ring) = ring();
        ring.consumer_heartbeat_time(123_456);
        assert_eq!(ring.consumer_heartbeat_time_value(), 123_456);
    }

    #[test]
    fn test_unblock_skips_dead_claim() {
        let (_backing, ring) = ring();

        // Simulate a producer that claimed 64 bytes and died: bump the tail
        // without committing a record.
        let tail_offset = ring.tail_position_offset();
        let tail = ring.buffer.get_i64(tail_offset);
        ring.buffer.put_i64(tail_offset, tail + 64);

        // A healthy producer commits behind it.
        assert!(ring.write(5, &[1u8; 16]).expect("write"));

        // Consumer is stuck on the zero-length claim.
        assert_eq!(ring.read(10, |_, _| {}), 0);

        assert!(ring.unblock());
        let mut seen = 0;
        ring.read(10, |msg_type, _| {
            assert_eq!(msg_type, 5);
            seen += 1;
        });
        assert_eq!(seen, 1);

        // Idempotent: nothing left to unblock.
        assert!(!ring.unblock());
    }

    #[test]
    fn test_unblock_without_any_commit() {
        let (_backing, ring) = ring();

        let tail_offset = ring.tail_position_offset();
        let tail = ring.buffer.get_i64(tail_offset);
        ring.buffer.put_i64(tail_offset, tail + 128);

        assert!(ring.unblock());
        // Padding only: read consumes it silently.
        assert_eq!(ring.read(10, |_, _| {}), 0);
        assert_eq!(ring.consumer_position(), 128);
    }
}
