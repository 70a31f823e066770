// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log buffer layout and the metadata trailer.
//!
//! A log file holds three equal term partitions followed by one metadata
//! page:
//!
//! ```text
//! +-----------------------------+
//! |           Term 0            |
//! +-----------------------------+
//! |           Term 1            |
//! +-----------------------------+
//! |           Term 2            |
//! +-----------------------------+
//! |       Log Meta Data         |
//! +-----------------------------+
//! ```
//!
//! The metadata trailer stores the three raw-tail counters, the active
//! partition index, stream position bookkeeping, and the prebuilt default
//! frame header. Raw tails pack `(term_id, term_offset)` into 64 bits; the
//! stream position of a `(term_id, term_offset)` pair is
//! `(term_id - initial_term_id) * term_length + term_offset`.
//!
//! At any instant exactly one partition is active. The active term id is
//! `initial_term_id + k` where `k mod 3` selects the partition, so the
//! partitions rotate 0 -> 1 -> 2 -> 0 as terms fill.

use crate::bits::{is_power_of_two, number_of_trailing_zeros};
use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::config::{TERM_MAX_LENGTH, TERM_MIN_LENGTH};
use crate::error::{DriverError, Result};

/// Number of term partitions in a log.
pub const PARTITION_COUNT: usize = 3;

/// Length of the metadata trailer (one page).
pub const LOG_META_DATA_LENGTH: usize = 4096;

/// Maximum default frame header length storable in the trailer.
pub const DEFAULT_FRAME_HEADER_MAX_LENGTH: usize = 128;

// Trailer field offsets.
pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_PARTITION_INDEX_OFFSET: usize = 24;
pub const LOG_END_OF_STREAM_POSITION_OFFSET: usize = 128;
pub const LOG_TIME_OF_LAST_SM_OFFSET: usize = 136;
pub const LOG_CORRELATION_ID_OFFSET: usize = 256;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = 264;
pub const LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET: usize = 268;
pub const LOG_MTU_LENGTH_OFFSET: usize = 272;
pub const LOG_TERM_LENGTH_OFFSET: usize = 276;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = 320;

/// Total file length for a given term length.
#[inline]
#[must_use]
pub const fn compute_log_length(term_length: usize) -> usize {
    (term_length * PARTITION_COUNT) + LOG_META_DATA_LENGTH
}

/// Validate a term length: power of two within `[TERM_MIN, TERM_MAX]`.
///
/// # Errors
///
/// Returns `InvalidConfiguration` describing the violated bound.
pub fn check_term_length(term_length: usize) -> Result<()> {
    if term_length < TERM_MIN_LENGTH || term_length > TERM_MAX_LENGTH {
        return Err(DriverError::InvalidConfiguration(format!(
            "term length {term_length} out of range [{TERM_MIN_LENGTH}, {TERM_MAX_LENGTH}]"
        )));
    }
    if !is_power_of_two(term_length as u64) {
        return Err(DriverError::InvalidConfiguration(format!(
            "term length not a power of 2: {term_length}"
        )));
    }
    Ok(())
}

/// Shift used to divide by the term length.
#[inline]
#[must_use]
pub fn position_bits_to_shift(term_length: usize) -> u32 {
    number_of_trailing_zeros(term_length as u64)
}

// ===== raw tail packing =====

/// Pack `(term_id, term_offset)` into a raw tail value.
#[inline]
#[must_use]
pub const fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & 0xFFFF_FFFF)
}

/// Term id part of a raw tail.
#[inline]
#[must_use]
pub const fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Term offset part of a raw tail, clamped to the term length.
///
/// The raw offset can exceed the term length transiently when producers
/// race past the end before rotation; position arithmetic uses the clamp.
#[inline]
#[must_use]
pub fn term_offset(raw_tail: i64, term_length: usize) -> i32 {
    let tail = raw_tail & 0xFFFF_FFFF;
    tail.min(term_length as i64) as i32
}

// ===== position arithmetic =====

/// Absolute stream position for `(term_id, term_offset)`.
#[inline]
#[must_use]
pub fn compute_position(
    active_term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = (active_term_id.wrapping_sub(initial_term_id)) as i64;
    (term_count << position_bits_to_shift) + term_offset as i64
}

/// Stream position at the start of the term containing `active_term_id`.
#[inline]
#[must_use]
pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_position(active_term_id, 0, position_bits_to_shift, initial_term_id)
}

/// Term id containing an absolute position.
#[inline]
#[must_use]
pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    ((position >> position_bits_to_shift) as i32).wrapping_add(initial_term_id)
}

/// Partition index for an absolute position.
#[inline]
#[must_use]
pub fn index_by_position(position: i64, position_bits_to_shift: u32) -> usize {
    ((position >> position_bits_to_shift) as u64 % PARTITION_COUNT as u64) as usize
}

/// Partition index for a term id relative to the initial term id.
#[inline]
#[must_use]
pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    let diff = active_term_id.wrapping_sub(initial_term_id) as i64;
    (diff.rem_euclid(PARTITION_COUNT as i64)) as usize
}

/// The partition after `index` in rotation order.
#[inline]
#[must_use]
pub const fn next_partition_index(index: usize) -> usize {
    (index + 1) % PARTITION_COUNT
}

// ===== metadata accessors =====

/// Offset of the raw tail counter for a partition.
#[inline]
#[must_use]
pub const fn tail_counter_offset(partition_index: usize) -> usize {
    TERM_TAIL_COUNTERS_OFFSET + (partition_index * 8)
}

/// Volatile read of a partition's raw tail.
#[inline]
#[must_use]
pub fn raw_tail_volatile(meta: &AtomicBuffer, partition_index: usize) -> i64 {
    meta.get_i64_volatile(tail_counter_offset(partition_index))
}

/// Volatile read of the active partition's raw tail.
#[inline]
#[must_use]
pub fn active_raw_tail_volatile(meta: &AtomicBuffer) -> i64 {
    raw_tail_volatile(meta, active_partition_index(meta))
}

/// Seed partition `partition_index` at `(term_id, 0)`.
pub fn initialise_tail_with_term_id(meta: &AtomicBuffer, partition_index: usize, term_id: i32) {
    meta.put_i64(tail_counter_offset(partition_index), pack_tail(term_id, 0));
}

/// Current active partition index (volatile).
#[inline]
#[must_use]
pub fn active_partition_index(meta: &AtomicBuffer) -> usize {
    meta.get_i32_volatile(LOG_ACTIVE_PARTITION_INDEX_OFFSET) as usize
}

/// Ordered store of the active partition index.
#[inline]
pub fn set_active_partition_index(meta: &AtomicBuffer, index: usize) {
    meta.put_i32_ordered(LOG_ACTIVE_PARTITION_INDEX_OFFSET, index as i32);
}

/// Rotate to the next partition after the current term tripped.
///
/// Idempotent across racing producers: both observe the same tripped state
/// and the CAS pair resolves the race, whoever wins.
pub fn rotate_log(meta: &AtomicBuffer, current_partition_index: usize, current_term_id: i32) {
    let next_index = next_partition_index(current_partition_index);
    let next_term_id = current_term_id.wrapping_add(1);

    let tail_offset = tail_counter_offset(next_index);
    let raw_tail = meta.get_i64_volatile(tail_offset);
    if term_id(raw_tail) != next_term_id {
        meta.compare_and_set_i64(tail_offset, raw_tail, pack_tail(next_term_id, 0));
    }

    meta.compare_and_set_i32(
        LOG_ACTIVE_PARTITION_INDEX_OFFSET,
        current_partition_index as i32,
        next_index as i32,
    );
}

/// Initial term id recorded for the stream.
#[inline]
#[must_use]
pub fn initial_term_id(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

/// MTU recorded for the stream.
#[inline]
#[must_use]
pub fn mtu_length(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_MTU_LENGTH_OFFSET) as usize
}

/// Term length recorded in the trailer.
#[inline]
#[must_use]
pub fn term_length(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_TERM_LENGTH_OFFSET) as usize
}

/// Correlation id of the owning registration.
#[inline]
#[must_use]
pub fn correlation_id(meta: &AtomicBuffer) -> i64 {
    meta.get_i64(LOG_CORRELATION_ID_OFFSET)
}

/// Epoch-ms timestamp of the last status message for the stream.
#[inline]
#[must_use]
pub fn time_of_last_status_message(meta: &AtomicBuffer) -> i64 {
    meta.get_i64_volatile(LOG_TIME_OF_LAST_SM_OFFSET)
}

/// Stamp the last-status-message time (epoch ms).
#[inline]
pub fn set_time_of_last_status_message(meta: &AtomicBuffer, time_ms: i64) {
    meta.put_i64_ordered(LOG_TIME_OF_LAST_SM_OFFSET, time_ms);
}

/// Position at which the producer finalized the stream (`i64::MAX` while
/// the stream is open).
#[inline]
#[must_use]
pub fn end_of_stream_position(meta: &AtomicBuffer) -> i64 {
    meta.get_i64_volatile(LOG_END_OF_STREAM_POSITION_OFFSET)
}

/// Publish the end-of-stream position.
#[inline]
pub fn set_end_of_stream_position(meta: &AtomicBuffer, position: i64) {
    meta.put_i64_ordered(LOG_END_OF_STREAM_POSITION_OFFSET, position);
}

/// Copy of the default frame header template.
#[must_use]
pub fn default_frame_header(meta: &AtomicBuffer) -> Vec<u8> {
    let length = meta.get_i32(LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET) as usize;
    let mut header = vec![0u8; length];
    meta.get_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, &mut header);
    header
}

/// Initialize a fresh metadata trailer for a new stream.
///
/// Partition 0 is seeded at `(initial_term_id, 0)`; the other tails start
/// zeroed and are seeded by rotation.
pub fn initialize(
    meta: &AtomicBuffer,
    initial_term_id_value: i32,
    term_length_value: usize,
    mtu: usize,
    correlation: i64,
    default_header: &[u8],
) {
    debug_assert!(default_header.len() <= DEFAULT_FRAME_HEADER_MAX_LENGTH);

    meta.put_i32(LOG_INITIAL_TERM_ID_OFFSET, initial_term_id_value);
    meta.put_i32(LOG_TERM_LENGTH_OFFSET, term_length_value as i32);
    meta.put_i32(LOG_MTU_LENGTH_OFFSET, mtu as i32);
    meta.put_i64(LOG_CORRELATION_ID_OFFSET, correlation);
    meta.put_i64(LOG_END_OF_STREAM_POSITION_OFFSET, i64::MAX);
    meta.put_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, default_header);
    meta.put_i32(
        LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET,
        default_header.len() as i32,
    );

    initialise_tail_with_term_id(meta, 0, initial_term_id_value);
    set_active_partition_index(meta, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> (Vec<u8>, AtomicBuffer) {
        let mut backing = vec![0u8; LOG_META_DATA_LENGTH];
        let buffer = AtomicBuffer::wrap_slice(&mut backing);
        (backing, buffer)
    }

    #[test]
    fn test_raw_tail_packs_term_id_and_offset() {
        let raw = pack_tail(7, 4096);
        assert_eq!(term_id(raw), 7);
        assert_eq!(term_offset(raw, 64 * 1024), 4096);

        let negative = pack_tail(-19, 128);
        assert_eq!(term_id(negative), -19);
        assert_eq!(term_offset(negative, 64 * 1024), 128);
    }

    #[test]
    fn test_term_offset_clamps_past_end_of_term() {
        let raw = pack_tail(3, (64 * 1024) + 512);
        assert_eq!(term_offset(raw, 64 * 1024), 64 * 1024);
    }

    #[test]
    fn test_position_round_trip() {
        let term_len = 64 * 1024;
        let bits = position_bits_to_shift(term_len);
        let initial = 100;

        for (tid, offset) in [(100, 0), (100, 992), (101, 0), (105, 4096)] {
            let position = compute_position(tid, offset, bits, initial);
            assert_eq!(compute_term_id_from_position(position, bits, initial), tid);
            assert_eq!(position & (term_len as i64 - 1), offset as i64);
        }
    }

    #[test]
    fn test_partition_index_rotation() {
        let bits = position_bits_to_shift(64 * 1024);
        assert_eq!(index_by_position(0, bits), 0);
        assert_eq!(index_by_position(64 * 1024, bits), 1);
        assert_eq!(index_by_position(3 * 64 * 1024, bits), 0);

        assert_eq!(index_by_term(100, 100), 0);
        assert_eq!(index_by_term(100, 102), 2);
        assert_eq!(index_by_term(100, 103), 0);

        assert_eq!(next_partition_index(2), 0);
    }

    #[test]
    fn test_initialize_seeds_partition_zero() {
        let (_backing, buffer) = meta();
        initialize(&buffer, 42, 64 * 1024, 1408, 777, &[0u8; 32]);

        assert_eq!(initial_term_id(&buffer), 42);
        assert_eq!(term_length(&buffer), 64 * 1024);
        assert_eq!(mtu_length(&buffer), 1408);
        assert_eq!(correlation_id(&buffer), 777);
        assert_eq!(end_of_stream_position(&buffer), i64::MAX);
        assert_eq!(active_partition_index(&buffer), 0);
        assert_eq!(term_id(raw_tail_volatile(&buffer, 0)), 42);
        assert_eq!(raw_tail_volatile(&buffer, 1), 0);
    }

    #[test]
    fn test_rotate_log_advances_index_and_seeds_tail() {
        let (_backing, buffer) = meta();
        initialize(&buffer, 10, 64 * 1024, 1408, 1, &[0u8; 32]);

        rotate_log(&buffer, 0, 10);
        assert_eq!(active_partition_index(&buffer), 1);
        assert_eq!(raw_tail_volatile(&buffer, 1), pack_tail(11, 0));

        // Idempotent for a racing producer observing the same trip.
        rotate_log(&buffer, 0, 10);
        assert_eq!(active_partition_index(&buffer), 1);
        assert_eq!(raw_tail_volatile(&buffer, 1), pack_tail(11, 0));
    }

    #[test]
    fn test_check_term_length_bounds() {
        assert!(check_term_length(64 * 1024).is_ok());
        assert!(check_term_length(32 * 1024).is_err());
        assert!(check_term_length(100_000).is_err());
    }
}
