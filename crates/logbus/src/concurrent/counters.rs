// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Counters area shared between the driver and monitoring clients.
//!
//! Two regions back every counter:
//! - a metadata record (state, type id, registration key, label) used by
//!   tools to discover and name counters
//! - a value slot in the values buffer, one cache-line pair per counter so
//!   independent writers never share a line
//!
//! Every value has exactly one writer. Writers publish with release stores;
//! readers use acquire loads ([`Position::get_volatile`]).

use crate::bits::CACHE_LINE_LENGTH;
use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{DriverError, Result};

/// Length of one metadata record.
pub const METADATA_RECORD_LENGTH: usize = CACHE_LINE_LENGTH * 4;

/// Length of one value slot.
pub const COUNTER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

/// Maximum label bytes stored per counter.
pub const MAX_LABEL_LENGTH: usize = METADATA_RECORD_LENGTH - LABEL_OFFSET;

const STATE_OFFSET: usize = 0;
const TYPE_ID_OFFSET: usize = 4;
const KEY_OFFSET: usize = 8;
const LABEL_LENGTH_OFFSET: usize = 16;
const LABEL_OFFSET: usize = 20;

const RECORD_UNUSED: i32 = 0;
const RECORD_ALLOCATED: i32 = 1;
const RECORD_RECLAIMED: i32 = -1;

/// Allocator for counters in the shared metadata/values buffers.
///
/// Owned exclusively by the conductor; all allocation and freeing happens
/// on the conductor thread. The values themselves are written and read
/// concurrently through [`AtomicCounter`] and [`Position`].
pub struct CountersManager {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
    free_list: Vec<i32>,
    id_high_water_mark: i32,
}

impl CountersManager {
    /// Wrap the metadata and values buffers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when the metadata region cannot
    /// describe every value slot.
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Result<Self> {
        let max_by_values = values.capacity() / COUNTER_LENGTH;
        let max_by_metadata = metadata.capacity() / METADATA_RECORD_LENGTH;
        if max_by_metadata < max_by_values {
            return Err(DriverError::InvalidConfiguration(format!(
                "counters metadata too small: {} records for {} values",
                max_by_metadata, max_by_values
            )));
        }

        Ok(Self {
            metadata,
            values,
            free_list: Vec::new(),
            id_high_water_mark: 0,
        })
    }

    /// Number of counters the buffers can hold.
    #[must_use]
    pub fn max_counters(&self) -> usize {
        self.values.capacity() / COUNTER_LENGTH
    }

    /// Allocate a counter, recording its type, registration key, and label.
    ///
    /// # Errors
    ///
    /// Returns `Generic` when the counters area is exhausted.
    pub fn allocate(&mut self, type_id: i32, key: i64, label: &str) -> Result<i32> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                let id = self.id_high_water_mark;
                if (id as usize) >= self.max_counters() {
                    return Err(DriverError::Generic("counters area exhausted".to_string()));
                }
                self.id_high_water_mark += 1;
                id
            }
        };

        let record = self.metadata_offset(id);
        self.metadata.put_i32(record + TYPE_ID_OFFSET, type_id);
        self.metadata.put_i64(record + KEY_OFFSET, key);

        let label_bytes = label.as_bytes();
        let label_length = label_bytes.len().min(MAX_LABEL_LENGTH);
        self.metadata
            .put_bytes(record + LABEL_OFFSET, &label_bytes[..label_length]);
        self.metadata
            .put_i32(record + LABEL_LENGTH_OFFSET, label_length as i32);

        self.values.put_i64_ordered(counter_offset(id), 0);
        self.metadata
            .put_i32_ordered(record + STATE_OFFSET, RECORD_ALLOCATED);

        Ok(id)
    }

    /// Free a counter so its id and slot can be reused.
    pub fn free(&mut self, id: i32) {
        self.metadata
            .put_i32_ordered(self.metadata_offset(id) + STATE_OFFSET, RECORD_RECLAIMED);
        self.free_list.push(id);
    }

    /// Owned incrementing counter over the slot for `id`.
    #[must_use]
    pub fn new_atomic_counter(&self, id: i32) -> AtomicCounter {
        AtomicCounter::new(self.values, id)
    }

    /// Owned single-writer position over the slot for `id`.
    #[must_use]
    pub fn new_position(&self, id: i32) -> Position {
        Position::new(self.values, id)
    }

    /// Label recorded for a counter (tools and tests).
    #[must_use]
    pub fn label(&self, id: i32) -> String {
        let record = self.metadata_offset(id);
        let length = self.metadata.get_i32(record + LABEL_LENGTH_OFFSET) as usize;
        let mut bytes = vec![0u8; length.min(MAX_LABEL_LENGTH)];
        self.metadata.get_bytes(record + LABEL_OFFSET, &mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Visit every allocated counter: `f(id, type_id, key, label)`.
    pub fn for_each<F: FnMut(i32, i32, i64, &str)>(&self, mut f: F) {
        for id in 0..self.id_high_water_mark {
            let record = self.metadata_offset(id);
            if self.metadata.get_i32_volatile(record + STATE_OFFSET) == RECORD_ALLOCATED {
                let type_id = self.metadata.get_i32(record + TYPE_ID_OFFSET);
                let key = self.metadata.get_i64(record + KEY_OFFSET);
                f(id, type_id, key, &self.label(id));
            }
        }
    }

    #[inline]
    fn metadata_offset(&self, id: i32) -> usize {
        id as usize * METADATA_RECORD_LENGTH
    }
}

/// Offset of a counter's value slot within the values buffer.
#[inline]
#[must_use]
pub fn counter_offset(id: i32) -> usize {
    id as usize * COUNTER_LENGTH
}

/// Monotonic event counter with a single incrementing owner.
#[derive(Clone, Copy, Debug)]
pub struct AtomicCounter {
    buffer: AtomicBuffer,
    id: i32,
    offset: usize,
}

impl AtomicCounter {
    #[must_use]
    pub fn new(values: AtomicBuffer, id: i32) -> Self {
        Self {
            buffer: values,
            id,
            offset: counter_offset(id),
        }
    }

    /// Counter id within the counters area.
    #[inline]
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Add one, visible to readers with release semantics.
    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add a delta, visible to readers with release semantics.
    #[inline]
    pub fn add(&self, delta: i64) {
        let value = self.buffer.get_i64(self.offset);
        self.buffer.put_i64_ordered(self.offset, value + delta);
    }

    /// Current value (reader side).
    #[inline]
    #[must_use]
    pub fn get(&self) -> i64 {
        self.buffer.get_i64_volatile(self.offset)
    }

    /// Release-store an absolute value (status indicators).
    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.buffer.put_i64_ordered(self.offset, value);
    }
}

/// 64-bit stream position with exactly one writer.
///
/// The writer uses [`Position::set_ordered`]; every other party reads with
/// [`Position::get_volatile`]. Cloned copies alias the same slot, so reader
/// views are cheap.
#[derive(Clone, Copy, Debug)]
pub struct Position {
    buffer: AtomicBuffer,
    id: i32,
    offset: usize,
}

impl Position {
    #[must_use]
    pub fn new(values: AtomicBuffer, id: i32) -> Self {
        Self {
            buffer: values,
            id,
            offset: counter_offset(id),
        }
    }

    /// Counter id within the counters area.
    #[inline]
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Writer-side read (no ordering needed against own writes).
    #[inline]
    #[must_use]
    pub fn get(&self) -> i64 {
        self.buffer.get_i64(self.offset)
    }

    /// Reader-side acquire load.
    #[inline]
    #[must_use]
    pub fn get_volatile(&self) -> i64 {
        self.buffer.get_i64_volatile(self.offset)
    }

    /// Writer-side release store.
    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.buffer.put_i64_ordered(self.offset, value);
    }

    /// Release-store `proposed` if it exceeds the current value.
    /// Returns true when the position advanced.
    #[inline]
    pub fn propose_max_ordered(&self, proposed: i64) -> bool {
        if self.get() < proposed {
            self.set_ordered(proposed);
            true
        } else {
            false
        }
    }
}

// =======================================================================
// System counters
// =======================================================================

/// Well-known driver-wide counters, allocated once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SystemCounterId {
    BytesSent = 0,
    BytesReceived = 1,
    ReceiverProxyFails = 2,
    SenderProxyFails = 3,
    ConductorProxyFails = 4,
    NaksSent = 5,
    NaksReceived = 6,
    StatusMessagesSent = 7,
    StatusMessagesReceived = 8,
    HeartbeatsSent = 9,
    HeartbeatsReceived = 10,
    RetransmitsSent = 11,
    FlowControlUnderRuns = 12,
    FlowControlOverRuns = 13,
    InvalidPackets = 14,
    Errors = 15,
    ShortSends = 16,
    ClientKeepAlives = 17,
    SenderFlowControlLimits = 18,
    UnblockedPublications = 19,
    UnblockedCommands = 20,
    PossibleTtlAsymmetry = 21,
    LossGapFills = 22,
}

const SYSTEM_COUNTERS: &[(SystemCounterId, &str)] = &[
    (SystemCounterId::BytesSent, "Bytes sent"),
    (SystemCounterId::BytesReceived, "Bytes received"),
    (SystemCounterId::ReceiverProxyFails, "Failed offers to ReceiverProxy"),
    (SystemCounterId::SenderProxyFails, "Failed offers to SenderProxy"),
    (SystemCounterId::ConductorProxyFails, "Failed offers to DriverConductorProxy"),
    (SystemCounterId::NaksSent, "NAKs sent"),
    (SystemCounterId::NaksReceived, "NAKs received"),
    (SystemCounterId::StatusMessagesSent, "Status Messages sent"),
    (SystemCounterId::StatusMessagesReceived, "Status Messages received"),
    (SystemCounterId::HeartbeatsSent, "Heartbeats sent"),
    (SystemCounterId::HeartbeatsReceived, "Heartbeats received"),
    (SystemCounterId::RetransmitsSent, "Retransmits sent"),
    (SystemCounterId::FlowControlUnderRuns, "Flow control under runs"),
    (SystemCounterId::FlowControlOverRuns, "Flow control over runs"),
    (SystemCounterId::InvalidPackets, "Invalid packets"),
    (SystemCounterId::Errors, "Errors"),
    (SystemCounterId::ShortSends, "Short sends"),
    (SystemCounterId::ClientKeepAlives, "Client keep-alives"),
    (SystemCounterId::SenderFlowControlLimits, "Sender flow control limits applied"),
    (SystemCounterId::UnblockedPublications, "Unblocked Publications"),
    (SystemCounterId::UnblockedCommands, "Unblocked Control Commands"),
    (SystemCounterId::PossibleTtlAsymmetry, "Possible TTL Asymmetry"),
    (SystemCounterId::LossGapFills, "Loss gap fills"),
];

/// Counter type id stamped on every system counter's metadata record.
pub const SYSTEM_COUNTER_TYPE_ID: i32 = 0;

/// The driver-wide counters, resolvable by [`SystemCounterId`].
pub struct SystemCounters {
    counters: Vec<AtomicCounter>,
}

impl SystemCounters {
    /// Allocate every system counter. Must run before any per-stream
    /// allocation so the well-known ids are stable for tools.
    ///
    /// # Errors
    ///
    /// Propagates counters-area exhaustion.
    pub fn new(manager: &mut CountersManager) -> Result<Self> {
        let mut counters = Vec::with_capacity(SYSTEM_COUNTERS.len());
        for (id, label) in SYSTEM_COUNTERS {
            let counter_id = manager.allocate(SYSTEM_COUNTER_TYPE_ID, *id as i64, label)?;
            counters.push(manager.new_atomic_counter(counter_id));
        }
        Ok(Self { counters })
    }

    /// Resolve a counter.
    #[inline]
    #[must_use]
    pub fn get(&self, id: SystemCounterId) -> &AtomicCounter {
        &self.counters[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (Vec<u8>, Vec<u8>, CountersManager) {
        let mut metadata_backing = vec![0u8; METADATA_RECORD_LENGTH * 64];
        let mut values_backing = vec![0u8; COUNTER_LENGTH * 64];
        let metadata = AtomicBuffer::wrap_slice(&mut metadata_backing);
        let values = AtomicBuffer::wrap_slice(&mut values_backing);
        let mgr = CountersManager::new(metadata, values).expect("manager");
        (metadata_backing, values_backing, mgr)
    }

    #[test]
    fn test_allocate_assigns_sequential_ids() {
        let (_m, _v, mut mgr) = manager();
        assert_eq!(mgr.allocate(1, 100, "snd-pos").expect("allocate"), 0);
        assert_eq!(mgr.allocate(1, 101, "pub-lmt").expect("allocate"), 1);
        assert_eq!(mgr.label(1), "pub-lmt");
    }

    #[test]
    fn test_free_recycles_ids() {
        let (_m, _v, mut mgr) = manager();
        let a = mgr.allocate(1, 1, "a").expect("allocate");
        let _b = mgr.allocate(1, 2, "b").expect("allocate");
        mgr.free(a);
        let c = mgr.allocate(1, 3, "c").expect("allocate");
        assert_eq!(c, a);
        assert_eq!(mgr.label(c), "c");
    }

    #[test]
    fn test_allocation_resets_value() {
        let (_m, _v, mut mgr) = manager();
        let id = mgr.allocate(1, 1, "a").expect("allocate");
        let counter = mgr.new_atomic_counter(id);
        counter.add(42);
        mgr.free(id);

        let id2 = mgr.allocate(1, 2, "b").expect("allocate");
        assert_eq!(id2, id);
        assert_eq!(mgr.new_atomic_counter(id2).get(), 0);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let (_m, _v, mut mgr) = manager();
        for i in 0..64 {
            mgr.allocate(1, i, "x").expect("allocate");
        }
        assert!(mgr.allocate(1, 64, "overflow").is_err());
    }

    #[test]
    fn test_position_single_writer_protocol() {
        let (_m, _v, mut mgr) = manager();
        let id = mgr.allocate(2, 7, "sub-pos").expect("allocate");
        let writer = mgr.new_position(id);
        let reader = mgr.new_position(id);

        writer.set_ordered(4096);
        assert_eq!(reader.get_volatile(), 4096);

        assert!(writer.propose_max_ordered(8192));
        assert!(!writer.propose_max_ordered(100));
        assert_eq!(reader.get_volatile(), 8192);
    }

    #[test]
    fn test_for_each_skips_freed() {
        let (_m, _v, mut mgr) = manager();
        let a = mgr.allocate(1, 1, "a").expect("allocate");
        let _b = mgr.allocate(1, 2, "b").expect("allocate");
        mgr.free(a);

        let mut seen = Vec::new();
        mgr.for_each(|id, _, _, label| seen.push((id, label.to_string())));
        assert_eq!(seen, vec![(1, "b".to_string())]);
    }

    #[test]
    fn test_system_counters_resolve() {
        let (_m, _v, mut mgr) = manager();
        let counters = SystemCounters::new(&mut mgr).expect("system counters");
        counters.get(SystemCounterId::NaksReceived).increment();
        assert_eq!(counters.get(SystemCounterId::NaksReceived).get(), 1);
        assert_eq!(counters.get(SystemCounterId::BytesSent).get(), 0);
        assert_eq!(
            mgr.label(counters.get(SystemCounterId::UnblockedPublications).id()),
            "Unblocked Publications"
        );
    }
}
