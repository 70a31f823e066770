// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The control (CnC) file shared between the driver and its clients.
//!
//! One memory-mapped file in the driver directory exposing, in order: the
//! to-driver command ring, the to-clients broadcast, the counters
//! metadata and values, and the distinct error log. The header records
//! the layout so clients can slice the same regions:
//!
//! ```text
//!   0: version                (i32)
//!   4: to-driver length       (i32, including ring trailer)
//!   8: to-clients length      (i32, including broadcast trailer)
//!  12: counters metadata len  (i32)
//!  16: counters values len    (i32)
//!  20: error log length       (i32)
//!  24: client liveness (ns)   (i64)
//! ```
//!
//! Each region starts aligned to twice the cache line size. A version
//! mismatch is fatal at startup: drivers and clients must not interpret
//! each other's layouts across versions.

use crate::bits::{align, CACHE_LINE_LENGTH};
use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::concurrent::broadcast;
use crate::concurrent::counters::{COUNTER_LENGTH, METADATA_RECORD_LENGTH};
use crate::concurrent::mmap::MappedFile;
use crate::concurrent::ringbuffer;
use crate::error::{DriverError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the control file within the driver directory.
pub const CNC_FILE: &str = "cnc.dat";

/// Layout version stamped into the header.
pub const CNC_VERSION: i32 = 1;

const VERSION_OFFSET: usize = 0;
const TO_DRIVER_LENGTH_OFFSET: usize = 4;
const TO_CLIENTS_LENGTH_OFFSET: usize = 8;
const COUNTER_METADATA_LENGTH_OFFSET: usize = 12;
const COUNTER_VALUES_LENGTH_OFFSET: usize = 16;
const ERROR_LOG_LENGTH_OFFSET: usize = 20;
const CLIENT_LIVENESS_TIMEOUT_OFFSET: usize = 24;

/// Header length; regions follow aligned to two cache lines.
pub const CNC_HEADER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

const REGION_ALIGNMENT: usize = CACHE_LINE_LENGTH * 2;

/// The mapped control file and its region layout.
pub struct CncFile {
    mapped: Arc<MappedFile>,
    to_driver_length: usize,
    to_clients_length: usize,
    counter_metadata_length: usize,
    counter_values_length: usize,
    error_log_length: usize,
}

impl CncFile {
    /// Path of the control file under `dir`.
    #[must_use]
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(CNC_FILE)
    }

    /// Create and initialize the control file.
    ///
    /// `to_driver_capacity` and `to_clients_capacity` are the data
    /// capacities (powers of two); the respective trailers are added
    /// here.
    ///
    /// # Errors
    ///
    /// Propagates mapping failures.
    pub fn create(
        dir: &Path,
        to_driver_capacity: usize,
        to_clients_capacity: usize,
        counter_values_length: usize,
        error_log_length: usize,
        client_liveness_timeout_ns: u64,
    ) -> Result<Self> {
        let to_driver_length = to_driver_capacity + ringbuffer::TRAILER_LENGTH;
        let to_clients_length = to_clients_capacity + broadcast::TRAILER_LENGTH;
        let counter_metadata_length =
            (counter_values_length / COUNTER_LENGTH) * METADATA_RECORD_LENGTH;

        let total = Self::total_length(
            to_driver_length,
            to_clients_length,
            counter_metadata_length,
            counter_values_length,
            error_log_length,
        );

        let mapped = Arc::new(MappedFile::create(&Self::path(dir), total)?);

        // SAFETY: the mapping spans `total` bytes and is page aligned.
        let header = unsafe { AtomicBuffer::from_raw_parts(mapped.as_ptr(), CNC_HEADER_LENGTH) };
        header.put_i32(TO_DRIVER_LENGTH_OFFSET, to_driver_length as i32);
        header.put_i32(TO_CLIENTS_LENGTH_OFFSET, to_clients_length as i32);
        header.put_i32(COUNTER_METADATA_LENGTH_OFFSET, counter_metadata_length as i32);
        header.put_i32(COUNTER_VALUES_LENGTH_OFFSET, counter_values_length as i32);
        header.put_i32(ERROR_LOG_LENGTH_OFFSET, error_log_length as i32);
        header.put_i64(
            CLIENT_LIVENESS_TIMEOUT_OFFSET,
            client_liveness_timeout_ns as i64,
        );
        // Version last: clients gate on it.
        header.put_i32_ordered(VERSION_OFFSET, CNC_VERSION);

        Ok(Self {
            mapped,
            to_driver_length,
            to_clients_length,
            counter_metadata_length,
            counter_values_length,
            error_log_length,
        })
    }

    /// Map an existing control file, verifying the version.
    ///
    /// # Errors
    ///
    /// `VersionMismatch` when the file was written by a different layout
    /// version; mapping errors otherwise.
    pub fn map_existing(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let probe = MappedFile::map_existing(&path, CNC_HEADER_LENGTH)?;
        // SAFETY: probe mapping covers the header.
        let header = unsafe { AtomicBuffer::from_raw_parts(probe.as_ptr(), CNC_HEADER_LENGTH) };

        let version = header.get_i32_volatile(VERSION_OFFSET);
        if version != CNC_VERSION {
            return Err(DriverError::VersionMismatch {
                expected: CNC_VERSION,
                actual: version,
            });
        }

        let to_driver_length = header.get_i32(TO_DRIVER_LENGTH_OFFSET) as usize;
        let to_clients_length = header.get_i32(TO_CLIENTS_LENGTH_OFFSET) as usize;
        let counter_metadata_length = header.get_i32(COUNTER_METADATA_LENGTH_OFFSET) as usize;
        let counter_values_length = header.get_i32(COUNTER_VALUES_LENGTH_OFFSET) as usize;
        let error_log_length = header.get_i32(ERROR_LOG_LENGTH_OFFSET) as usize;
        drop(probe);

        let total = Self::total_length(
            to_driver_length,
            to_clients_length,
            counter_metadata_length,
            counter_values_length,
            error_log_length,
        );
        let mapped = Arc::new(MappedFile::map_existing(&path, total)?);

        Ok(Self {
            mapped,
            to_driver_length,
            to_clients_length,
            counter_metadata_length,
            counter_values_length,
            error_log_length,
        })
    }

    /// Client liveness timeout recorded in the header.
    #[must_use]
    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.header().get_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET)
    }

    /// The to-driver command ring region.
    #[must_use]
    pub fn to_driver_buffer(&self) -> AtomicBuffer {
        self.region(self.to_driver_offset(), self.to_driver_length)
    }

    /// The to-clients broadcast region.
    #[must_use]
    pub fn to_clients_buffer(&self) -> AtomicBuffer {
        self.region(self.to_clients_offset(), self.to_clients_length)
    }

    /// The counters metadata region.
    #[must_use]
    pub fn counter_metadata_buffer(&self) -> AtomicBuffer {
        self.region(self.counter_metadata_offset(), self.counter_metadata_length)
    }

    /// The counters values region.
    #[must_use]
    pub fn counter_values_buffer(&self) -> AtomicBuffer {
        self.region(self.counter_values_offset(), self.counter_values_length)
    }

    /// The distinct error log region.
    #[must_use]
    pub fn error_log_buffer(&self) -> AtomicBuffer {
        self.region(self.error_log_offset(), self.error_log_length)
    }

    /// Keep the mapping alive beyond this handle.
    #[must_use]
    pub fn mapped(&self) -> Arc<MappedFile> {
        Arc::clone(&self.mapped)
    }

    /// Delete the control file (driver shutdown).
    ///
    /// # Errors
    ///
    /// Propagates the unlink failure.
    pub fn unlink(dir: &Path) -> Result<()> {
        MappedFile::unlink(&Self::path(dir))
    }

    fn header(&self) -> AtomicBuffer {
        self.region(0, CNC_HEADER_LENGTH)
    }

    fn region(&self, offset: usize, length: usize) -> AtomicBuffer {
        // SAFETY: offsets are derived from total_length, which sized the
        // mapping; the Arc keeps it alive.
        unsafe { AtomicBuffer::from_raw_parts(self.mapped.as_ptr().add(offset), length) }
    }

    fn to_driver_offset(&self) -> usize {
        align(CNC_HEADER_LENGTH, REGION_ALIGNMENT)
    }

    fn to_clients_offset(&self) -> usize {
        align(self.to_driver_offset() + self.to_driver_length, REGION_ALIGNMENT)
    }

    fn counter_metadata_offset(&self) -> usize {
        align(
            self.to_clients_offset() + self.to_clients_length,
            REGION_ALIGNMENT,
        )
    }

    fn counter_values_offset(&self) -> usize {
        align(
            self.counter_metadata_offset() + self.counter_metadata_length,
            REGION_ALIGNMENT,
        )
    }

    fn error_log_offset(&self) -> usize {
        align(
            self.counter_values_offset() + self.counter_values_length,
            REGION_ALIGNMENT,
        )
    }

    fn total_length(
        to_driver_length: usize,
        to_clients_length: usize,
        counter_metadata_length: usize,
        counter_values_length: usize,
        error_log_length: usize,
    ) -> usize {
        let mut offset = align(CNC_HEADER_LENGTH, REGION_ALIGNMENT);
        offset = align(offset + to_driver_length, REGION_ALIGNMENT);
        offset = align(offset + to_clients_length, REGION_ALIGNMENT);
        offset = align(offset + counter_metadata_length, REGION_ALIGNMENT);
        offset = align(offset + counter_values_length, REGION_ALIGNMENT);
        offset + error_log_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unique_dir() -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("logbus_cnc_{ts}"));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn test_create_and_map_existing() {
        let dir = unique_dir();
        let cnc = CncFile::create(&dir, 64 * 1024, 64 * 1024, 64 * 1024, 8 * 1024, 5_000_000_000)
            .expect("create");

        assert_eq!(cnc.client_liveness_timeout_ns(), 5_000_000_000);
        assert_eq!(
            cnc.to_driver_buffer().capacity(),
            64 * 1024 + ringbuffer::TRAILER_LENGTH
        );

        // The driver writes through one view, a client reads the other.
        cnc.counter_values_buffer().put_i64(0, 777);
        let client_view = CncFile::map_existing(&dir).expect("map");
        assert_eq!(client_view.counter_values_buffer().get_i64(0), 777);

        drop(cnc);
        drop(client_view);
        CncFile::unlink(&dir).expect("unlink");
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let dir = unique_dir();
        let cnc = CncFile::create(&dir, 64 * 1024, 64 * 1024, 64 * 1024, 8 * 1024, 1).expect("create");

        // Corrupt the version in place.
        cnc.header().put_i32_ordered(VERSION_OFFSET, CNC_VERSION + 9);

        match CncFile::map_existing(&dir) {
            Err(DriverError::VersionMismatch { expected, actual }) => {
                assert_eq!(expected, CNC_VERSION);
                assert_eq!(actual, CNC_VERSION + 9);
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
        }

        drop(cnc);
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn test_regions_do_not_overlap() {
        let dir = unique_dir();
        let cnc = CncFile::create(&dir, 64 * 1024, 64 * 1024, 64 * 1024, 8 * 1024, 1).expect("create");

        cnc.to_driver_buffer().put_i64(0, 1);
        cnc.to_clients_buffer().put_i64(0, 2);
        cnc.counter_metadata_buffer().put_i64(0, 3);
        cnc.counter_values_buffer().put_i64(0, 4);
        cnc.error_log_buffer().put_i64(0, 5);

        assert_eq!(cnc.to_driver_buffer().get_i64(0), 1);
        assert_eq!(cnc.to_clients_buffer().get_i64(0), 2);
        assert_eq!(cnc.counter_metadata_buffer().get_i64(0), 3);
        assert_eq!(cnc.counter_values_buffer().get_i64(0), 4);
        assert_eq!(cnc.error_log_buffer().get_i64(0), 5);

        drop(cnc);
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
