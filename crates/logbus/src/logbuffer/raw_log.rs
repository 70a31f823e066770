// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mapped log files and the factory that places them in the driver
//! directory.
//!
//! A raw log is the file behind one stream: three term partitions plus the
//! metadata trailer. The driver creates it, publications append to it,
//! subscribers map it read-only by path; the file is deleted when the
//! owning resource is deleted after its linger.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::concurrent::mmap::MappedFile;
use crate::error::Result;
use crate::logbuffer::descriptor::{
    check_term_length, compute_log_length, LOG_META_DATA_LENGTH, PARTITION_COUNT,
};
use std::path::{Path, PathBuf};

/// A memory-mapped term log: three partitions plus metadata.
pub struct RawLog {
    mapped: MappedFile,
    term_length: usize,
}

impl RawLog {
    /// Create the file and map it.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid term length or a failed mapping.
    pub fn create(path: &Path, term_length: usize, pre_touch: bool) -> Result<Self> {
        check_term_length(term_length)?;
        let mapped = MappedFile::create(path, compute_log_length(term_length))?;
        if pre_touch {
            mapped.pre_touch();
        }

        Ok(Self {
            mapped,
            term_length,
        })
    }

    /// Term partition length.
    #[inline]
    #[must_use]
    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// Path of the backing file, handed to clients in ready responses.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.mapped.path().display().to_string()
    }

    /// View over one term partition.
    #[must_use]
    pub fn term_buffer(&self, partition_index: usize) -> AtomicBuffer {
        debug_assert!(partition_index < PARTITION_COUNT);
        // SAFETY: the mapping is valid for its full size, which covers
        // every partition plus the trailer; RawLog keeps it alive.
        unsafe {
            AtomicBuffer::from_raw_parts(
                self.mapped.as_ptr().add(partition_index * self.term_length),
                self.term_length,
            )
        }
    }

    /// Views over all three term partitions.
    #[must_use]
    pub fn term_buffers(&self) -> Vec<AtomicBuffer> {
        (0..PARTITION_COUNT).map(|i| self.term_buffer(i)).collect()
    }

    /// View over the metadata trailer.
    #[must_use]
    pub fn meta_data(&self) -> AtomicBuffer {
        // SAFETY: trailer begins after the partitions, inside the mapping.
        unsafe {
            AtomicBuffer::from_raw_parts(
                self.mapped.as_ptr().add(PARTITION_COUNT * self.term_length),
                LOG_META_DATA_LENGTH,
            )
        }
    }

    /// Unmap and delete the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlink fails (missing file is fine).
    pub fn close(self) -> Result<()> {
        let path = self.mapped.path().to_path_buf();
        drop(self.mapped);
        MappedFile::unlink(&path)
    }
}

/// Creates raw logs under the driver directory.
///
/// ```text
/// <dir>/publications/<canonical>-<session>-<stream>-<correlation>.logbuffer
/// <dir>/images/<canonical>-<session>-<stream>-<correlation>.logbuffer
/// <dir>/ipc/<session>-<stream>-<correlation>.logbuffer
/// ```
pub struct LogFactory {
    dir: PathBuf,
    pre_touch: bool,
}

impl LogFactory {
    /// Create the factory and its subdirectories.
    ///
    /// # Errors
    ///
    /// Returns an error when the directories cannot be created.
    pub fn new(dir: &Path, pre_touch: bool) -> Result<Self> {
        for sub in ["publications", "images", "ipc"] {
            std::fs::create_dir_all(dir.join(sub))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            pre_touch,
        })
    }

    /// New log for a network publication.
    ///
    /// # Errors
    ///
    /// Propagates mapping failures.
    pub fn new_network_publication(
        &self,
        canonical_form: &str,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64,
        term_length: usize,
    ) -> Result<RawLog> {
        let path = self.dir.join("publications").join(format!(
            "{}-{}-{}-{}.logbuffer",
            sanitize(canonical_form),
            session_id,
            stream_id,
            correlation_id
        ));
        RawLog::create(&path, term_length, self.pre_touch)
    }

    /// New log for a publication image.
    ///
    /// # Errors
    ///
    /// Propagates mapping failures.
    pub fn new_image(
        &self,
        canonical_form: &str,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64,
        term_length: usize,
    ) -> Result<RawLog> {
        let path = self.dir.join("images").join(format!(
            "{}-{}-{}-{}.logbuffer",
            sanitize(canonical_form),
            session_id,
            stream_id,
            correlation_id
        ));
        RawLog::create(&path, term_length, self.pre_touch)
    }

    /// New log for an IPC publication.
    ///
    /// # Errors
    ///
    /// Propagates mapping failures.
    pub fn new_ipc_publication(
        &self,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64,
        term_length: usize,
    ) -> Result<RawLog> {
        let path = self.dir.join("ipc").join(format!(
            "{}-{}-{}.logbuffer",
            session_id, stream_id, correlation_id
        ));
        RawLog::create(&path, term_length, self.pre_touch)
    }
}

fn sanitize(canonical_form: &str) -> String {
    canonical_form
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::descriptor;

    fn unique_dir() -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("logbus_rawlog_{ts}"))
    }

    #[test]
    fn test_create_and_carve_views() {
        let dir = unique_dir();
        let factory = LogFactory::new(&dir, false).expect("factory");
        let log = factory
            .new_network_publication("udp-127.0.0.1-40123", 1, 10, 42, 64 * 1024)
            .expect("log");

        assert_eq!(log.term_length(), 64 * 1024);
        assert_eq!(log.term_buffers().len(), 3);
        assert_eq!(log.meta_data().capacity(), LOG_META_DATA_LENGTH);

        // Metadata survives independent views.
        descriptor::initialize(&log.meta_data(), 9, 64 * 1024, 1408, 42, &[0u8; 32]);
        assert_eq!(descriptor::initial_term_id(&log.meta_data()), 9);

        // Term views do not alias each other.
        log.term_buffer(0).put_i64(0, 1);
        assert_eq!(log.term_buffer(1).get_i64(0), 0);

        log.close().expect("close");
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn test_close_deletes_file() {
        let dir = unique_dir();
        let factory = LogFactory::new(&dir, false).expect("factory");
        let log = factory
            .new_ipc_publication(3, 30, 7, 64 * 1024)
            .expect("log");
        let path = PathBuf::from(log.file_name());
        assert!(path.exists());

        log.close().expect("close");
        assert!(!path.exists());

        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn test_rejects_bad_term_length() {
        let dir = unique_dir();
        let factory = LogFactory::new(&dir, false).expect("factory");
        assert!(factory.new_ipc_publication(1, 1, 1, 100_000).is_err());
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
