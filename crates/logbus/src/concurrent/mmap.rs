// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory-mapped file management.
//!
//! Provides safe wrappers around `open`, `ftruncate`, and `mmap` for the
//! files shared between the driver and its clients: term log files and the
//! control (CnC) file.
//!
//! # Lifecycle
//!
//! 1. The driver creates a file with [`MappedFile::create`]
//! 2. Clients map the same path with [`MappedFile::map_existing`]
//! 3. The mapping is unmapped on drop
//! 4. The creator unlinks the path once the last participant has released it

use crate::error::{DriverError, Result};
use std::ffi::CString;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr;

/// A file-backed shared memory mapping.
///
/// Automatically unmaps the region on drop. Does NOT delete the file
/// (caller's responsibility, see [`MappedFile::unlink`]).
pub struct MappedFile {
    /// Pointer to the mapped region
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// Path backing the mapping (for unlink)
    path: PathBuf,
}

// SAFETY: the mapping is shared memory accessed from multiple threads and
// processes. All concurrent mutation goes through atomic operations on
// AtomicBuffer views; the raw pointer itself is never reallocated.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Create a new file of `size` bytes and map it read-write.
    ///
    /// An existing file at `path` is truncated. The mapping is
    /// zero-initialized by the kernel (fresh file pages read as zero).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, sized, or mapped.
    pub fn create(path: &Path, size: usize) -> Result<Self> {
        let c_path = path_to_cstring(path)?;

        // SAFETY:
        // - c_path is a valid null-terminated CString created above
        // - O_CREAT|O_RDWR|O_TRUNC with 0o644 creates or resets the file
        // - open returns a valid fd on success or -1 on error (checked below)
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC, 0o644) };
        if fd < 0 {
            return Err(DriverError::Io(io::Error::last_os_error()));
        }

        // SAFETY:
        // - fd is a valid descriptor from the successful open above
        // - ftruncate fails gracefully if size exceeds filesystem limits
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid; we are on the error path and never reuse it.
            unsafe { libc::close(fd) };
            return Err(DriverError::Io(err));
        }

        let ptr = Self::map_fd(fd, size)?;

        Ok(Self {
            ptr,
            size,
            path: path.to_path_buf(),
        })
    }

    /// Map an existing file read-write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, is smaller than `size`,
    /// or cannot be mapped.
    pub fn map_existing(path: &Path, size: usize) -> Result<Self> {
        let c_path = path_to_cstring(path)?;

        // SAFETY: c_path is a valid CString; O_RDWR opens without creating.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(DriverError::Io(io::Error::last_os_error()));
        }

        // Reject short files before mapping; faulting past EOF is SIGBUS.
        // SAFETY: fd is valid; fstat writes into the zeroed stat struct.
        let file_len = unsafe {
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(DriverError::Io(err));
            }
            stat.st_size as usize
        };
        if file_len < size {
            // SAFETY: fd is valid; error path, never reused.
            unsafe { libc::close(fd) };
            return Err(DriverError::Mapping(format!(
                "{} is {} bytes, expected at least {}",
                path.display(),
                file_len,
                size
            )));
        }

        let ptr = Self::map_fd(fd, size)?;

        Ok(Self {
            ptr,
            size,
            path: path.to_path_buf(),
        })
    }

    fn map_fd(fd: libc::c_int, size: usize) -> Result<*mut u8> {
        // SAFETY:
        // - null hint lets the kernel choose the address
        // - PROT_READ|PROT_WRITE and MAP_SHARED give a cross-process mapping
        // - fd is valid from the caller; offset 0 maps from the start
        // - mmap returns MAP_FAILED on error (checked below)
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: the mapping (when it succeeded) holds its own reference;
        // closing fd is safe either way.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(DriverError::Io(io::Error::last_os_error()));
        }

        Ok(ptr.cast::<u8>())
    }

    /// Delete the backing file. Idempotent: a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than the file being absent.
    pub fn unlink(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DriverError::Io(e)),
        }
    }

    /// Raw pointer to the mapped region.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Path of the backing file.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Touch every page so first-append latency is not paid on the hot path.
    pub fn pre_touch(&self) {
        let page = 4096;
        let mut offset = 0;
        while offset < self.size {
            // SAFETY: offset < self.size, so the write is inside the mapping.
            // Volatile so the compiler cannot elide the fault-in.
            unsafe {
                let p = self.ptr.add(offset);
                p.write_volatile(p.read_volatile());
            }
            offset += page;
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.size came from a successful mmap and Drop
        // runs once; after munmap the pointer is never used again.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
        // The file itself stays; the creator decides when to unlink.
    }
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| DriverError::Mapping(format!("path contains NUL: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_path(tag: &str) -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("logbus_mmap_{tag}_{ts}"))
    }

    #[test]
    fn test_create_and_map_existing() {
        let path = unique_path("create");
        let size = 8192;

        let mapped = MappedFile::create(&path, size).expect("create");
        assert_eq!(mapped.size(), size);

        // SAFETY: offsets 0 and 1 are inside the fresh 8 KiB mapping.
        unsafe {
            *mapped.as_ptr() = 0xAB;
            *mapped.as_ptr().add(1) = 0xCD;
        }

        let other = MappedFile::map_existing(&path, size).expect("map existing");
        // SAFETY: same file, same offsets, written above through `mapped`.
        unsafe {
            assert_eq!(*other.as_ptr(), 0xAB);
            assert_eq!(*other.as_ptr().add(1), 0xCD);
        }

        drop(mapped);
        drop(other);
        MappedFile::unlink(&path).expect("unlink");
    }

    #[test]
    fn test_map_existing_rejects_short_file() {
        let path = unique_path("short");
        let mapped = MappedFile::create(&path, 4096).expect("create");
        drop(mapped);

        let result = MappedFile::map_existing(&path, 8192);
        assert!(matches!(result, Err(DriverError::Mapping(_))));

        MappedFile::unlink(&path).expect("unlink");
    }

    #[test]
    fn test_fresh_mapping_reads_zero() {
        let path = unique_path("zero");
        let mapped = MappedFile::create(&path, 4096).expect("create");

        // SAFETY: offsets below 4096 are inside the mapping.
        unsafe {
            assert_eq!(*mapped.as_ptr(), 0);
            assert_eq!(*mapped.as_ptr().add(4095), 0);
        }

        drop(mapped);
        MappedFile::unlink(&path).expect("unlink");
    }

    #[test]
    fn test_unlink_idempotent() {
        let path = unique_path("unlink");
        let mapped = MappedFile::create(&path, 4096).expect("create");
        drop(mapped);

        assert!(MappedFile::unlink(&path).is_ok());
        assert!(MappedFile::unlink(&path).is_ok());
    }
}
