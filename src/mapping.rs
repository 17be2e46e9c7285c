use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use memmap2::{Mmap, MmapOptions};

use crate::error::{ProbeError, Result};

/// What is done to a mapping's pages before measuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Left to the kernel; pages may or may not be in memory.
    Cold,
    /// Locked into physical memory with `mlock`.
    Pinned,
}

/// A whole file mapped private and read-only.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    map: Mmap,
    residency: Residency,
}

impl MappedFile {
    pub fn open(path: impl AsRef<Path>, residency: Residency) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            File::open(&path).map_err(|source| ProbeError::Open { path: path.clone(), source })?;
        let len = file
            .metadata()
            .map_err(|source| ProbeError::Stat { path: path.clone(), source })?
            .len();
        if len == 0 {
            return Err(ProbeError::EmptyMapping { path });
        }

        // SAFETY: the mapping is private and read-only; the files under test
        // are not expected to be truncated while we run.
        let map = unsafe { MmapOptions::new().map_copy_read_only(&file) }
            .map_err(|source| ProbeError::Map { path: path.clone(), source })?;
        debug!("mapped {} ({len} bytes) at {:p}", path.display(), map.as_ptr());

        let mapped = Self { path, map, residency };
        if residency == Residency::Pinned {
            mapped.lock()?;
            info!("pinned {} ({} bytes)", mapped.path.display(), mapped.len());
        }
        Ok(mapped)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Unlocks a pinned mapping and unmaps it. Only `munlock` can fail here:
    /// the unmap happens in memmap2's `Drop`, which discards `munmap` errors.
    pub fn release(self) -> Result<()> {
        if self.residency == Residency::Pinned {
            // SAFETY: pointer and length describe the live mapping.
            let rc = unsafe { libc::munlock(self.map.as_ptr().cast(), self.map.len()) };
            if rc == -1 {
                let source = io::Error::last_os_error();
                return Err(ProbeError::Unpin { path: self.path, source });
            }
        }
        debug!("unmapping {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> Result<()> {
        // SAFETY: pointer and length describe the live mapping.
        let rc = unsafe { libc::mlock(self.map.as_ptr().cast(), self.map.len()) };
        if rc == -1 {
            let source = io::Error::last_os_error();
            return Err(ProbeError::Pin { path: self.path.clone(), source });
        }
        Ok(())
    }
}
