use std::ops::Range;
use std::ptr::NonNull;
use libc::c_void;
use nix::errno::Errno;
use nix::sys::mman::{self, MmapAdvise, ProtFlags};
use thiserror::Error;
use log::{info, error};

use crate::platform::os_page_size;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to map {len} bytes of anonymous virtual memory: {source}")]
    MapFailed { len: usize, source: Errno },
    #[error("Failed to unmap {len} bytes at {addr:#x}: {source}")]
    UnmapFailed { addr: usize, len: usize, source: Errno },
    #[error("Failed to mprotect {len} bytes at {addr:#x} ({access:?}): {source}")]
    ProtectFailed { addr: usize, len: usize, access: Access, source: Errno },
    #[error("Failed to call madvise({advice}) on {len} bytes at {addr:#x}: {source}")]
    AdviseFailed { advice: &'static str, addr: usize, len: usize, source: Errno },
    #[error("Invalid memory alignment: {0} is not a multiple of {1}")]
    InvalidAlignment(usize, usize),
    #[error("Range {start}..{end} is outside of a mapping of {len} bytes")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

/// Access rights applied to a span of a [`Mapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any access faults.
    None,
    ReadWrite,
}

impl Access {
    fn prot_flags(self) -> ProtFlags {
        match self {
            Access::None => ProtFlags::PROT_NONE,
            Access::ReadWrite => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        }
    }
}

/// One anonymous, non-reserving span of virtual memory.
///
/// The span is readable and writable from the start but carries no physical
/// memory until it is touched. All span operations take byte ranges relative
/// to the mapping base and are bounds checked against the mapping.
///
/// Dropping the mapping unmaps it. Use [`Mapping::release`] to observe the
/// `munmap` result instead.
pub struct Mapping {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: The mapping is plain process memory. It carries no thread affinity
// and every method that touches it goes through the kernel.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Reserves `len` bytes with `MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE`.
    ///
    /// # Errors
    /// Returns `InvalidAlignment` if `len` is not a multiple of the OS page
    /// size, `MapFailed` if the kernel refuses the mapping.
    pub fn reserve(len: usize) -> Result<Self, MemoryError> {
        let page_size = os_page_size();
        if len == 0 || len % page_size != 0 {
            return Err(MemoryError::InvalidAlignment(len, page_size));
        }

        #[cfg(target_os = "macos")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE;
        #[cfg(not(target_os = "macos"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;

        // SAFETY: Anonymous mapping at a kernel-chosen address, no fd involved.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(MemoryError::MapFailed { len, source: Errno::last() });
        }
        let base = NonNull::new(addr as *mut u8)
            .ok_or(MemoryError::MapFailed { len, source: Errno::EINVAL })?;

        info!("Reserved {} KiB of virtual memory at {:p}", len >> 10, base);
        Ok(Self { base, len })
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute address range `[base, base + len)`.
    pub fn address_range(&self) -> Range<usize> {
        let start = self.base.as_ptr() as usize;
        start..start + self.len
    }

    /// Changes the access rights of `range`.
    pub fn protect(&self, range: Range<usize>, access: Access) -> Result<(), MemoryError> {
        let (addr, len) = self.span(&range)?;
        // SAFETY: The span lies inside this mapping (checked by `span`).
        unsafe { mman::mprotect(addr, len, access.prot_flags()) }.map_err(|source| {
            MemoryError::ProtectFailed { addr: addr as usize, len, access, source }
        })
    }

    /// Gives the physical memory behind `range` back to the OS. The virtual
    /// range stays reserved; the next touch faults in a fresh page.
    ///
    /// Uses `MADV_FREE_REUSABLE` on macOS and `MADV_DONTNEED` elsewhere.
    pub fn advise_free(&self, range: Range<usize>) -> Result<(), MemoryError> {
        #[cfg(target_os = "macos")]
        let (advice, name) = (MmapAdvise::MADV_FREE_REUSABLE, "MADV_FREE_REUSABLE");
        #[cfg(not(target_os = "macos"))]
        let (advice, name) = (MmapAdvise::MADV_DONTNEED, "MADV_DONTNEED");

        self.advise(range, advice, name)
    }

    /// Tells the OS that a previously freed range is in use again.
    ///
    /// Only macOS needs the hint (`MADV_FREE_REUSE`) to keep its memory
    /// accounting right; on other platforms this only checks the range.
    pub fn advise_reuse(&self, range: Range<usize>) -> Result<(), MemoryError> {
        #[cfg(target_os = "macos")]
        {
            self.advise(range, MmapAdvise::MADV_FREE_REUSE, "MADV_FREE_REUSE")
        }
        #[cfg(not(target_os = "macos"))]
        {
            self.span(&range).map(|_| ())
        }
    }

    fn advise(&self, range: Range<usize>, advice: MmapAdvise, name: &'static str) -> Result<(), MemoryError> {
        let (addr, len) = self.span(&range)?;
        // SAFETY: The span lies inside this mapping (checked by `span`).
        unsafe { mman::madvise(addr, len, advice) }.map_err(|source| {
            MemoryError::AdviseFailed { advice: name, addr: addr as usize, len, source }
        })
    }

    /// Unmaps the whole reservation.
    ///
    /// # Errors
    /// Returns `UnmapFailed` if `munmap` fails. The mapping is not retried
    /// on drop in that case.
    pub fn release(self) -> Result<(), MemoryError> {
        let this = std::mem::ManuallyDrop::new(self);
        this.unmap()
    }

    fn unmap(&self) -> Result<(), MemoryError> {
        let addr = self.base.as_ptr() as *mut c_void;
        // SAFETY: `base`/`len` describe exactly the span returned by mmap.
        unsafe { mman::munmap(addr, self.len) }.map_err(|source| MemoryError::UnmapFailed {
            addr: addr as usize,
            len: self.len,
            source,
        })?;
        info!("Released {} KiB of virtual memory at {:p}", self.len >> 10, self.base);
        Ok(())
    }

    fn span(&self, range: &Range<usize>) -> Result<(*mut c_void, usize), MemoryError> {
        if range.start >= range.end || range.end > self.len {
            return Err(MemoryError::OutOfBounds { start: range.start, end: range.end, len: self.len });
        }
        // SAFETY: `range.start < self.len`, so the offset stays inside the mapping.
        let addr = unsafe { self.base.as_ptr().add(range.start) };
        Ok((addr as *mut c_void, range.end - range.start))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(err) = self.unmap() {
            error!("{}", err);
        }
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}
