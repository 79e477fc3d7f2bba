//! Raw NUMA memory-policy syscalls.
//!
//! `libc` does not wrap `mbind`, `move_pages` or `get_mempolicy`, so they
//! are issued through `libc::syscall` with the constants from
//! `<linux/mempolicy.h>`. Without Linux or without the `numa` feature every
//! call reports [`NumaError::Unsupported`] and [`is_available`] is false.

use std::io;
use libc::{c_int, c_uint, c_ulong, c_void};
use thiserror::Error;

pub const MPOL_BIND: c_int = 2;
pub const MPOL_MF_STRICT: c_uint = 1 << 0;
pub const MPOL_MF_MOVE: c_uint = 1 << 1;

#[derive(Error, Debug)]
pub enum NumaError {
    #[error("Mbind failed: {0}. Either no space is left or vm map count is exhausted. Try: \"sudo sysctl vm.max_map_count=X\"")]
    BindFailed(io::Error),
    #[error("Move pages failed: {0}")]
    MovePagesFailed(io::Error),
    #[error("NUMA syscalls are not supported on this platform")]
    Unsupported,
}

/// A kernel node mask (`unsigned long[]` bitmap) with a single node set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMask {
    words: Vec<c_ulong>,
}

impl NodeMask {
    pub fn single(node: u32) -> Self {
        let bits = c_ulong::BITS;
        let word = (node / bits) as usize;
        let mut words = vec![0; word + 1];
        words[word] = 1 << (node % bits);
        Self { words }
    }

    pub fn as_ptr(&self) -> *const c_ulong {
        self.words.as_ptr()
    }

    /// The `maxnode` argument for this mask. The kernel reads `maxnode - 1`
    /// bits, hence the extra one.
    pub fn max_node(&self) -> c_ulong {
        (self.words.len() * c_ulong::BITS as usize + 1) as c_ulong
    }
}

/// Returns true if the kernel accepts memory-policy syscalls.
///
/// # Logic
/// Mirrors libnuma's `numa_available()`: a `get_mempolicy` query for the
/// calling thread fails with `ENOSYS` on kernels built without NUMA and with
/// `EPERM` under seccomp profiles that filter the policy syscalls.
pub fn is_available() -> bool {
    #[cfg(all(target_os = "linux", feature = "numa"))]
    {
        // SAFETY: Null mode/mask pointers with maxnode 0 query nothing.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_get_mempolicy,
                std::ptr::null_mut::<c_int>(),
                std::ptr::null_mut::<c_ulong>(),
                0 as c_ulong,
                std::ptr::null_mut::<c_void>(),
                0 as c_ulong,
            )
        };
        ret == 0
    }
    #[cfg(not(all(target_os = "linux", feature = "numa")))]
    {
        false
    }
}

/// Binds `[addr, addr + len)` to `node` and migrates already resident pages
/// with `MPOL_MF_MOVE | MPOL_MF_STRICT`.
///
/// # Safety
/// `addr` must be page aligned and `[addr, addr + len)` must lie inside a
/// live mapping owned by the caller.
pub unsafe fn mbind(addr: *mut c_void, len: usize, node: u32) -> Result<(), NumaError> {
    #[cfg(all(target_os = "linux", feature = "numa"))]
    {
        let mask = NodeMask::single(node);
        let ret = libc::syscall(
            libc::SYS_mbind,
            addr,
            len as c_ulong,
            MPOL_BIND as c_ulong,
            mask.as_ptr(),
            mask.max_node(),
            (MPOL_MF_MOVE | MPOL_MF_STRICT) as c_ulong,
        );
        if ret != 0 {
            return Err(NumaError::BindFailed(io::Error::last_os_error()));
        }
        Ok(())
    }
    #[cfg(not(all(target_os = "linux", feature = "numa")))]
    {
        let _ = (addr, len, node);
        Err(NumaError::Unsupported)
    }
}

/// Moves the resident pages listed in `pages` to the nodes listed in `nodes`
/// (`move_pages(2)` on the calling process with `MPOL_MF_MOVE`).
///
/// Returns the number of pages the kernel left in place. Per-page results
/// land in `status`.
///
/// # Safety
/// Every entry of `pages` must be a page-aligned address inside a live
/// mapping owned by the caller. `pages`, `nodes` and `status` must have the
/// same length.
pub unsafe fn move_pages(pages: &[*mut c_void], nodes: &[c_int], status: &mut [c_int]) -> Result<usize, NumaError> {
    debug_assert!(pages.len() == nodes.len() && pages.len() == status.len());
    #[cfg(all(target_os = "linux", feature = "numa"))]
    {
        let ret = libc::syscall(
            libc::SYS_move_pages,
            0 as c_int,
            pages.len() as c_ulong,
            pages.as_ptr(),
            nodes.as_ptr(),
            status.as_mut_ptr(),
            MPOL_MF_MOVE as c_int,
        );
        if ret < 0 {
            return Err(NumaError::MovePagesFailed(io::Error::last_os_error()));
        }
        Ok(ret as usize)
    }
    #[cfg(not(all(target_os = "linux", feature = "numa")))]
    {
        let _ = (pages, nodes, status);
        Err(NumaError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_mask_layout() {
        let mask = NodeMask::single(0);
        assert_eq!(mask.words, vec![1]);
        assert_eq!(mask.max_node(), c_ulong::BITS as c_ulong + 1);

        let high = NodeMask::single(c_ulong::BITS + 3);
        assert_eq!(high.words, vec![0, 1 << 3]);
        assert_eq!(high.max_node(), 2 * c_ulong::BITS as c_ulong + 1);
    }

    #[test]
    fn test_availability_probe_does_not_fail() {
        // Only checks that the probe is callable; the answer depends on the host.
        let _ = is_available();
    }
}
