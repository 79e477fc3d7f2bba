pub mod numa;
pub mod topology;

use std::sync::OnceLock;
use log::warn;

/// Fallback when `sysconf` cannot report the page size.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Returns the native OS page size in bytes.
///
/// # Logic
/// Queries `sysconf(_SC_PAGESIZE)` once and caches the answer for the
/// lifetime of the process. Every span handed to `mprotect`, `madvise`,
/// `mbind` or `move_pages` must be a multiple of this value.
pub fn os_page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: FFI call without pointer arguments.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            warn!("Failed to query the OS page size via sysconf. Fallback to {}.", FALLBACK_PAGE_SIZE);
            FALLBACK_PAGE_SIZE
        } else {
            size as usize
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = os_page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
        assert_eq!(size, os_page_size());
    }
}
