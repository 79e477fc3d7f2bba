//! Strata I/O: the OS layer under the buffer pool's volatile regions.
//!
//! This crate owns every raw syscall the regions rely on: anonymous mappings,
//! protection and advisory hints (`mman`), plus NUMA policy syscalls and
//! topology discovery (`platform`). Higher layers never call `libc` directly.

pub mod mman;
pub mod platform;

// Re-exports for easier access by strata-buffer
pub use mman::{Access, Mapping, MemoryError};
pub use platform::numa::NumaError;
pub use platform::os_page_size;
pub use platform::topology::NumaTopology;
