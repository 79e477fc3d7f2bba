use std::cell::RefCell;
use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::Arc;
use libc::{c_int, c_void};
use log::{debug, warn};
use strata_io::platform::numa;
use strata_io::{NumaError, NumaTopology};

use crate::page::NodeId;

/// The OS side of NUMA placement.
///
/// A region performs its bookkeeping itself and only asks the backend to
/// move memory. Backends that are not available turn every placement
/// request of the region into a no-op.
pub trait NumaBackend: Send + Sync + Debug {
    /// False if placement requests must be skipped.
    fn is_available(&self) -> bool;

    /// One past the highest node id a page may be placed on.
    fn node_count(&self) -> usize;

    /// Sets a strict bind policy on `[ptr, ptr + len)` and moves resident
    /// pages onto `node`.
    ///
    /// # Safety
    /// `ptr` must be OS-page aligned and the span must lie inside a live
    /// mapping.
    unsafe fn bind(&self, ptr: NonNull<u8>, len: usize, node: NodeId) -> Result<(), NumaError>;

    /// Moves the already faulted-in OS pages of `[ptr, ptr + len)` onto
    /// `node` one by one, without touching the policy of the span.
    ///
    /// # Safety
    /// Same as [`NumaBackend::bind`].
    unsafe fn move_resident(&self, ptr: NonNull<u8>, len: usize, os_page_size: usize, node: NodeId)
        -> Result<(), NumaError>;
}

/// Placement through the kernel's `mbind` and `move_pages` syscalls.
#[derive(Debug, Clone)]
pub struct KernelNuma {
    node_count: usize,
}

impl KernelNuma {
    /// Returns a backend for `topology`, or `None` if the kernel rejects
    /// memory-policy syscalls.
    pub fn new(topology: &NumaTopology) -> Option<Self> {
        topology.is_available().then(|| Self { node_count: topology.node_count() })
    }
}

#[derive(Default)]
struct MoveStaging {
    pages: Vec<*mut c_void>,
    nodes: Vec<c_int>,
    status: Vec<c_int>,
}

thread_local! {
    // Reused across calls; one entry per OS page of the slot being moved.
    static MOVE_STAGING: RefCell<MoveStaging> = RefCell::new(MoveStaging::default());
}

impl NumaBackend for KernelNuma {
    fn is_available(&self) -> bool {
        true
    }

    fn node_count(&self) -> usize {
        self.node_count
    }

    unsafe fn bind(&self, ptr: NonNull<u8>, len: usize, node: NodeId) -> Result<(), NumaError> {
        numa::mbind(ptr.as_ptr() as *mut c_void, len, node.0)
    }

    unsafe fn move_resident(&self, ptr: NonNull<u8>, len: usize, os_page_size: usize, node: NodeId)
        -> Result<(), NumaError> {
        MOVE_STAGING.with(|staging| {
            let mut staging = staging.borrow_mut();
            let MoveStaging { pages, nodes, status } = &mut *staging;
            let count = len / os_page_size;

            pages.clear();
            pages.extend((0..count).map(|i| ptr.as_ptr().wrapping_add(i * os_page_size) as *mut c_void));
            nodes.clear();
            nodes.resize(count, node.0 as c_int);
            status.clear();
            status.resize(count, 0);

            // SAFETY: Every address is an OS page inside the caller's span.
            let left = unsafe { numa::move_pages(pages, nodes, status) }?;
            if left > 0 {
                debug!("move_pages left {}/{} pages at {:p} in place", left, count, ptr);
            }
            Ok(())
        })
    }
}

/// Placement disabled: NUMA compiled out, switched off, or rejected by the
/// kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNuma;

impl NumaBackend for NoNuma {
    fn is_available(&self) -> bool {
        false
    }

    fn node_count(&self) -> usize {
        1
    }

    unsafe fn bind(&self, _ptr: NonNull<u8>, _len: usize, _node: NodeId) -> Result<(), NumaError> {
        Ok(())
    }

    unsafe fn move_resident(&self, _ptr: NonNull<u8>, _len: usize, _os_page_size: usize, _node: NodeId)
        -> Result<(), NumaError> {
        Ok(())
    }
}

/// Picks the backend for this process.
///
/// Falls back to [`NoNuma`] with a warning if NUMA was requested but the
/// kernel does not support it.
pub fn detect_backend(numa_enabled: bool) -> Arc<dyn NumaBackend> {
    if !numa_enabled {
        debug!("NUMA placement disabled by configuration");
        return Arc::new(NoNuma);
    }
    match KernelNuma::new(NumaTopology::get()) {
        Some(kernel) => Arc::new(kernel),
        None => {
            warn!("NUMA placement requested but not supported by this kernel. Migrations are no-ops.");
            Arc::new(NoNuma)
        }
    }
}

#[cfg(test)]
pub(crate) mod simulated {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use super::*;

    /// Accepts every placement request on a topology of any size without
    /// touching memory.
    #[derive(Debug, Default)]
    pub(crate) struct SimulatedNuma {
        pub node_count: usize,
        pub binds: AtomicUsize,
        pub moved_os_pages: AtomicUsize,
    }

    impl SimulatedNuma {
        pub(crate) fn new(node_count: usize) -> Arc<Self> {
            Arc::new(Self { node_count, ..Default::default() })
        }
    }

    impl NumaBackend for SimulatedNuma {
        fn is_available(&self) -> bool {
            true
        }

        fn node_count(&self) -> usize {
            self.node_count
        }

        unsafe fn bind(&self, _ptr: NonNull<u8>, _len: usize, node: NodeId) -> Result<(), NumaError> {
            assert!(node.index() < self.node_count);
            self.binds.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        unsafe fn move_resident(&self, _ptr: NonNull<u8>, len: usize, os_page_size: usize, node: NodeId)
            -> Result<(), NumaError> {
            assert!(node.index() < self.node_count);
            self.moved_os_pages.fetch_add(len / os_page_size, Ordering::Relaxed);
            Ok(())
        }
    }
}
