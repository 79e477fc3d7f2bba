use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::page::NodeId;

const UNSET_NODE: u32 = u32::MAX;

/// Per-slot metadata of a region.
///
/// Fields are atomics so that threads working on different slots of a
/// shared region can update their own frames without a lock. Two threads
/// on the same slot must be serialized by the caller.
pub struct Frame {
    node: AtomicU32,
    protected: AtomicBool,
}

impl Frame {
    pub(crate) fn new(protected: bool) -> Self {
        Self { node: AtomicU32::new(UNSET_NODE), protected: AtomicBool::new(protected) }
    }

    /// The NUMA node currently hosting the slot, if it was ever placed.
    pub fn node(&self) -> Option<NodeId> {
        match self.node.load(Ordering::Relaxed) {
            UNSET_NODE => None,
            id => Some(NodeId(id)),
        }
    }

    pub(crate) fn set_node(&self, node: NodeId) {
        debug_assert!(node.0 != UNSET_NODE, "Numa node has not been set.");
        self.node.store(node.0, Ordering::Relaxed);
    }

    /// True while the slot is `PROT_NONE` (debug protection only).
    pub fn is_protected(&self) -> bool {
        self.protected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_protected(&self, protected: bool) {
        self.protected.store(protected, Ordering::Relaxed);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("node", &self.node())
            .field("protected", &self.is_protected())
            .finish()
    }
}
