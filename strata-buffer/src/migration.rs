use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;

use crate::page::{bytes_for_size_type, NodeId, MAX_PAGE_SIZE_TYPE};

/// How a region moves a slot's memory to another NUMA node.
///
/// All strategies leave the same observable state behind: the frame records
/// the target node and the region's migration counter grows by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationStrategy {
    /// `mbind` with a strict bind policy; moves resident pages and steers
    /// future faults.
    BindPolicy,
    /// `move_pages` on every resident OS page of the slot; the policy of
    /// the span is left alone.
    MoveResidentPages,
    /// Copy out to a thread-local scratch buffer, free, re-bind, copy back.
    /// Avoids kernel page migration at the price of two copies.
    CopyViaScratch,
}

impl MigrationStrategy {
    pub const ALL: [MigrationStrategy; 3] = [
        MigrationStrategy::BindPolicy,
        MigrationStrategy::MoveResidentPages,
        MigrationStrategy::CopyViaScratch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MigrationStrategy::BindPolicy => "mbind",
            MigrationStrategy::MoveResidentPages => "move_pages",
            MigrationStrategy::CopyViaScratch => "memcpy",
        }
    }
}

impl fmt::Display for MigrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MigrationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| format!("unknown migration strategy '{}' (expected mbind, move_pages or memcpy)", s))
    }
}

/// Bytes reserved per NUMA node in the scratch buffer.
const SCRATCH_SLOT_BYTES: usize = bytes_for_size_type(MAX_PAGE_SIZE_TYPE);

thread_local! {
    // Lives as long as the thread. Holds one max-size slot per NUMA node.
    static SCRATCH: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` on the calling thread's scratch slot for `node`.
///
/// The buffer covers `node_count` slots of the largest page size and grows
/// when a larger topology shows up. `node` must be below `node_count`.
pub(crate) fn with_scratch_slot<R>(node: NodeId, node_count: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
    debug_assert!(node.index() < node_count);
    SCRATCH.with(|scratch| {
        let mut buffer = scratch.borrow_mut();
        let needed = node_count * SCRATCH_SLOT_BYTES;
        if buffer.len() < needed {
            buffer.resize(needed, 0);
        }
        let start = node.index() * SCRATCH_SLOT_BYTES;
        f(&mut buffer[start..start + SCRATCH_SLOT_BYTES])
    })
}

/// Current size of the calling thread's scratch buffer in bytes.
#[cfg(test)]
pub(crate) fn scratch_capacity() -> usize {
    SCRATCH.with(|scratch| scratch.borrow().len())
}
