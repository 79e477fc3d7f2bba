use std::fmt::Display;
use log::error;
use strata_io::MemoryError;
use thiserror::Error;

use crate::page::{NodeId, PageId, PageSizeType};

/// Precondition failures reported by the checked region API.
///
/// OS failures inside region operations are not represented here: they
/// terminate through [`fatal`].
#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Page {page} does not belong to this region ({expected})")]
    SizeTypeMismatch { page: PageId, expected: PageSizeType },
    #[error("Page index {index} is out of range for a region of {slots} slots")]
    IndexOutOfRange { index: u64, slots: usize },
    #[error("Invalid {size_type} region over bytes {start}..{end}: {reason}")]
    InvalidInterval { size_type: PageSizeType, start: usize, end: usize, reason: &'static str },
    #[error("NUMA node {node} is out of range ({count} nodes detected)")]
    NodeOutOfRange { node: NodeId, count: usize },
    #[error("Smallest page size does not fit into an OS page: {min} < {os}")]
    PageSizeBelowOsPage { min: usize, os: usize },
    #[error("Mapping is still referenced by {0} region(s)")]
    MappingInUse(usize),
    #[error("No page size classes given")]
    NoSizeTypes,
    #[error("Page size class {0} is listed twice")]
    DuplicateSizeType(PageSizeType),
    #[error("No region manages page size class {0}")]
    UnknownSizeType(PageSizeType),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Terminates on an unrecoverable OS failure (Fail Closed).
///
/// Address space exhaustion, kernel limits and missing permissions cannot be
/// retried from inside a region operation.
#[cold]
#[track_caller]
pub(crate) fn fatal(err: impl Display) -> ! {
    error!("{}", err);
    panic!("CRITICAL: {}", err);
}
