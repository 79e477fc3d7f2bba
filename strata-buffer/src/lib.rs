//! Strata Buffer: volatile page regions of the buffer pool.
//!
//! One large anonymous mapping is reserved at startup and cut into one
//! [`Region`] per [`PageSizeType`]. A region translates [`PageId`]s into
//! addresses and manages the memory behind them: reclaiming it, placing it
//! on NUMA nodes and, in debug setups, protecting it. Which page to touch
//! and when is decided by the buffer-pool policy above this crate.

pub mod config;
pub mod error;
pub mod frame;
pub mod migration;
pub mod numa;
pub mod page;
pub mod region;
pub mod region_set;

pub use config::BufferConfig;
pub use error::RegionError;
pub use frame::Frame;
pub use migration::MigrationStrategy;
pub use numa::{KernelNuma, NoNuma, NumaBackend};
pub use page::{
    bytes_for_size_type, NodeId, PageId, PageSizeType, MAX_PAGE_SIZE_TYPE, MIN_PAGE_SIZE_TYPE,
    PAGE_SIZE_TYPES_COUNT,
};
pub use region::{Region, RegionOptions};
pub use region_set::{partition, partition_with, release_mapping, reserve_mapping, RegionSet};
