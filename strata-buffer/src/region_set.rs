use std::mem;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;
use log::{info, warn};
use strata_io::{os_page_size, Mapping};

use crate::config::BufferConfig;
use crate::error::{fatal, RegionError};
use crate::page::{bytes_for_size_type, PageId, PageSizeType, MIN_PAGE_SIZE_TYPE};
use crate::region::{Region, RegionOptions};

/// Reserves the virtual memory for all regions.
///
/// # Panics
/// If the smallest page size is below the OS page size (slots must always
/// be whole OS pages) or the kernel refuses the mapping.
pub fn reserve_mapping(config: &BufferConfig) -> Mapping {
    let min = bytes_for_size_type(MIN_PAGE_SIZE_TYPE);
    let os = os_page_size();
    if min < os {
        fatal(RegionError::PageSizeBelowOsPage { min, os });
    }
    Mapping::reserve(config.reserved_bytes).unwrap_or_else(|err| fatal(err))
}

/// Creates one region per page size class over `mapping`.
pub fn partition(mapping: Mapping, options: &RegionOptions) -> Result<RegionSet, RegionError> {
    partition_with(mapping, &PageSizeType::ALL, options)
}

/// Creates one region per class in `size_types`, in the given order.
///
/// # Logic
/// Every region receives the same number of bytes: the mapping size divided
/// by the number of classes, rounded down to a multiple of the largest
/// class. Regions are laid out back to back from the mapping base. A tail
/// left over by the rounding stays unused.
pub fn partition_with(
    mapping: Mapping,
    size_types: &[PageSizeType],
    options: &RegionOptions,
) -> Result<RegionSet, RegionError> {
    let largest = size_types.iter().copied().max().ok_or(RegionError::NoSizeTypes)?;
    for (i, size_type) in size_types.iter().enumerate() {
        if size_types[..i].contains(size_type) {
            return Err(RegionError::DuplicateSizeType(*size_type));
        }
    }

    let per_region = mapping.len() / size_types.len() / largest.bytes() * largest.bytes();
    let mapping = Arc::new(mapping);

    let regions = size_types
        .iter()
        .enumerate()
        .map(|(i, &size_type)| {
            let range = per_region * i..per_region * (i + 1);
            Region::new(size_type, mapping.clone(), range, options).map(Arc::new)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let unused = mapping.len() - per_region * size_types.len();
    if unused > 0 {
        warn!("{} bytes at the end of the mapping are not assigned to any region", unused);
    }
    info!(
        "Partitioned {} KiB into {} regions of {} KiB each",
        mapping.len() >> 10,
        regions.len(),
        per_region >> 10
    );

    Ok(RegionSet { mapping, regions })
}

/// Unmaps the reservation behind `set`. See [`RegionSet::release`].
pub fn release_mapping(set: RegionSet) -> Result<(), RegionError> {
    set.release()
}

/// The regions carved out of one mapping, one per page size class.
///
/// `PageId`s are resolved through the set: the id's class selects the
/// region, its index the slot.
pub struct RegionSet {
    mapping: Arc<Mapping>,
    regions: Vec<Arc<Region>>,
}

impl RegionSet {
    /// Reserves `config.reserved_bytes` and partitions them over all classes.
    pub fn bootstrap(config: &BufferConfig) -> Result<Self, RegionError> {
        let options = RegionOptions::from_config(config);
        partition(reserve_mapping(config), &options)
    }

    pub fn region(&self, size_type: PageSizeType) -> Option<&Arc<Region>> {
        self.regions.iter().find(|region| region.size_type() == size_type)
    }

    pub fn regions(&self) -> &[Arc<Region>] {
        &self.regions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Region>> {
        self.regions.iter()
    }

    /// The region responsible for `page_id`.
    pub fn region_for(&self, page_id: PageId) -> Result<&Arc<Region>, RegionError> {
        self.region(page_id.size_type()).ok_or(RegionError::UnknownSizeType(page_id.size_type()))
    }

    pub fn page_ptr(&self, page_id: PageId) -> Result<NonNull<u8>, RegionError> {
        self.region_for(page_id)?.page_ptr(page_id)
    }

    /// Absolute address range of the whole mapping.
    pub fn address_range(&self) -> Range<usize> {
        self.mapping.address_range()
    }

    pub fn reclamation_count(&self) -> u64 {
        self.regions.iter().map(|region| region.reclamation_count()).sum()
    }

    pub fn migration_count(&self) -> u64 {
        self.regions.iter().map(|region| region.migration_count()).sum()
    }

    pub fn memory_footprint(&self) -> usize {
        mem::size_of::<Self>()
            + mem::size_of::<Arc<Region>>() * self.regions.capacity()
            + self.regions.iter().map(|region| region.memory_footprint()).sum::<usize>()
    }

    /// Drops the regions and unmaps the reservation.
    ///
    /// # Errors
    /// `MappingInUse` if a region of this set is still shared elsewhere.
    /// The mapping is then unmapped when its last region is dropped.
    ///
    /// # Panics
    /// If `munmap` fails.
    pub fn release(self) -> Result<(), RegionError> {
        let Self { mapping, regions } = self;
        drop(regions);
        match Arc::try_unwrap(mapping) {
            Ok(mapping) => {
                if let Err(err) = mapping.release() {
                    fatal(err);
                }
                Ok(())
            }
            Err(shared) => Err(RegionError::MappingInUse(Arc::strong_count(&shared) - 1)),
        }
    }
}

impl std::fmt::Debug for RegionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionSet")
            .field("mapping", &self.mapping)
            .field("regions", &self.regions)
            .finish()
    }
}
