use std::fmt;
use std::mem;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use crossbeam_utils::CachePadded;
use log::debug;
use strata_io::{os_page_size, Access, Mapping};

use crate::config::BufferConfig;
use crate::error::{fatal, RegionError};
use crate::frame::Frame;
use crate::migration::{with_scratch_slot, MigrationStrategy};
use crate::numa::{detect_backend, NoNuma, NumaBackend};
use crate::page::{NodeId, PageId, PageSizeType};

/// Construction options shared by every region of a set.
#[derive(Debug, Clone)]
pub struct RegionOptions {
    /// Keep slots `PROT_NONE` unless explicitly unprotected (debug aid).
    pub protect_pages: bool,
    pub numa: Arc<dyn NumaBackend>,
}

impl RegionOptions {
    pub fn new(protect_pages: bool, numa: Arc<dyn NumaBackend>) -> Self {
        Self { protect_pages, numa }
    }

    /// Options for `config`, with the NUMA backend detected from the host.
    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.protect_pages, detect_backend(config.numa_enabled))
    }
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self::new(false, Arc::new(NoNuma))
    }
}

/// Manages the slots of one page size class inside a shared [`Mapping`].
///
/// # Purpose
/// Translates [`PageId`]s to addresses and manipulates the physical side of
/// the slots behind them: giving memory back to the OS, placing it on NUMA
/// nodes and, for debugging, revoking access. It never reads or interprets
/// page contents except to stage a copy-based migration.
///
/// # Thread Safety
/// All operations take `&self`. Operations on different pages never
/// interfere. Operations on the same page must be serialized by the caller.
pub struct Region {
    size_type: PageSizeType,
    mapping: Arc<Mapping>,
    // Byte offset of the first slot inside `mapping`.
    offset: usize,
    frames: Vec<Frame>,
    protect_pages: bool,
    numa: Arc<dyn NumaBackend>,
    os_page_size: usize,
    reclamations: CachePadded<AtomicU64>,
    migrations: CachePadded<AtomicU64>,
}

impl Region {
    /// Creates a region for `size_type` over the bytes `range` of `mapping`.
    ///
    /// With `protect_pages` the whole range is made inaccessible right away.
    ///
    /// # Errors
    /// `InvalidInterval` if the range is empty, leaves the mapping, is not
    /// OS-page aligned, or does not hold a whole number of slots (at least one).
    pub fn new(
        size_type: PageSizeType,
        mapping: Arc<Mapping>,
        range: Range<usize>,
        options: &RegionOptions,
    ) -> Result<Self, RegionError> {
        let invalid = |reason| RegionError::InvalidInterval {
            size_type,
            start: range.start,
            end: range.end,
            reason,
        };
        let page_bytes = size_type.bytes();
        let os_page_size = os_page_size();

        if range.start >= range.end {
            return Err(invalid("Region is too small"));
        }
        if range.end > mapping.len() {
            return Err(invalid("Region exceeds the mapping"));
        }
        if range.start % os_page_size != 0 {
            return Err(invalid("Region start is not aligned to an OS page"));
        }
        let len = range.end - range.start;
        if len < page_bytes {
            return Err(invalid("Not enough space for frames"));
        }
        if len % page_bytes != 0 {
            return Err(invalid("Region length is not a multiple of the page size"));
        }

        let slots = len / page_bytes;
        let frames: Vec<Frame> = (0..slots).map(|_| Frame::new(options.protect_pages)).collect();

        if options.protect_pages {
            if let Err(err) = mapping.protect(range.clone(), Access::None) {
                fatal(err);
            }
        }

        debug!(
            "Region {}: {} slots at mapping offset {:#x} (protect={}, numa={})",
            size_type,
            slots,
            range.start,
            options.protect_pages,
            options.numa.is_available()
        );

        Ok(Self {
            size_type,
            mapping,
            offset: range.start,
            frames,
            protect_pages: options.protect_pages,
            numa: options.numa.clone(),
            os_page_size,
            reclamations: CachePadded::new(AtomicU64::new(0)),
            migrations: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Number of slots this region manages.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn size_type(&self) -> PageSizeType {
        self.size_type
    }

    /// First byte of the region.
    pub fn start(&self) -> NonNull<u8> {
        self.slot_ptr(0)
    }

    /// Absolute address range `[start, end)` covered by the region.
    pub fn address_range(&self) -> Range<usize> {
        let start = self.start().as_ptr() as usize;
        start..start + self.slot_count() * self.size_type.bytes()
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        self.address_range().contains(&(ptr as usize))
    }

    /// Reverse translation: the page whose slot holds `ptr`.
    pub fn page_id_for(&self, ptr: *const u8) -> Option<PageId> {
        let range = self.address_range();
        let addr = ptr as usize;
        range
            .contains(&addr)
            .then(|| PageId::new(self.size_type, ((addr - range.start) / self.size_type.bytes()) as u64))
    }

    /// True if slots are kept inaccessible between uses.
    pub fn is_protecting(&self) -> bool {
        self.protect_pages
    }

    pub fn numa(&self) -> &Arc<dyn NumaBackend> {
        &self.numa
    }

    /// Start address of the slot of `page_id`.
    ///
    /// # Errors
    /// `SizeTypeMismatch` if the page belongs to another class,
    /// `IndexOutOfRange` if it lies past the last slot.
    pub fn page_ptr(&self, page_id: PageId) -> Result<NonNull<u8>, RegionError> {
        self.slot_index(page_id).map(|index| self.slot_ptr(index))
    }

    /// Unchecked variant of [`Region::page_ptr`] for hot loops.
    ///
    /// The class and bounds checks only run in debug builds.
    ///
    /// # Safety
    /// `page_id` must belong to this region's class and its index must be
    /// below [`Region::slot_count`]. Otherwise the offset can wrap the
    /// address space and produce a null pointer.
    #[inline]
    pub unsafe fn page_ptr_unchecked(&self, page_id: PageId) -> NonNull<u8> {
        debug_assert!(page_id.size_type() == self.size_type, "Page does not belong to this region.");
        debug_assert!((page_id.index() as usize) < self.slot_count(), "Page index out of range.");
        let offset = self.offset + page_id.index() as usize * self.size_type.bytes();
        // SAFETY: The caller keeps the slot inside the mapping, whose base is
        // non-null and which never wraps around the top of the address space.
        unsafe { NonNull::new_unchecked(self.mapping.as_ptr().as_ptr().wrapping_add(offset)) }
    }

    /// Metadata of the slot of `page_id`.
    pub fn frame(&self, page_id: PageId) -> Result<&Frame, RegionError> {
        self.slot_index(page_id).map(|index| &self.frames[index])
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Gives the physical memory of the slot back to the OS.
    ///
    /// The address stays valid; the next access faults in a fresh (zeroed
    /// on Linux) page. With protection enabled the slot is inaccessible
    /// when this returns.
    pub fn reclaim(&self, page_id: PageId) -> Result<(), RegionError> {
        let index = self.slot_index(page_id)?;
        self.reclaim_slot(index);
        Ok(())
    }

    /// Marks a reclaimed slot as in use again. Only macOS needs the hint;
    /// elsewhere the OS reclaims transparently.
    pub fn mark_reusable(&self, page_id: PageId) -> Result<(), RegionError> {
        let index = self.slot_index(page_id)?;
        if let Err(err) = self.mapping.advise_reuse(self.slot_range(index)) {
            fatal(err);
        }
        Ok(())
    }

    /// Revokes all access to the slot. No-op without debug protection.
    pub fn protect(&self, page_id: PageId) -> Result<(), RegionError> {
        let index = self.slot_index(page_id)?;
        self.set_access(index, Access::None);
        Ok(())
    }

    /// Makes the slot readable and writable. No-op without debug protection.
    pub fn unprotect(&self, page_id: PageId) -> Result<(), RegionError> {
        let index = self.slot_index(page_id)?;
        self.set_access(index, Access::ReadWrite);
        Ok(())
    }

    /// Moves the slot to `node` with the given strategy.
    pub fn migrate(&self, page_id: PageId, node: NodeId, strategy: MigrationStrategy) -> Result<(), RegionError> {
        match strategy {
            MigrationStrategy::BindPolicy => self.bind_to_node(page_id, node),
            MigrationStrategy::MoveResidentPages => self.migrate_resident_pages(page_id, node),
            MigrationStrategy::CopyViaScratch => self.migrate_via_copy(page_id, node),
        }
    }

    /// Binds the slot's memory to `node` (`mbind`, strict). Resident pages
    /// are migrated now, future faults land on `node`.
    ///
    /// # Panics
    /// If the kernel cannot complete the migration, e.g. `node` is full or
    /// `vm.max_map_count` is exhausted.
    pub fn bind_to_node(&self, page_id: PageId, node: NodeId) -> Result<(), RegionError> {
        let index = self.slot_index(page_id)?;
        if !self.placement_enabled(node)? {
            return Ok(());
        }
        self.bind_slot(index, node);
        self.commit_migration(index, node, MigrationStrategy::BindPolicy);
        Ok(())
    }

    /// Moves every resident OS page of the slot to `node` (`move_pages`).
    /// The memory policy of the slot is not changed.
    pub fn migrate_resident_pages(&self, page_id: PageId, node: NodeId) -> Result<(), RegionError> {
        let index = self.slot_index(page_id)?;
        if !self.placement_enabled(node)? {
            return Ok(());
        }
        let ptr = self.slot_ptr(index);
        // SAFETY: The slot is OS-page aligned and lies inside our mapping.
        let moved = unsafe { self.numa.move_resident(ptr, self.size_type.bytes(), self.os_page_size, node) };
        if let Err(err) = moved {
            fatal(err);
        }
        self.commit_migration(index, node, MigrationStrategy::MoveResidentPages);
        Ok(())
    }

    /// Moves the slot to `node` by copying it through the calling thread's
    /// scratch buffer: copy out, reclaim, bind, copy back.
    ///
    /// The slot's protection state at entry is restored at exit.
    pub fn migrate_via_copy(&self, page_id: PageId, node: NodeId) -> Result<(), RegionError> {
        let index = self.slot_index(page_id)?;
        if !self.placement_enabled(node)? {
            return Ok(());
        }
        let ptr = self.slot_ptr(index);
        let bytes = self.size_type.bytes();
        let was_protected = self.frames[index].is_protected();

        self.set_access(index, Access::ReadWrite);
        with_scratch_slot(node, self.numa.node_count(), |scratch| {
            debug_assert!(scratch.len() >= bytes);
            // SAFETY: The slot is accessible and `bytes` long; the scratch
            // slot holds the largest page size and does not overlap it.
            unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), scratch.as_mut_ptr(), bytes) };
            self.reclaim_slot(index);
            self.set_access(index, Access::ReadWrite);
            self.bind_slot(index, node);
            // SAFETY: As above, in the other direction.
            unsafe { ptr::copy_nonoverlapping(scratch.as_ptr(), ptr.as_ptr(), bytes) };
        });
        if was_protected {
            self.set_access(index, Access::None);
        }

        self.commit_migration(index, node, MigrationStrategy::CopyViaScratch);
        Ok(())
    }

    /// Number of successful reclamations.
    pub fn reclamation_count(&self) -> u64 {
        self.reclamations.load(Ordering::Relaxed)
    }

    /// Number of successful migrations, all strategies together.
    pub fn migration_count(&self) -> u64 {
        self.migrations.load(Ordering::Relaxed)
    }

    /// Approximate heap and inline bytes used by this object. The mapped
    /// memory is not included.
    pub fn memory_footprint(&self) -> usize {
        mem::size_of::<Self>() + mem::size_of::<Frame>() * self.frames.capacity()
    }

    fn slot_index(&self, page_id: PageId) -> Result<usize, RegionError> {
        if page_id.size_type() != self.size_type {
            return Err(RegionError::SizeTypeMismatch { page: page_id, expected: self.size_type });
        }
        let index = page_id.index();
        if index >= self.slot_count() as u64 {
            return Err(RegionError::IndexOutOfRange { index, slots: self.slot_count() });
        }
        Ok(index as usize)
    }

    /// Byte range of slot `index` relative to the mapping base.
    fn slot_range(&self, index: usize) -> Range<usize> {
        let start = self.offset + index * self.size_type.bytes();
        start..start + self.size_type.bytes()
    }

    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.slot_count());
        // SAFETY: `index` is a valid slot, so the offset stays inside the
        // mapping, whose base is non-null.
        unsafe { NonNull::new_unchecked(self.mapping.as_ptr().as_ptr().add(self.slot_range(index).start)) }
    }

    fn placement_enabled(&self, node: NodeId) -> Result<bool, RegionError> {
        if !self.numa.is_available() {
            return Ok(false);
        }
        let count = self.numa.node_count();
        if node.index() >= count {
            return Err(RegionError::NodeOutOfRange { node, count });
        }
        Ok(true)
    }

    fn reclaim_slot(&self, index: usize) {
        self.set_access(index, Access::ReadWrite);
        if let Err(err) = self.mapping.advise_free(self.slot_range(index)) {
            fatal(err);
        }
        self.set_access(index, Access::None);
        self.reclamations.fetch_add(1, Ordering::Relaxed);
    }

    fn bind_slot(&self, index: usize, node: NodeId) {
        // SAFETY: The slot is OS-page aligned and lies inside our mapping.
        let bound = unsafe { self.numa.bind(self.slot_ptr(index), self.size_type.bytes(), node) };
        if let Err(err) = bound {
            fatal(err);
        }
    }

    fn set_access(&self, index: usize, access: Access) {
        if !self.protect_pages {
            return;
        }
        if let Err(err) = self.mapping.protect(self.slot_range(index), access) {
            fatal(err);
        }
        self.frames[index].set_protected(access == Access::None);
    }

    // Bookkeeping shared by all migration strategies.
    fn commit_migration(&self, index: usize, node: NodeId, strategy: MigrationStrategy) {
        self.frames[index].set_node(node);
        let total = self.migrations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "{}#{} -> node {} via {} ({} migrations)",
            self.size_type, index, node, strategy, total
        );
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("size_type", &self.size_type)
            .field("start", &self.start())
            .field("slots", &self.slot_count())
            .field("protect_pages", &self.protect_pages)
            .field("reclamations", &self.reclamation_count())
            .field("migrations", &self.migration_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use strata_io::NumaTopology;
    use crate::migration::scratch_capacity;
    use crate::numa::simulated::SimulatedNuma;
    use crate::numa::KernelNuma;
    use crate::page::{bytes_for_size_type, MAX_PAGE_SIZE_TYPE};

    const TYPE: PageSizeType = PageSizeType::KiB64;

    fn region(slots: usize, options: &RegionOptions) -> Region {
        let len = slots * TYPE.bytes();
        let mapping = Arc::new(Mapping::reserve(len).unwrap());
        Region::new(TYPE, mapping, 0..len, options).unwrap()
    }

    fn simulated(nodes: usize, protect_pages: bool) -> (Arc<SimulatedNuma>, RegionOptions) {
        let numa = SimulatedNuma::new(nodes);
        let options = RegionOptions::new(protect_pages, numa.clone());
        (numa, options)
    }

    fn fill(region: &Region, page: PageId, seed: u8) {
        let ptr = region.page_ptr(page).unwrap();
        // SAFETY: The slot is accessible and `byte_count` long.
        let slot = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), page.byte_count()) };
        for (i, byte) in slot.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
    }

    fn holds(region: &Region, page: PageId, seed: u8) -> bool {
        let ptr = region.page_ptr(page).unwrap();
        // SAFETY: The slot is accessible and `byte_count` long.
        let slot = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), page.byte_count()) };
        slot.iter().enumerate().all(|(i, &byte)| byte == seed.wrapping_add(i as u8))
    }

    /// Permission string ("rw-p", "---p", ...) of the mapping holding `addr`.
    #[cfg(target_os = "linux")]
    fn permissions_at(addr: usize) -> String {
        let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
        for line in maps.lines() {
            let mut fields = line.split_whitespace();
            let (Some(span), Some(perms)) = (fields.next(), fields.next()) else { continue };
            let Some((lo, hi)) = span.split_once('-') else { continue };
            let lo = usize::from_str_radix(lo, 16).unwrap();
            let hi = usize::from_str_radix(hi, 16).unwrap();
            if lo <= addr && addr < hi {
                return perms.to_string();
            }
        }
        panic!("address {:#x} is not mapped", addr);
    }

    #[test]
    fn test_address_determinism() {
        let region = region(16, &RegionOptions::default());
        let start = region.start().as_ptr() as usize;
        assert_eq!(region.slot_count(), 16);
        assert_eq!(region.address_range(), start..start + 16 * TYPE.bytes());

        for index in 0..16u64 {
            let page = PageId::new(TYPE, index);
            let expected = start + index as usize * bytes_for_size_type(TYPE);
            assert_eq!(region.page_ptr(page).unwrap().as_ptr() as usize, expected);
            // SAFETY: `page` is of this class and below `slot_count`.
            assert_eq!(region.page_ptr(page).unwrap(), unsafe { region.page_ptr_unchecked(page) });
            assert_eq!(region.page_id_for(expected as *const u8), Some(page));
            assert_eq!(region.page_id_for((expected + TYPE.bytes() - 1) as *const u8), Some(page));
        }
        assert_eq!(region.page_id_for((start + 16 * TYPE.bytes()) as *const u8), None);

        assert!(region.contains(start as *const u8));
        assert!(region.contains((start + 16 * TYPE.bytes() - 1) as *const u8));
        assert!(!region.contains((start + 16 * TYPE.bytes()) as *const u8));
        assert!(!region.contains((start - 1) as *const u8));
    }

    #[test]
    fn test_checked_accessors_reject_foreign_pages() {
        let region = region(4, &RegionOptions::default());

        let foreign = PageId::new(PageSizeType::KiB8, 0);
        assert!(matches!(region.page_ptr(foreign), Err(RegionError::SizeTypeMismatch { .. })));
        assert!(matches!(region.frame(foreign), Err(RegionError::SizeTypeMismatch { .. })));
        assert!(matches!(region.reclaim(foreign), Err(RegionError::SizeTypeMismatch { .. })));

        let past_end = PageId::new(TYPE, 4);
        assert!(matches!(
            region.page_ptr(past_end),
            Err(RegionError::IndexOutOfRange { index: 4, slots: 4 })
        ));
        assert!(matches!(region.bind_to_node(past_end, NodeId(0)), Err(RegionError::IndexOutOfRange { .. })));
        assert_eq!(region.reclamation_count(), 0);
    }

    #[test]
    fn test_construction_rejects_bad_intervals() {
        let len = 4 * TYPE.bytes();
        let mapping = Arc::new(Mapping::reserve(len).unwrap());
        let options = RegionOptions::default();
        let page = os_page_size();

        let cases = [0..0, 0..len + TYPE.bytes(), 0..TYPE.bytes() - page, 0..TYPE.bytes() + page];
        for range in cases {
            assert!(
                matches!(
                    Region::new(TYPE, mapping.clone(), range.clone(), &options),
                    Err(RegionError::InvalidInterval { .. })
                ),
                "{:?} accepted",
                range
            );
        }
        let region = Region::new(TYPE, mapping, TYPE.bytes()..len, &options).unwrap();
        assert_eq!(region.slot_count(), 3);
    }

    #[test]
    fn test_reclaim_then_reuse() {
        let region = region(4, &RegionOptions::default());
        let page = PageId::new(TYPE, 2);
        fill(&region, page, 0xAB);
        assert!(holds(&region, page, 0xAB));

        region.reclaim(page).unwrap();
        region.mark_reusable(page).unwrap();
        assert_eq!(region.reclamation_count(), 1);

        let ptr = region.page_ptr(page).unwrap().as_ptr();
        if cfg!(target_os = "linux") {
            // SAFETY: Slot is mapped read/write; MADV_DONTNEED zero-filled it.
            assert_eq!(unsafe { ptr.read() }, 0);
        }
        fill(&region, page, 0x5A);
        assert!(holds(&region, page, 0x5A));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_protection_invariant() {
        let (_numa, options) = simulated(2, true);
        let region = region(4, &options);
        assert!(region.is_protecting());
        assert!(region.frames().iter().all(Frame::is_protected));
        for index in 0..4 {
            let addr = region.page_ptr(PageId::new(TYPE, index)).unwrap().as_ptr() as usize;
            assert!(permissions_at(addr).starts_with("---"));
        }

        let page = PageId::new(TYPE, 1);
        let addr = region.page_ptr(page).unwrap().as_ptr() as usize;
        region.unprotect(page).unwrap();
        assert!(permissions_at(addr).starts_with("rw-"));
        assert!(!region.frame(page).unwrap().is_protected());
        fill(&region, page, 1);

        region.reclaim(page).unwrap();
        assert!(permissions_at(addr).starts_with("---"));
        assert!(region.frame(page).unwrap().is_protected());
        assert_eq!(region.reclamation_count(), 1);
    }

    #[test]
    fn test_protection_is_noop_when_disabled() {
        let region = region(2, &RegionOptions::default());
        let page = PageId::new(TYPE, 0);
        region.protect(page).unwrap();
        assert!(!region.frame(page).unwrap().is_protected());
        fill(&region, page, 3);
        assert!(holds(&region, page, 3));
    }

    #[test]
    fn test_migration_idempotent_on_target() {
        let (_numa, options) = simulated(4, false);
        let region = region(4, &options);
        let page = PageId::new(TYPE, 3);

        let mut expected = 0;
        for strategy in MigrationStrategy::ALL {
            for _ in 0..2 {
                region.migrate(page, NodeId(2), strategy).unwrap();
                expected += 1;
                assert_eq!(region.frame(page).unwrap().node(), Some(NodeId(2)));
                assert_eq!(region.migration_count(), expected);
            }
        }
    }

    #[test]
    fn test_migrations_are_noops_without_numa() {
        let region = region(2, &RegionOptions::default());
        let page = PageId::new(TYPE, 0);
        fill(&region, page, 9);

        for strategy in MigrationStrategy::ALL {
            region.migrate(page, NodeId(5), strategy).unwrap();
        }
        assert_eq!(region.frame(page).unwrap().node(), None);
        assert_eq!(region.migration_count(), 0);
        assert_eq!(region.reclamation_count(), 0);
        assert!(holds(&region, page, 9));
    }

    #[test]
    fn test_target_node_must_exist() {
        let (numa, options) = simulated(2, false);
        let region = region(2, &options);
        let page = PageId::new(TYPE, 0);

        for strategy in MigrationStrategy::ALL {
            assert!(matches!(
                region.migrate(page, NodeId(2), strategy),
                Err(RegionError::NodeOutOfRange { count: 2, .. })
            ));
        }
        assert_eq!(region.migration_count(), 0);
        assert_eq!(numa.binds.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_resident_migration_covers_every_os_page() {
        let (numa, options) = simulated(2, false);
        let region = region(2, &options);
        region.migrate_resident_pages(PageId::new(TYPE, 1), NodeId(1)).unwrap();
        assert_eq!(numa.moved_os_pages.load(Ordering::Relaxed), TYPE.bytes() / os_page_size());
        assert_eq!(numa.binds.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_copy_migration_beyond_four_nodes() {
        std::thread::spawn(|| {
            let (numa, options) = simulated(8, false);
            let region = region(4, &options);
            let page = PageId::new(TYPE, 1);
            fill(&region, page, 0x11);

            region.migrate_via_copy(page, NodeId(7)).unwrap();

            assert!(holds(&region, page, 0x11));
            assert_eq!(region.frame(page).unwrap().node(), Some(NodeId(7)));
            assert_eq!(region.migration_count(), 1);
            assert_eq!(region.reclamation_count(), 1);
            assert_eq!(numa.binds.load(Ordering::Relaxed), 1);
            assert_eq!(scratch_capacity(), 8 * bytes_for_size_type(MAX_PAGE_SIZE_TYPE));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_copy_migration_restores_protection_state() {
        let (_numa, options) = simulated(2, true);
        let region = region(2, &options);
        let page = PageId::new(TYPE, 0);

        region.unprotect(page).unwrap();
        fill(&region, page, 0x42);
        region.migrate_via_copy(page, NodeId(1)).unwrap();
        assert!(!region.frame(page).unwrap().is_protected());
        assert!(holds(&region, page, 0x42));

        region.protect(page).unwrap();
        region.migrate_via_copy(page, NodeId(0)).unwrap();
        assert!(region.frame(page).unwrap().is_protected());
        assert_eq!(region.frame(page).unwrap().node(), Some(NodeId(0)));

        region.unprotect(page).unwrap();
        assert!(holds(&region, page, 0x42));
    }

    #[test]
    fn test_concurrent_migrations_counted_exactly() {
        const THREADS: usize = 16;
        let (numa, options) = simulated(8, false);
        let region = region(THREADS, &options);

        let mut order: Vec<usize> = (0..THREADS).collect();
        order.shuffle(&mut rand::thread_rng());

        std::thread::scope(|scope| {
            for t in order {
                let region = &region;
                scope.spawn(move || {
                    let page = PageId::new(TYPE, t as u64);
                    let strategy = MigrationStrategy::ALL[t % MigrationStrategy::ALL.len()];
                    fill(region, page, t as u8);
                    region.migrate(page, NodeId((t % 8) as u32), strategy).unwrap();
                });
            }
        });

        assert_eq!(region.migration_count(), THREADS as u64);
        for t in 0..THREADS {
            let page = PageId::new(TYPE, t as u64);
            assert_eq!(region.frame(page).unwrap().node(), Some(NodeId((t % 8) as u32)));
            assert!(holds(&region, page, t as u8));
        }
        let copies = (0..THREADS).filter(|t| t % 3 == 2).count();
        assert_eq!(region.reclamation_count(), copies as u64);
        assert_eq!(numa.binds.load(Ordering::Relaxed), (0..THREADS).filter(|t| t % 3 != 1).count());
    }

    #[test]
    fn test_kernel_migrations_keep_contents() {
        let Some(kernel) = KernelNuma::new(NumaTopology::get()) else {
            return;
        };
        let options = RegionOptions::new(false, Arc::new(kernel));
        let region = region(2, &options);
        let page = PageId::new(TYPE, 1);
        fill(&region, page, 0x3C);

        for strategy in MigrationStrategy::ALL {
            region.migrate(page, NodeId(0), strategy).unwrap();
            assert!(holds(&region, page, 0x3C), "{} lost the slot contents", strategy);
            assert_eq!(region.frame(page).unwrap().node(), Some(NodeId(0)));
        }
        assert_eq!(region.migration_count(), 3);
        assert_eq!(region.reclamation_count(), 1);
    }

    #[test]
    fn test_memory_footprint_counts_frames() {
        let small = region(2, &RegionOptions::default());
        let large = region(64, &RegionOptions::default());
        assert!(small.memory_footprint() >= mem::size_of::<Region>() + 2 * mem::size_of::<Frame>());
        assert_eq!(
            large.memory_footprint() - small.memory_footprint(),
            62 * mem::size_of::<Frame>()
        );
    }
}
