use std::fmt;
use std::str::FromStr;

/// Number of supported page size classes.
pub const PAGE_SIZE_TYPES_COUNT: usize = 8;

/// Byte size of the smallest class (`KiB4`).
const MIN_PAGE_BYTES: usize = 4096;

/// Supported page sizes, ordered from smallest to largest. Each class is
/// twice the size of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PageSizeType {
    KiB4 = 0,
    KiB8,
    KiB16,
    KiB32,
    KiB64,
    KiB128,
    KiB256,
    KiB512,
}

pub const MIN_PAGE_SIZE_TYPE: PageSizeType = PageSizeType::KiB4;
pub const MAX_PAGE_SIZE_TYPE: PageSizeType = PageSizeType::KiB512;

/// Byte size of a page of class `size_type`.
#[inline]
pub const fn bytes_for_size_type(size_type: PageSizeType) -> usize {
    MIN_PAGE_BYTES << size_type as usize
}

impl PageSizeType {
    pub const ALL: [PageSizeType; PAGE_SIZE_TYPES_COUNT] = [
        PageSizeType::KiB4,
        PageSizeType::KiB8,
        PageSizeType::KiB16,
        PageSizeType::KiB32,
        PageSizeType::KiB64,
        PageSizeType::KiB128,
        PageSizeType::KiB256,
        PageSizeType::KiB512,
    ];

    /// Ordinal of the class, `0` for the smallest.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn bytes(self) -> usize {
        bytes_for_size_type(self)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Smallest class whose pages hold `bytes`.
    pub fn for_bytes(bytes: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.bytes() >= bytes)
    }
}

impl fmt::Display for PageSizeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KiB{}", self.bytes() >> 10)
    }
}

impl FromStr for PageSizeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown page size type '{}' (expected KiB4..KiB512)", s))
    }
}

/// Identifies the `index`-th slot of class `size_type` inside the region
/// that manages that class. Carries no address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    size_type: PageSizeType,
    index: u64,
}

impl PageId {
    #[inline]
    pub const fn new(size_type: PageSizeType, index: u64) -> Self {
        Self { size_type, index }
    }

    #[inline]
    pub const fn size_type(&self) -> PageSizeType {
        self.size_type
    }

    #[inline]
    pub const fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    pub const fn byte_count(&self) -> usize {
        bytes_for_size_type(self.size_type)
    }

    /// Number of OS pages backing one slot of this page's class.
    pub fn os_page_count(&self, os_page_size: usize) -> usize {
        self.byte_count() / os_page_size
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.size_type, self.index)
    }
}

/// A NUMA memory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
