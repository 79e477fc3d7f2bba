/// Default size of the virtual memory reservation for all page size types.
pub const DEFAULT_RESERVED_VIRTUAL_MEMORY: usize = 1 << 38; // 256 GiB

/// Startup configuration of the volatile regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Bytes of virtual memory reserved for all regions together.
    pub reserved_bytes: usize,
    /// Keep inactive slots `PROT_NONE` so stray accesses fault. Debugging only.
    pub protect_pages: bool,
    /// Allow NUMA placement. Migrations are no-ops when false.
    pub numa_enabled: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            reserved_bytes: DEFAULT_RESERVED_VIRTUAL_MEMORY,
            protect_pages: false,
            numa_enabled: cfg!(feature = "numa"),
        }
    }
}

impl BufferConfig {
    pub fn with_reserved_bytes(mut self, reserved_bytes: usize) -> Self {
        self.reserved_bytes = reserved_bytes;
        self
    }

    pub fn with_protect_pages(mut self, protect_pages: bool) -> Self {
        self.protect_pages = protect_pages;
        self
    }

    pub fn with_numa(mut self, numa_enabled: bool) -> Self {
        self.numa_enabled = numa_enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BufferConfig::default();
        assert_eq!(config.reserved_bytes, 256 << 30);
        assert!(!config.protect_pages);
        assert_eq!(config.numa_enabled, cfg!(feature = "numa"));
    }

    #[test]
    fn test_builder_overrides() {
        let config = BufferConfig::default()
            .with_reserved_bytes(64 << 20)
            .with_protect_pages(true)
            .with_numa(false);
        assert_eq!(config.reserved_bytes, 64 << 20);
        assert!(config.protect_pages);
        assert!(!config.numa_enabled);
        assert_ne!(config, BufferConfig::default());
    }
}
