use std::sync::OnceLock;
use log::{info, warn};

use super::{numa, os_page_size};

/// Kernel list of NUMA nodes that can ever come online.
#[cfg(all(not(feature = "hwloc"), target_os = "linux"))]
const SYSFS_POSSIBLE_NODES: &str = "/sys/devices/system/node/possible";

/// NUMA topology of the host, discovered once at startup.
///
/// `node_count` is one past the highest node id, so every valid node id can
/// be used directly as an index into per-node tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaTopology {
    node_count: usize,
    os_page_size: usize,
    available: bool,
}

impl NumaTopology {
    /// Returns the process-wide topology, detecting it on first use.
    /// Read-only afterwards.
    pub fn get() -> &'static NumaTopology {
        static TOPOLOGY: OnceLock<NumaTopology> = OnceLock::new();
        TOPOLOGY.get_or_init(Self::detect)
    }

    /// Interrogates the host for its NUMA layout.
    pub fn detect() -> Self {
        let available = numa::is_available();
        let node_count = match detect_node_count() {
            Some(count) => count,
            None => {
                warn!("Failed to detect NUMA nodes. Fallback to 1.");
                1
            }
        };

        info!(
            "Topology Discovery: {} NUMA node(s), {} byte OS pages, kernel NUMA policy {}.",
            node_count,
            os_page_size(),
            if available { "available" } else { "unavailable" }
        );

        Self { node_count, os_page_size: os_page_size(), available }
    }

    /// A topology with `node_count` nodes, for hosts that cannot be probed.
    pub fn with_nodes(node_count: usize, available: bool) -> Self {
        Self { node_count: node_count.max(1), os_page_size: os_page_size(), available }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn os_page_size(&self) -> usize {
        self.os_page_size
    }

    /// True if the kernel accepts `mbind`/`move_pages`.
    pub fn is_available(&self) -> bool {
        self.available
    }
}

#[cfg(feature = "hwloc")]
fn detect_node_count() -> Option<usize> {
    use hwloc2::{ObjectType, Topology};

    let topology = Topology::new()?;
    let nodes = topology.objects_with_type(&ObjectType::NUMANode).ok()?;
    nodes.iter().map(|node| node.os_index() as usize + 1).max()
}

#[cfg(all(not(feature = "hwloc"), target_os = "linux"))]
fn detect_node_count() -> Option<usize> {
    let list = std::fs::read_to_string(SYSFS_POSSIBLE_NODES).ok()?;
    parse_node_list(&list)
}

#[cfg(all(not(feature = "hwloc"), not(target_os = "linux")))]
fn detect_node_count() -> Option<usize> {
    Some(1)
}

/// Parses a kernel cpu/node list such as `0-3,6` and returns one past the
/// highest id it names.
pub fn parse_node_list(list: &str) -> Option<usize> {
    let mut highest: Option<usize> = None;
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        let last = match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().ok()?;
                let hi: usize = hi.trim().parse().ok()?;
                if hi < lo {
                    return None;
                }
                hi
            }
            None => part.trim().parse().ok()?,
        };
        highest = Some(highest.map_or(last, |h| h.max(last)));
    }
    highest.map(|h| h + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_list() {
        assert_eq!(parse_node_list("0\n"), Some(1));
        assert_eq!(parse_node_list("0-3"), Some(4));
        assert_eq!(parse_node_list("0-1,4,6-7\n"), Some(8));
        assert_eq!(parse_node_list(""), None);
        assert_eq!(parse_node_list("3-1"), None);
        assert_eq!(parse_node_list("x"), None);
    }

    #[test]
    fn test_detected_topology_is_sane() {
        let topology = NumaTopology::get();
        assert!(topology.node_count() >= 1);
        assert_eq!(topology.os_page_size(), os_page_size());
        assert!(std::ptr::eq(topology, NumaTopology::get()));
    }

    #[test]
    fn test_with_nodes_never_empty() {
        assert_eq!(NumaTopology::with_nodes(0, false).node_count(), 1);
        assert_eq!(NumaTopology::with_nodes(8, true).node_count(), 8);
    }
}
