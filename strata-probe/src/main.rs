use std::ptr;
use std::thread;
use std::time::Instant;
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use rand::seq::SliceRandom;
use strata_buffer::{BufferConfig, MigrationStrategy, NodeId, PageId, PageSizeType, Region, RegionSet};
use strata_io::NumaTopology;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bootstraps the volatile regions and drives every page operation once")]
struct Args {
    /// Virtual memory reserved for all regions, in MiB.
    #[arg(short, long, env = "STRATA_RESERVED_MIB", default_value_t = 1024)]
    reserved_mib: usize,

    #[arg(short = 't', long, default_value = "KiB256")]
    size_type: PageSizeType,

    #[arg(short, long, default_value_t = 256)]
    pages: usize,

    #[arg(short = 'j', long, default_value_t = 4)]
    threads: usize,

    /// mbind, move_pages or memcpy. All three when omitted.
    #[arg(short, long)]
    strategy: Option<MigrationStrategy>,

    /// Defaults to the highest detected node.
    #[arg(long)]
    target_node: Option<u32>,

    /// Keep slots PROT_NONE between uses.
    #[arg(long, env = "STRATA_PROTECT_PAGES")]
    protect: bool,

    #[arg(long, env = "STRATA_NO_NUMA")]
    no_numa: bool,
}

impl Args {
    fn buffer_config(&self) -> BufferConfig {
        let config = BufferConfig::default()
            .with_reserved_bytes(self.reserved_mib << 20)
            .with_protect_pages(self.protect);
        if self.no_numa {
            config.with_numa(false)
        } else {
            config
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting Strata probe...");

    // 1. Interrogate Hardware
    let topology = NumaTopology::get();

    // 2. Configuration
    let config = args.buffer_config();
    info!("Configuration: {:?}", config);

    // 3. Reserve and partition
    let set = RegionSet::bootstrap(&config)?;
    let region = set
        .region(args.size_type)
        .with_context(|| format!("No region for {}", args.size_type))?;
    if args.pages == 0 || args.pages > region.slot_count() {
        bail!("--pages must be within 1..={} for {}", region.slot_count(), args.size_type);
    }
    if !region.numa().is_available() {
        warn!("NUMA placement unavailable: migrations below are no-ops.");
    }

    let target = NodeId(args.target_node.unwrap_or(topology.node_count() as u32 - 1));
    let strategies = match args.strategy {
        Some(strategy) => vec![strategy],
        None => MigrationStrategy::ALL.to_vec(),
    };

    // 4. Touch every page and place it on node 0
    let mut pages: Vec<PageId> = (0..args.pages as u64).map(|i| PageId::new(args.size_type, i)).collect();
    for &page in &pages {
        region.unprotect(page)?;
        let ptr = region.page_ptr(page)?;
        // SAFETY: Slot is accessible and `byte_count` long.
        unsafe { ptr::write_bytes(ptr.as_ptr(), page.index() as u8, page.byte_count()) };
        region.bind_to_node(page, NodeId(0))?;
    }

    // 5. Move everything to the target node with each strategy
    for strategy in strategies {
        pages.shuffle(&mut rand::thread_rng());
        let elapsed = migrate_all(region, &pages, target, strategy, args.threads.max(1))?;
        verify(region, &pages)?;
        info!(
            "{:>10}: {} pages -> node {} in {:?} ({} ns/page)",
            strategy,
            pages.len(),
            target,
            elapsed,
            elapsed.as_nanos() / pages.len() as u128
        );
        for &page in &pages {
            region.bind_to_node(page, NodeId(0))?;
        }
    }

    // 6. Give the memory back
    for &page in &pages {
        region.reclaim(page)?;
        region.mark_reusable(page)?;
    }

    info!(
        "Done: {} migrations, {} reclamations, {} bytes of region metadata.",
        set.migration_count(),
        set.reclamation_count(),
        set.memory_footprint()
    );
    set.release()?;
    Ok(())
}

fn migrate_all(
    region: &Region,
    pages: &[PageId],
    target: NodeId,
    strategy: MigrationStrategy,
    threads: usize,
) -> Result<std::time::Duration> {
    let chunk = pages.len().div_ceil(threads);
    let start = Instant::now();
    thread::scope(|scope| {
        let workers: Vec<_> = pages
            .chunks(chunk)
            .map(|chunk| {
                scope.spawn(move || chunk.iter().try_for_each(|&page| region.migrate(page, target, strategy)))
            })
            .collect();
        workers
            .into_iter()
            .try_for_each(|worker| worker.join().expect("migration worker panicked"))
    })?;
    Ok(start.elapsed())
}

fn verify(region: &Region, pages: &[PageId]) -> Result<()> {
    for &page in pages {
        let ptr = region.page_ptr(page)?;
        // SAFETY: Pages were unprotected in step 4 and migrations restore that state.
        let slot = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), page.byte_count()) };
        if slot.iter().any(|&byte| byte != page.index() as u8) {
            bail!("Page {} lost its contents during migration", page);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_buffer_config_from_args() {
        let args = Args::try_parse_from(["strata-probe", "-r", "64", "--protect", "--no-numa", "-s", "memcpy"]).unwrap();
        let config = args.buffer_config();
        assert_eq!(config.reserved_bytes, 64 << 20);
        assert!(config.protect_pages);
        assert!(!config.numa_enabled);
        assert_eq!(args.strategy, Some(MigrationStrategy::CopyViaScratch));

        let args = Args::try_parse_from(["strata-probe", "--reserved-mib", "8"]).unwrap();
        assert_eq!(args.buffer_config().numa_enabled, BufferConfig::default().numa_enabled);
        assert!(Args::try_parse_from(["strata-probe", "--size-type", "KiB3"]).is_err());
    }
}
