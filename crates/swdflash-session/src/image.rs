//! Image programming
//!
//! Drivers only erase whole blocks and program whole write units. This
//! module turns an arbitrary `(addr, data)` image into that shape: it reads
//! the blocks the image touches, merges the image in, erases only the
//! blocks whose content changes and programs every write unit of those
//! blocks that is not blank afterwards.

use swdflash_core::driver::NvmDriver;
use swdflash_core::region::NvmRegion;
use swdflash_core::target::Target;

use crate::error::{Result, SessionError};

/// Chunk size for reading back the affected blocks
const READ_CHUNK_SIZE: usize = 4096;

/// Progress callbacks for an image write
///
/// Every method has an empty default so reporters only implement the
/// phases they display.
pub trait WriteProgress {
    /// Existing content is being read
    fn reading(&mut self, _total_bytes: usize) {}
    /// Bytes read so far
    fn read_progress(&mut self, _bytes_read: usize) {}
    /// Blocks are about to be erased
    fn erasing(&mut self, _blocks: usize, _bytes: usize) {}
    /// Blocks erased so far
    fn erase_progress(&mut self, _blocks_erased: usize) {}
    /// Write units are about to be programmed
    fn writing(&mut self, _bytes: usize) {}
    /// Bytes programmed so far
    fn write_progress(&mut self, _bytes_written: usize) {}
    /// The write finished
    fn complete(&mut self, _stats: &WriteStats) {}
}

/// Progress reporter that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl WriteProgress for NoProgress {}

/// Outcome of an image write
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    /// Whether anything was erased or programmed
    pub flash_modified: bool,
    /// Bytes that differed from the existing content
    pub bytes_changed: usize,
    /// Number of erase blocks erased
    pub erases_performed: usize,
    /// Bytes erased
    pub bytes_erased: usize,
    /// Bytes programmed
    pub bytes_written: usize,
}

/// Region index and descriptor covering `[addr, addr + len)`
pub fn locate(regions: &[NvmRegion], addr: u32, len: u32) -> Result<(usize, NvmRegion)> {
    regions
        .iter()
        .enumerate()
        .find(|(_, r)| r.contains_range(addr, len.max(1)))
        .map(|(index, region)| (index, *region))
        .ok_or(SessionError::OutOfRange { addr, len })
}

/// `[start, end)` widened to erase block boundaries
pub fn block_span(region: &NvmRegion, addr: u32, len: u32) -> (u32, u32) {
    let start = region.block_start(addr);
    let end = region.block_start(addr + len.max(1) - 1) + region.block_size;
    (start, end)
}

/// Runs of consecutive block numbers as `(first, count)`
fn runs(blocks: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &block in blocks {
        match runs.last_mut() {
            Some((first, count)) if *first + *count == block => *count += 1,
            _ => runs.push((block, 1)),
        }
    }
    runs
}

/// Program `data` at `addr`
///
/// The image must fall inside one region.
pub fn program(
    target: &mut dyn Target,
    driver: &mut dyn NvmDriver,
    addr: u32,
    data: &[u8],
    progress: &mut dyn WriteProgress,
) -> Result<WriteStats> {
    let len = u32::try_from(data.len()).map_err(|_| SessionError::OutOfRange {
        addr,
        len: u32::MAX,
    })?;
    let (index, region) = locate(driver.regions(), addr, len)?;
    let mut stats = WriteStats::default();
    if data.is_empty() {
        progress.complete(&stats);
        return Ok(stats);
    }

    let (start, end) = block_span(&region, addr, len);
    let total = (end - start) as usize;
    log::debug!(
        "Image 0x{:08x}+0x{:x} touches blocks 0x{:08x}..0x{:08x}",
        addr,
        len,
        start,
        end
    );

    progress.reading(total);
    let mut current = vec![0u8; total];
    for (n, chunk) in current.chunks_mut(READ_CHUNK_SIZE).enumerate() {
        let offset = n * READ_CHUNK_SIZE;
        target.read_bytes(start + offset as u32, chunk)?;
        progress.read_progress(offset + chunk.len());
    }

    let mut desired = current.clone();
    let offset = (addr - start) as usize;
    desired[offset..offset + data.len()].copy_from_slice(data);
    stats.bytes_changed = current
        .iter()
        .zip(&desired)
        .filter(|(old, new)| old != new)
        .count();

    let block = region.block_size as usize;
    let dirty: Vec<usize> = (0..total / block)
        .filter(|b| current[b * block..(b + 1) * block] != desired[b * block..(b + 1) * block])
        .collect();
    if dirty.is_empty() {
        log::info!("Flash already contains the image");
        progress.complete(&stats);
        return Ok(stats);
    }

    progress.erasing(dirty.len(), dirty.len() * block);
    for (first, count) in runs(&dirty) {
        let at = start + (first * block) as u32;
        driver.erase(target, index, at, (count * block) as u32)?;
        stats.erases_performed += count;
        stats.bytes_erased += count * block;
        progress.erase_progress(stats.erases_performed);
    }

    // Only full units are fed to the driver, blank ones are skipped
    let unit = region.write_size as usize;
    let units: Vec<(u32, &[u8])> = dirty
        .iter()
        .flat_map(|&b| {
            let base = b * block;
            desired[base..base + block]
                .chunks(unit)
                .enumerate()
                .map(move |(u, chunk)| (start + (base + u * unit) as u32, chunk))
        })
        .filter(|(_, chunk)| chunk.iter().any(|&byte| byte != region.erased))
        .collect();

    progress.writing(units.len() * unit);
    for (at, chunk) in units {
        driver.write(target, index, at, chunk)?;
        stats.bytes_written += chunk.len();
        progress.write_progress(stats.bytes_written);
    }

    stats.flash_modified = true;
    progress.complete(&stats);
    Ok(stats)
}
