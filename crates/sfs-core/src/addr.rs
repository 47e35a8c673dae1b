//! Sector/block address space over one backend plus the session overlay.
//!
//! Reads consult the overlay first so staged repairs are visible to every
//! later read in the session. Writes only ever land in the overlay; the
//! backend never sees one.

use sfs_device::{DiskBackend, SectorBuf};
use sfs_error::{Result, SfsError};
use sfs_overlay::CowOverlay;
use sfs_types::{BlockNumber, SECTOR_SIZE, SectorNumber};

/// Explicit session state: the physical backend and the staged writes.
/// No globals; dropping this drops the image handles.
pub struct DiskAddressSpace {
    backend: Box<dyn DiskBackend>,
    overlay: CowOverlay,
}

impl std::fmt::Debug for DiskAddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskAddressSpace")
            .field("backend", &self.backend.name())
            .field("staged_sectors", &self.overlay.len())
            .finish()
    }
}

impl DiskAddressSpace {
    #[must_use]
    pub fn new(backend: Box<dyn DiskBackend>) -> Self {
        Self {
            backend,
            overlay: CowOverlay::new(),
        }
    }

    /// Backend kind, for logs and reports.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[must_use]
    pub fn overlay(&self) -> &CowOverlay {
        &self.overlay
    }

    #[must_use]
    pub fn overlay_mut(&mut self) -> &mut CowOverlay {
        &mut self.overlay
    }

    /// Read one sector: overlay hit wins, otherwise the backend, whose
    /// errors propagate unchanged.
    pub fn read_sector(&self, sector: SectorNumber, buf: &mut SectorBuf) -> Result<()> {
        if let Some(staged) = self.overlay.get(sector) {
            buf.copy_from_slice(staged);
            return Ok(());
        }
        self.backend.read_sector(sector, buf)
    }

    /// Stage one sector. The physical media is never written.
    pub fn write_sector(&mut self, sector: SectorNumber, payload: &SectorBuf) {
        self.overlay.record(sector, payload);
    }

    /// Exclude the chunk serving `sector` from its primary disk, where the
    /// backend supports it.
    pub fn mark_unreadable(&mut self, sector: SectorNumber) -> Result<()> {
        self.backend.mark_unreadable(sector)
    }

    /// Read one filesystem block. `buf.len()` is the block size; the block
    /// is assembled from `buf.len() / 512` consecutive sectors starting at
    /// `block * sectors_per_block`, in ascending order. The first failing
    /// sector aborts the whole read with its error.
    pub fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() || buf.len() % SECTOR_SIZE != 0 {
            return Err(SfsError::Format(format!(
                "block buffer of {} bytes is not a whole number of sectors",
                buf.len()
            )));
        }
        let sectors_per_block = (buf.len() / SECTOR_SIZE) as u64;
        let first = block.0.checked_mul(sectors_per_block).ok_or_else(|| {
            SfsError::Format(format!("block {block} overflows sector addressing"))
        })?;

        let mut sector_buf = [0_u8; SECTOR_SIZE];
        for (index, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector = SectorNumber(first + index as u64);
            self.read_sector(sector, &mut sector_buf)?;
            chunk.copy_from_slice(&sector_buf);
        }
        Ok(())
    }
}
