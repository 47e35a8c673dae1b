//! Degraded RAID5 member addressing.
//!
//! The array this tool was written against is three members, 64 KiB chunks,
//! left-symmetric parity rotation, with the LVM payload starting 384 sectors
//! into the volume. The sector computation mirrors the md driver's
//! `raid5_compute_sector` for ALGORITHM_LEFT_SYMMETRIC only: the on-disk
//! algorithm selector is not decoded here, so an array built with another
//! rotation will map to the wrong members. That limitation is deliberate.

use crate::{DiskBackend, SectorBuf};
use sfs_error::{Result, SfsError};
use sfs_types::SectorNumber;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Members in the array.
pub const RAID_DISKS: u64 = 3;
/// Data-bearing chunks per stripe; the remaining member holds parity.
pub const DATA_DISKS: u64 = 2;
/// Sectors per 64 KiB chunk.
pub const CHUNK_SECTORS: u64 = 128;
/// Sectors between the start of the array's payload and the LVM contents.
pub const LVM_OFFSET_SECTORS: u64 = 384;

/// Member device paths behind the bare `raid:` descriptor.
pub const DEFAULT_MEMBER_PATHS: [&str; 3] = ["/dev/loop0", "/dev/loop1", "/dev/loop2"];

/// Where one filesystem-logical sector lives in the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaidLocation {
    /// Volume-relative chunk number (LVM offset already applied).
    pub chunk: u64,
    /// Member index serving the data.
    pub disk: usize,
    /// Member index holding the stripe's parity chunk.
    pub parity_disk: usize,
    /// Sector within the serving member.
    pub member_sector: SectorNumber,
}

impl RaidLocation {
    /// The stripe's other non-parity member; where a lame chunk's read gets
    /// redirected. Member indices sum to 3, so subtraction finds the third.
    #[must_use]
    pub fn alternate_disk(&self) -> usize {
        3 - self.parity_disk - self.disk
    }
}

/// Left-symmetric RAID5 address computation.
///
/// Returns `None` when the sector arithmetic would overflow, which no real
/// array reaches.
#[must_use]
pub fn locate_sector(logical: SectorNumber) -> Option<RaidLocation> {
    let volume_sector = logical.0.checked_add(LVM_OFFSET_SECTORS)?;
    let chunk_offset = volume_sector % CHUNK_SECTORS;
    let chunk = volume_sector / CHUNK_SECTORS;

    let stripe = chunk / DATA_DISKS;
    let data_index = chunk % DATA_DISKS;

    // Parity walks backwards one member per stripe; data chunks fill the
    // remaining members starting just after parity.
    let parity_disk = DATA_DISKS - stripe % RAID_DISKS;
    let disk = (parity_disk + 1 + data_index) % RAID_DISKS;

    let member_sector = stripe.checked_mul(CHUNK_SECTORS)?.checked_add(chunk_offset)?;

    Some(RaidLocation {
        chunk,
        disk: disk as usize,
        parity_disk: parity_disk as usize,
        member_sector: SectorNumber(member_sector),
    })
}

/// Three striped members reconstructed through the left-symmetric math.
///
/// Chunks marked unreadable join a permanent per-handle lame set; reads of a
/// lame chunk go to the stripe's other non-parity member. That redirect is a
/// documented best-effort heuristic, not parity reconstruction: the
/// alternate member holds that stripe's other data chunk, so the bytes that
/// come back may belong to a different part of the volume. The mark exists
/// so an operator can keep walking metadata past a dead region.
pub struct RaidBackend {
    members: [File; RAID_DISKS as usize],
    paths: [PathBuf; RAID_DISKS as usize],
    lame_chunks: BTreeSet<u64>,
}

impl RaidBackend {
    /// Open the fixed default member devices.
    pub fn open_default() -> Result<Self> {
        Self::open_members(DEFAULT_MEMBER_PATHS)
    }

    /// Open an explicit member set (tooling and tests).
    pub fn open_members<P: AsRef<Path>>(paths: [P; 3]) -> Result<Self> {
        let paths = paths.map(|p| p.as_ref().to_path_buf());
        let members = [
            open_member(&paths[0])?,
            open_member(&paths[1])?,
            open_member(&paths[2])?,
        ];
        tracing::debug!(
            target: "sfs::device",
            member0 = %paths[0].display(),
            member1 = %paths[1].display(),
            member2 = %paths[2].display(),
            "raid_backend_open"
        );
        Ok(Self {
            members,
            paths,
            lame_chunks: BTreeSet::new(),
        })
    }

    pub(crate) fn match_open(descriptor: &str) -> Option<Result<Box<dyn DiskBackend>>> {
        if descriptor != "raid:" {
            return None;
        }
        Some(Self::open_default().map(|backend| Box::new(backend) as Box<dyn DiskBackend>))
    }

    /// Chunks currently marked lame, in ascending order.
    #[must_use]
    pub fn lame_chunks(&self) -> Vec<u64> {
        self.lame_chunks.iter().copied().collect()
    }

    /// Resolve `sector` to the member that would serve it right now,
    /// lame-chunk redirect applied.
    fn serving_location(&self, sector: SectorNumber) -> Result<RaidLocation> {
        let mut location = locate_sector(sector).ok_or_else(|| {
            SfsError::Format(format!("sector {sector} overflows RAID addressing"))
        })?;
        if self.lame_chunks.contains(&location.chunk) {
            let redirected = location.alternate_disk();
            tracing::debug!(
                target: "sfs::device",
                chunk = location.chunk,
                primary = location.disk,
                redirected,
                "raid_lame_chunk_redirect"
            );
            location.disk = redirected;
        }
        Ok(location)
    }
}

impl fmt::Debug for RaidBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaidBackend")
            .field("paths", &self.paths)
            .field("lame_chunks", &self.lame_chunks)
            .finish_non_exhaustive()
    }
}

impl DiskBackend for RaidBackend {
    fn name(&self) -> &'static str {
        "raid"
    }

    fn read_sector(&self, sector: SectorNumber, buf: &mut SectorBuf) -> Result<()> {
        let location = self.serving_location(sector)?;
        let offset = location.member_sector.to_byte_offset().ok_or_else(|| {
            SfsError::Format(format!(
                "member sector {} overflows byte addressing",
                location.member_sector
            ))
        })?;
        self.members[location.disk].read_exact_at(buf, offset.0)?;
        Ok(())
    }

    fn mark_unreadable(&mut self, sector: SectorNumber) -> Result<()> {
        let location = self.serving_location(sector)?;
        if location.disk == location.parity_disk {
            // Left-symmetric placement never serves data from the parity
            // member, but the contract promises this refusal, so keep the
            // guard against a future rotation variant.
            return Err(SfsError::MarkUnsupported(format!(
                "chunk {} is served by parity member {}",
                location.chunk, location.parity_disk
            )));
        }
        if !self.lame_chunks.insert(location.chunk) {
            return Err(SfsError::ChunkAlreadyLame {
                chunk: location.chunk,
            });
        }
        tracing::warn!(
            target: "sfs::device",
            chunk = location.chunk,
            primary = location.disk,
            redirect = location.alternate_disk(),
            "raid_chunk_marked_lame"
        );
        Ok(())
    }
}

fn open_member(path: &Path) -> Result<File> {
    OpenOptions::new().read(true).open(path).map_err(|err| {
        tracing::error!(
            target: "sfs::device",
            path = %path.display(),
            error = %err,
            "raid_member_open_failed"
        );
        SfsError::Io(err)
    })
}
