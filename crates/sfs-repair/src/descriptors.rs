//! Group-descriptor verification and staged repair.
//!
//! The descriptor table is where misdirected-write damage hurts most:
//! one clobbered pointer sends every inode lookup in that group into
//! arbitrary data. The pass here compares each group's three location
//! pointers against the positions the superblock geometry derives, and
//! splits mismatches two ways. A pointer outside its own group cannot
//! be a legitimate layout and is rewritten to the expected position; a
//! pointer inside its own group that merely differs is reported and
//! left alone, because nonstandard-but-working layouts exist in the
//! wild. Rewrites are staged in the session overlay, never written to
//! the backing media.

use std::fmt;

use serde::Serialize;
use sfs_core::Volume;
use sfs_error::{Result, SfsError};
use sfs_ondisk::Ext2GroupDesc;
use sfs_types::{BlockNumber, GroupNumber, SECTOR_SIZE, SectorNumber};

// ── Finding taxonomy ────────────────────────────────────────────────────────

/// Which of a descriptor's location pointers a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorField {
    BlockBitmap,
    InodeBitmap,
    InodeTable,
}

impl fmt::Display for DescriptorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockBitmap => write!(f, "block_bitmap"),
            Self::InodeBitmap => write!(f, "inode_bitmap"),
            Self::InodeTable => write!(f, "inode_table"),
        }
    }
}

/// What the pass did about a mismatched pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Rewritten to the expected position and staged in the overlay.
    Fixed,
    /// Would be rewritten under apply; this was a report-only pass.
    WouldFix,
    /// Inside its own group but not at the expected position. Possibly
    /// a legitimate layout, so never rewritten.
    Flagged,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::WouldFix => write!(f, "would_fix"),
            Self::Flagged => write!(f, "flagged"),
        }
    }
}

/// Whether a scan stages fixes or only classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    Report,
    Apply,
}

// ── Findings ────────────────────────────────────────────────────────────────

/// One mismatched descriptor pointer.
#[derive(Debug, Clone, Serialize)]
pub struct GroupFinding {
    pub group: GroupNumber,
    pub field: DescriptorField,
    pub found: u32,
    pub expected: BlockNumber,
    pub disposition: Disposition,
}

impl fmt::Display for GroupFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group {} {}: found block {}, expected {} [{}]",
            self.group, self.field, self.found, self.expected, self.disposition
        )
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

/// Aggregated results of a descriptor pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupScanReport {
    /// All findings, in group order.
    pub findings: Vec<GroupFinding>,
    pub groups_scanned: u32,
    pub fixes_applied: u32,
    pub flagged: u32,
    /// Descriptor sectors staged in the overlay.
    pub sectors_flushed: u32,
}

impl GroupScanReport {
    /// True when every pointer sat exactly where the geometry puts it.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

impl fmt::Display for GroupScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {} groups: {} findings, {} fixed, {} flagged, {} sectors staged",
            self.groups_scanned,
            self.findings.len(),
            self.fixes_applied,
            self.flagged,
            self.sectors_flushed
        )
    }
}

// ── Scan ────────────────────────────────────────────────────────────────────

/// Walk every group's descriptor and classify its location pointers.
///
/// Descriptors pack sixteen to a sector and damage tends to cluster, so
/// the pass keeps the current sector in hand and stages at most one
/// overlay write per descriptor sector, flushing when the walk moves on
/// and once more at the end.
pub fn scan_descriptors(volume: &mut Volume, mode: RepairMode) -> Result<GroupScanReport> {
    let groups = volume.model().groups_count;
    let mut report = GroupScanReport::default();

    let mut loaded: Option<SectorNumber> = None;
    let mut sector_buf = [0_u8; SECTOR_SIZE];
    let mut dirty = false;

    for group_index in 0..groups {
        let group = GroupNumber(group_index);
        let (sector, slot) = volume.model().descriptor_location(group)?;

        if loaded != Some(sector) {
            if dirty {
                if let Some(previous) = loaded {
                    volume.disk_mut().write_sector(previous, &sector_buf);
                    report.sectors_flushed += 1;
                }
                dirty = false;
            }
            volume
                .disk()
                .read_sector(sector, &mut sector_buf)
                .map_err(|err| descriptor_read_failure(volume, sector, err))?;
            loaded = Some(sector);
        }

        let mut desc = Ext2GroupDesc::parse_at(&sector_buf, slot)
            .map_err(|err| SfsError::Parse(err.to_string()))?;
        report.groups_scanned += 1;

        let checks = [
            (
                DescriptorField::BlockBitmap,
                desc.block_bitmap,
                volume.model().expected_block_bitmap(group),
            ),
            (
                DescriptorField::InodeBitmap,
                desc.inode_bitmap,
                volume.model().expected_inode_bitmap(group),
            ),
            (
                DescriptorField::InodeTable,
                desc.inode_table,
                volume.model().expected_inode_table(group),
            ),
        ];

        let mut rewrite = false;
        for (field, found, expected) in checks {
            if u64::from(found) == expected.0 {
                continue;
            }
            let in_own_group = volume
                .model()
                .block_in_group(BlockNumber(u64::from(found)), group);
            let disposition = if in_own_group {
                report.flagged += 1;
                Disposition::Flagged
            } else if mode == RepairMode::Apply {
                let value = expected
                    .to_u32()
                    .map_err(|err| SfsError::Parse(err.to_string()))?;
                match field {
                    DescriptorField::BlockBitmap => desc.block_bitmap = value,
                    DescriptorField::InodeBitmap => desc.inode_bitmap = value,
                    DescriptorField::InodeTable => desc.inode_table = value,
                }
                rewrite = true;
                report.fixes_applied += 1;
                Disposition::Fixed
            } else {
                Disposition::WouldFix
            };
            tracing::warn!(
                target: "sfs::repair",
                group = group.0,
                field = %field,
                found,
                expected = expected.0,
                disposition = %disposition,
                "descriptor_pointer_mismatch"
            );
            report.findings.push(GroupFinding {
                group,
                field,
                found,
                expected,
                disposition,
            });
        }

        if rewrite {
            desc.encode_at(&mut sector_buf, slot)
                .map_err(|err| SfsError::Parse(err.to_string()))?;
            dirty = true;
        }
    }

    if dirty {
        if let Some(previous) = loaded {
            volume.disk_mut().write_sector(previous, &sector_buf);
            report.sectors_flushed += 1;
        }
    }

    tracing::info!(
        target: "sfs::repair",
        groups = report.groups_scanned,
        findings = report.findings.len(),
        fixed = report.fixes_applied,
        flagged = report.flagged,
        sectors = report.sectors_flushed,
        "descriptor_scan_complete"
    );
    Ok(report)
}

fn descriptor_read_failure(volume: &Volume, sector: SectorNumber, err: SfsError) -> SfsError {
    match err {
        SfsError::Io(io) => {
            let block = sector.0 / volume.model().block_size.sectors_per_block();
            SfsError::Corruption {
                block,
                detail: format!("descriptor table sector {sector} unreadable: {io}"),
            }
        }
        other => other,
    }
}
