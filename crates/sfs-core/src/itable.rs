//! Inode table scanning.
//!
//! The inode tables are the highest-value real estate on a wrecked
//! volume: if a table block survived, its 128-byte records are still
//! individually decodable even when the directory tree above them is
//! gone. The scan walks a group's table in place and tallies records
//! whose fields are beyond what any live filesystem would produce,
//! which is how misdirected-write damage shows up in practice.

use std::fmt;

use crate::volume::Volume;
use serde::Serialize;
use sfs_error::{Result, SfsError};
use sfs_ondisk::Ext2Inode;
use sfs_types::{BlockNumber, GroupNumber, InodeNumber};

/// Geometry of one group's inode table, resolved through the live
/// descriptor so staged repairs are honored.
struct TableSpan {
    start: u64,
    blocks: u32,
    per_block: u32,
    per_group: u32,
    record_size: usize,
    first_ino: u32,
}

fn table_span(volume: &Volume, group: GroupNumber) -> Result<TableSpan> {
    let model = volume.model();
    let groups = model.groups_count;
    if group.0 >= groups {
        return Err(SfsError::NotFound(format!(
            "group {group} outside this volume's 0..{groups}"
        )));
    }
    let desc = volume.load_group_desc(group)?;
    let per_group = model.superblock.inodes_per_group;
    let first = group.0.checked_mul(per_group).and_then(|v| v.checked_add(1));
    let last = first.and_then(|v| v.checked_add(per_group - 1));
    let (Some(first_ino), Some(_)) = (first, last) else {
        return Err(SfsError::InvalidGeometry(format!(
            "inode numbering overflows in group {group}"
        )));
    };
    Ok(TableSpan {
        start: u64::from(desc.inode_table),
        blocks: model.inode_table_blocks(),
        per_block: model.inodes_per_block(),
        per_group,
        record_size: usize::from(model.superblock.inode_size),
        first_ino,
    })
}

/// Record counts for a single table block.
#[derive(Debug, Clone, Serialize)]
pub struct BlockTally {
    pub table_block: u64,
    pub scanned: u32,
    pub bogus: u32,
}

impl fmt::Display for BlockTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {}: {} scanned, {} bogus",
            self.table_block, self.scanned, self.bogus
        )
    }
}

/// Outcome of walking one group's inode table.
#[derive(Debug, Clone, Serialize)]
pub struct ItableScanReport {
    pub group: GroupNumber,
    pub table_start: u64,
    pub blocks_walked: u32,
    pub inodes_scanned: u32,
    pub ok_count: u32,
    pub bogus_count: u32,
    pub per_block: Vec<BlockTally>,
}

impl fmt::Display for ItableScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group {}: table at block {}, {} blocks walked, {} inodes: {} ok, {} bogus",
            self.group,
            self.table_start,
            self.blocks_walked,
            self.inodes_scanned,
            self.ok_count,
            self.bogus_count
        )
    }
}

/// Walk `group`'s inode table and tally obviously-damaged records.
pub fn scan_inode_table(volume: &Volume, group: GroupNumber) -> Result<ItableScanReport> {
    let span = table_span(volume, group)?;
    let mut per_block = Vec::with_capacity(span.blocks as usize);
    let mut block = volume.block_buffer();
    let mut remaining = span.per_group;
    let mut next_ino = span.first_ino;

    for block_index in 0..span.blocks {
        if remaining == 0 {
            break;
        }
        let table_block = span.start + u64::from(block_index);
        volume.read_block(BlockNumber(table_block), &mut block)?;

        let records = remaining.min(span.per_block);
        let mut tally = BlockTally {
            table_block,
            scanned: 0,
            bogus: 0,
        };
        for r in 0..records as usize {
            let offset = r * span.record_size;
            let inode = Ext2Inode::parse_from_bytes(&block[offset..offset + span.record_size])
                .map_err(|err| SfsError::Corruption {
                    block: table_block,
                    detail: format!("inode record {r}: {err}"),
                })?;
            tally.scanned += 1;
            if let Some(reason) = inode.looks_bogus() {
                tally.bogus += 1;
                tracing::debug!(
                    target: "sfs::core",
                    inode = next_ino,
                    block = table_block,
                    reason,
                    "bogus_inode_record"
                );
            }
            next_ino += 1;
        }
        remaining -= records;
        per_block.push(tally);
    }

    let inodes_scanned = per_block.iter().map(|t| t.scanned).sum::<u32>();
    let bogus_count = per_block.iter().map(|t| t.bogus).sum::<u32>();
    Ok(ItableScanReport {
        group,
        table_start: span.start,
        blocks_walked: per_block.len() as u32,
        inodes_scanned,
        ok_count: inodes_scanned - bogus_count,
        bogus_count,
        per_block,
    })
}

/// Decode every record in `group`'s table, paired with its inode number.
///
/// Fully-zero records come back too; unused slots are the caller's to
/// filter, since on a damaged volume "unused" is a judgment call.
pub fn load_inode_table(
    volume: &Volume,
    group: GroupNumber,
) -> Result<Vec<(InodeNumber, Ext2Inode)>> {
    let span = table_span(volume, group)?;
    let mut records = Vec::with_capacity(span.per_group as usize);
    let mut block = volume.block_buffer();
    let mut remaining = span.per_group;
    let mut next_ino = span.first_ino;

    for block_index in 0..span.blocks {
        if remaining == 0 {
            break;
        }
        let table_block = span.start + u64::from(block_index);
        volume.read_block(BlockNumber(table_block), &mut block)?;

        let count = remaining.min(span.per_block);
        for r in 0..count as usize {
            let offset = r * span.record_size;
            let inode = Ext2Inode::parse_from_bytes(&block[offset..offset + span.record_size])
                .map_err(|err| SfsError::Corruption {
                    block: table_block,
                    detail: format!("inode record {r}: {err}"),
                })?;
            records.push((InodeNumber(next_ino), inode));
            next_ino += 1;
        }
        remaining -= count;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::{TestImage, inode_record};

    fn seeded_image() -> TestImage {
        let mut image = TestImage::new(64);
        // Two bogosity classes and one merely-suspicious record spread
        // across both table blocks (32 records per 4 KiB block).
        image.write_inode(5, &inode_record(0o100_644, 0, 5000, &[]));
        image.write_inode(7, &inode_record(0o100_644, 0, 2000, &[]));
        image.write_inode(40, &inode_record(0o000_777, 0, 1, &[]));
        image.write_inode(50, &inode_record(0o100_644, 0, 4097, &[]));
        image
    }

    #[test]
    fn scan_tallies_bogus_records_per_block() {
        let volume = seeded_image().into_volume();
        let report = scan_inode_table(&volume, GroupNumber(0)).expect("scan");

        assert_eq!(report.table_start, 5);
        assert_eq!(report.blocks_walked, 2);
        assert_eq!(report.inodes_scanned, 64);
        assert_eq!(report.bogus_count, 3);
        assert_eq!(report.ok_count, 61);

        assert_eq!(report.per_block.len(), 2);
        assert_eq!(report.per_block[0].table_block, 5);
        assert_eq!(report.per_block[0].scanned, 32);
        assert_eq!(report.per_block[0].bogus, 1, "links 5000 in the first block");
        assert_eq!(report.per_block[1].table_block, 6);
        assert_eq!(report.per_block[1].bogus, 2, "empty type nibble and links 4097");
    }

    #[test]
    fn high_link_counts_alone_are_not_bogus() {
        let mut image = TestImage::new(64);
        image.write_inode(7, &inode_record(0o100_644, 0, 2000, &[]));
        let volume = image.into_volume();

        let report = scan_inode_table(&volume, GroupNumber(0)).expect("scan");
        assert_eq!(report.bogus_count, 0);

        let inode = volume.read_inode(InodeNumber(7)).expect("find");
        assert!(inode.suspicious_links());
    }

    #[test]
    fn scan_rejects_groups_the_volume_does_not_have() {
        let volume = TestImage::new(64).into_volume();
        assert!(matches!(
            scan_inode_table(&volume, GroupNumber(1)),
            Err(SfsError::NotFound(_))
        ));
    }

    #[test]
    fn load_numbers_records_from_the_group_base() {
        let volume = seeded_image().into_volume();
        let records = load_inode_table(&volume, GroupNumber(0)).expect("load");

        assert_eq!(records.len(), 64);
        assert_eq!(records[0].0, InodeNumber(1));
        assert_eq!(records[63].0, InodeNumber(64));
        let (ino, inode) = &records[4];
        assert_eq!(*ino, InodeNumber(5));
        assert_eq!(inode.links_count, 5000);
    }

    #[test]
    fn report_renders_a_one_line_summary() {
        let volume = seeded_image().into_volume();
        let report = scan_inode_table(&volume, GroupNumber(0)).expect("scan");
        let line = report.to_string();
        assert!(line.contains("group 0"), "{line}");
        assert!(line.contains("3 bogus"), "{line}");
    }
}
