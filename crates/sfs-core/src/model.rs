//! Session-lifetime superblock model and block-group geometry.
//!
//! The superblock is read once at open and held for the whole session;
//! everything here is arithmetic over those cached fields. The expected
//! locations of per-group metadata are what the descriptor repair pass
//! compares found pointers against.

use serde::Serialize;
use sfs_error::{Result, SfsError};
use sfs_ondisk::{Ext2Superblock, GROUP_DESCS_PER_SECTOR, RoCompatFeatures};
use sfs_types::{BlockNumber, BlockSize, GroupNumber, SectorNumber, block_to_group};

/// Blocks set aside at the front of a group that carries a superblock
/// copy: the copy itself plus the descriptor-table and reserved-GDT
/// region as laid out on the volumes this tool targets.
pub const RESERVED_GROUP_BLOCKS: u64 = 1 + 0x400;

/// Superblock plus the geometry derived from it at open time.
#[derive(Debug, Clone, Serialize)]
pub struct SuperblockModel {
    pub superblock: Ext2Superblock,
    pub block_size: BlockSize,
    pub groups_count: u32,
    /// Set when `log_block_size` was 0 (the 1 KiB layout) or garbage.
    /// Operations proceed either way; results carry less confidence.
    pub degraded_geometry: bool,
}

impl SuperblockModel {
    /// Derive session geometry from a decoded superblock.
    ///
    /// A `log_block_size` that does not decode falls back to the 1 KiB
    /// floor with the degraded flag set. Zero per-group counts and
    /// sub-base inode records are the only hard failures; there is no
    /// arithmetic to do without them.
    pub fn from_superblock(superblock: Ext2Superblock) -> Result<Self> {
        if superblock.blocks_per_group == 0 {
            return Err(SfsError::InvalidGeometry(
                "blocks_per_group is zero".to_owned(),
            ));
        }
        if superblock.inodes_per_group == 0 {
            return Err(SfsError::InvalidGeometry(
                "inodes_per_group is zero".to_owned(),
            ));
        }
        if superblock.inode_size < 128 {
            return Err(SfsError::InvalidGeometry(format!(
                "inode record size {} is below the 128-byte base record",
                superblock.inode_size
            )));
        }

        let (block_size, degraded_geometry) = match BlockSize::from_log(superblock.log_block_size)
        {
            Ok(size) => (size, superblock.log_block_size == 0),
            Err(err) => {
                tracing::warn!(
                    target: "sfs::core",
                    log_block_size = superblock.log_block_size,
                    error = %err,
                    "superblock_block_size_unusable"
                );
                let floor = BlockSize::new(1024).map_err(|e| SfsError::Parse(e.to_string()))?;
                (floor, true)
            }
        };
        if degraded_geometry {
            tracing::warn!(
                target: "sfs::core",
                log_block_size = superblock.log_block_size,
                block_size = block_size.get(),
                "superblock_geometry_degraded"
            );
        }

        if u64::from(superblock.inode_size) > u64::from(block_size.get()) {
            return Err(SfsError::InvalidGeometry(format!(
                "inode record size {} exceeds the block size {}",
                superblock.inode_size,
                block_size.get()
            )));
        }

        let groups_count = superblock
            .blocks_count
            .div_ceil(superblock.blocks_per_group);

        Ok(Self {
            superblock,
            block_size,
            groups_count,
            degraded_geometry,
        })
    }

    /// Inode records per filesystem block. Nonzero by construction.
    #[must_use]
    pub fn inodes_per_block(&self) -> u32 {
        self.block_size.get() / u32::from(self.superblock.inode_size)
    }

    /// Blocks spanned by one group's inode table.
    #[must_use]
    pub fn inode_table_blocks(&self) -> u32 {
        self.superblock
            .inodes_per_group
            .div_ceil(self.inodes_per_block())
    }

    /// First block of the group-descriptor array: one past the block
    /// holding the superblock copy this session was opened from.
    #[must_use]
    pub fn descriptor_table_start(&self) -> BlockNumber {
        let base = u64::from(self.superblock.block_group_nr)
            * u64::from(self.superblock.blocks_per_group);
        BlockNumber(base + 1)
    }

    /// Sector holding `group`'s descriptor, and the record index inside it.
    ///
    /// Descriptors are packed 16 to a sector and the table's blocks are
    /// consecutive, so the sector index is a flat division.
    pub fn descriptor_location(&self, group: GroupNumber) -> Result<(SectorNumber, usize)> {
        let table = self.descriptor_table_start();
        let first = table.first_sector(self.block_size).ok_or_else(|| {
            SfsError::Format(format!(
                "descriptor table block {table} overflows sector addressing"
            ))
        })?;
        let sector = first
            .checked_add(u64::from(group.0) / GROUP_DESCS_PER_SECTOR as u64)
            .ok_or_else(|| {
                SfsError::Format(format!(
                    "descriptor sector for group {group} overflows sector addressing"
                ))
            })?;
        Ok((sector, group.0 as usize % GROUP_DESCS_PER_SECTOR))
    }

    /// Whether `group` carries a superblock backup (and the reserved
    /// descriptor region behind it). Without sparse-super every group
    /// does; with it, only groups 0, 1, and pure powers of 3, 5, or 7.
    #[must_use]
    pub fn has_superblock(&self, group: GroupNumber) -> bool {
        if !self
            .superblock
            .has_ro_compat(RoCompatFeatures::SPARSE_SUPER)
        {
            return true;
        }
        let g = group.0;
        g == 0 || g == 1 || is_pure_power(g, 3) || is_pure_power(g, 5) || is_pure_power(g, 7)
    }

    /// Where `group`'s block bitmap belongs on an undamaged volume.
    #[must_use]
    pub fn expected_block_bitmap(&self, group: GroupNumber) -> BlockNumber {
        let base = u64::from(group.0) * u64::from(self.superblock.blocks_per_group);
        let reserved = if self.has_superblock(group) {
            RESERVED_GROUP_BLOCKS
        } else {
            0
        };
        BlockNumber(base + reserved)
    }

    /// Inode bitmap follows the block bitmap.
    #[must_use]
    pub fn expected_inode_bitmap(&self, group: GroupNumber) -> BlockNumber {
        BlockNumber(self.expected_block_bitmap(group).0 + 1)
    }

    /// Inode table follows the two bitmaps.
    #[must_use]
    pub fn expected_inode_table(&self, group: GroupNumber) -> BlockNumber {
        BlockNumber(self.expected_block_bitmap(group).0 + 2)
    }

    /// Whether `block` falls inside `group`'s slice of the volume.
    #[must_use]
    pub fn block_in_group(&self, block: BlockNumber, group: GroupNumber) -> bool {
        block_to_group(block, self.superblock.blocks_per_group) == group
    }
}

/// True when `value` is `base^k` for some k >= 1.
fn is_pure_power(mut value: u32, base: u32) -> bool {
    if value < base {
        return false;
    }
    while value % base == 0 {
        value /= base;
    }
    value == 1
}
