#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Bytes per disk sector. Backends, the overlay, and the address space all
/// deal in this unit; block sizes are whole multiples of it.
pub const SECTOR_SIZE: usize = 512;

/// Default sector holding the primary ext2 superblock (byte offset 1024).
/// Operators can point a session at a backup copy instead.
pub const SUPERBLOCK_SECTOR: u64 = 2;

pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Direct block-pointer slots in an ext2 inode.
pub const INODE_DIRECT_SLOTS: usize = 12;
/// Slot holding the single-indirect block pointer.
pub const INODE_SLOT_INDIRECT1: usize = 12;
/// Slot holding the double-indirect block pointer.
pub const INODE_SLOT_INDIRECT2: usize = 13;
/// Slot holding the triple-indirect block pointer.
pub const INODE_SLOT_INDIRECT3: usize = 14;
/// Total block-pointer slots in an ext2 inode.
pub const INODE_BLOCK_SLOTS: usize = 15;

// ── Identifier newtypes ─────────────────────────────────────────────────────

/// 512-byte sector index, filesystem-logical unless a backend says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorNumber(pub u64);

/// Filesystem block index (block size comes from the superblock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// ext2 inode number (u32 on disk, 1-indexed; 0 marks an unused slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

/// Byte offset into a backend image (positioned-read semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl SectorNumber {
    /// Byte offset of this sector's first byte, `None` on overflow.
    #[must_use]
    pub fn to_byte_offset(self) -> Option<ByteOffset> {
        self.0.checked_mul(SECTOR_SIZE as u64).map(ByteOffset)
    }

    /// Add a sector count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

impl BlockNumber {
    /// First sector of this block, `None` on overflow.
    #[must_use]
    pub fn first_sector(self, block_size: BlockSize) -> Option<SectorNumber> {
        self.0
            .checked_mul(block_size.sectors_per_block())
            .map(SectorNumber)
    }

    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    /// Narrow to the on-disk u32 pointer width.
    pub fn to_u32(self) -> Result<u32, ParseError> {
        u32::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "block_number",
        })
    }
}

impl InodeNumber {
    pub const BAD_BLOCKS: Self = Self(1);
    pub const ROOT: Self = Self(2);
    pub const BOOT_LOADER: Self = Self(5);
    pub const UNDELETE_DIR: Self = Self(6);
    pub const RESIZE: Self = Self(7);
    pub const JOURNAL: Self = Self(8);

    /// Human label for the well-known reserved inodes, `None` otherwise.
    #[must_use]
    pub fn reserved_label(self) -> Option<&'static str> {
        match self {
            Self::BAD_BLOCKS => Some("badblocks"),
            Self::ROOT => Some("root directory"),
            Self::BOOT_LOADER => Some("bootloader"),
            Self::UNDELETE_DIR => Some("undelete"),
            Self::RESIZE => Some("extra group descriptors"),
            Self::JOURNAL => Some("journal"),
            _ => None,
        }
    }
}

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

/// Validated block size (power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [1024, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(1024..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    /// Derive from the superblock's `s_log_block_size` (`1024 << log`).
    pub fn from_log(log_block_size: u32) -> Result<Self, ParseError> {
        let value = block_size_from_log(log_block_size).ok_or(ParseError::InvalidField {
            field: "log_block_size",
            reason: "shift overflows u32",
        })?;
        Self::new(value)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// 512-byte sectors per block (at least 2 for any valid block size).
    #[must_use]
    pub fn sectors_per_block(self) -> u64 {
        u64::from(self.0) / SECTOR_SIZE as u64
    }

    /// u32 block pointers per block; the `P` of the indirect-chain tiers.
    #[must_use]
    pub fn pointers_per_block(self) -> u64 {
        u64::from(self.0) / 4
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

// ── Little-endian field readers ─────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Decode a NUL-padded fixed-width label (volume name, mount point).
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

#[must_use]
pub fn block_size_from_log(log_block_size: u32) -> Option<u32> {
    let shift = 10_u32.checked_add(log_block_size)?;
    1_u32.checked_shl(shift)
}

// ── POSIX file mode constants ───────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;

// ── Group/inode placement math ──────────────────────────────────────────────

/// Block group that owns a block. Plausibility checks compare this against
/// the group a descriptor claims to describe.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // group count is u32 on disk
pub fn block_to_group(block: BlockNumber, blocks_per_group: u32) -> GroupNumber {
    GroupNumber((block.0 / u64::from(blocks_per_group)) as u32)
}

/// Block group holding an inode. Inode numbers are 1-indexed.
#[must_use]
pub fn inode_to_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    GroupNumber(ino.0.saturating_sub(1) / inodes_per_group)
}

/// Index of an inode within its group's inode table.
#[must_use]
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    ino.0.saturating_sub(1) % inodes_per_group
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

// ── Display impls ───────────────────────────────────────────────────────────

impl fmt::Display for SectorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_helpers() {
        let bytes = [0x53_u8, 0xEF, 0x78, 0x56, 0xEF, 0xCD, 0xAB, 0x90];
        assert_eq!(read_le_u16(&bytes, 0).expect("u16"), 0xEF53);
        assert_eq!(read_le_u32(&bytes, 0).expect("u32"), 0x5678_EF53);
        assert_eq!(read_le_u32(&bytes, 4).expect("u32"), 0x90AB_CDEF);
        assert_eq!(read_le_u64(&bytes, 0).expect("u64"), 0x90AB_CDEF_5678_EF53);
    }

    #[test]
    fn test_read_helpers_bounds() {
        let bytes = [0_u8; 4];
        assert!(matches!(
            read_le_u32(&bytes, 1),
            Err(ParseError::InsufficientData {
                needed: 4,
                offset: 1,
                actual: 3,
            })
        ));
        assert!(read_le_u16(&bytes, usize::MAX).is_err());
    }

    #[test]
    fn test_trim_nul_padded() {
        assert_eq!(trim_nul_padded(b"storage0\0\0\0\0"), "storage0");
        assert_eq!(trim_nul_padded(b"\0\0\0"), "");
        assert_eq!(trim_nul_padded(b"full"), "full");
    }

    #[test]
    fn test_block_size_validation() {
        assert!(BlockSize::new(1024).is_ok());
        assert!(BlockSize::new(4096).is_ok());
        assert!(BlockSize::new(65536).is_ok());
        assert!(BlockSize::new(512).is_err());
        assert!(BlockSize::new(3000).is_err());
        assert!(BlockSize::new(0).is_err());
        assert!(BlockSize::new(131_072).is_err());
    }

    #[test]
    fn test_block_size_derived_units() {
        let bs = BlockSize::new(4096).expect("block size");
        assert_eq!(bs.sectors_per_block(), 8);
        assert_eq!(bs.pointers_per_block(), 1024);

        let bs1k = BlockSize::from_log(0).expect("1k");
        assert_eq!(bs1k.get(), 1024);
        assert_eq!(bs1k.sectors_per_block(), 2);
        assert_eq!(bs1k.pointers_per_block(), 256);

        assert_eq!(BlockSize::from_log(2).expect("4k").get(), 4096);
        assert!(BlockSize::from_log(31).is_err());
    }

    #[test]
    fn test_sector_block_offsets() {
        assert_eq!(
            SectorNumber(3).to_byte_offset(),
            Some(ByteOffset(3 * 512))
        );
        assert_eq!(SectorNumber(u64::MAX).to_byte_offset(), None);

        let bs = BlockSize::new(4096).expect("block size");
        assert_eq!(BlockNumber(5).first_sector(bs), Some(SectorNumber(40)));
    }

    #[test]
    fn test_group_math() {
        assert_eq!(block_to_group(BlockNumber(0), 8192), GroupNumber(0));
        assert_eq!(block_to_group(BlockNumber(8191), 8192), GroupNumber(0));
        assert_eq!(block_to_group(BlockNumber(8192), 8192), GroupNumber(1));

        assert_eq!(inode_to_group(InodeNumber(1), 1856), GroupNumber(0));
        assert_eq!(inode_to_group(InodeNumber(1856), 1856), GroupNumber(0));
        assert_eq!(inode_to_group(InodeNumber(1857), 1856), GroupNumber(1));

        assert_eq!(inode_index_in_group(InodeNumber(1), 1856), 0);
        assert_eq!(inode_index_in_group(InodeNumber(1857), 1856), 0);
        assert_eq!(inode_index_in_group(InodeNumber(2), 1856), 1);
    }

    #[test]
    fn test_reserved_labels() {
        assert_eq!(InodeNumber::ROOT.reserved_label(), Some("root directory"));
        assert_eq!(InodeNumber(8).reserved_label(), Some("journal"));
        assert_eq!(InodeNumber(3).reserved_label(), None);
        assert_eq!(InodeNumber(11).reserved_label(), None);
    }
}
