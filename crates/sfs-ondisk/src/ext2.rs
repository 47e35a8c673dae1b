#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sfs_types::{
    EXT2_SUPER_MAGIC, INODE_BLOCK_SLOTS, ParseError, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK,
    S_IFMT, S_IFREG, S_IFSOCK, SECTOR_SIZE, ensure_slice, read_fixed, read_le_u16, read_le_u32,
    trim_nul_padded,
};

/// On-disk size of one block-group descriptor.
pub const GROUP_DESC_SIZE: usize = 32;
/// Descriptors per 512-byte sector.
pub const GROUP_DESCS_PER_SECTOR: usize = SECTOR_SIZE / GROUP_DESC_SIZE;

// ── ext2 feature flags ──────────────────────────────────────────────────────

/// Compatible feature flags (`s_feature_compat`). Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatFeatures(pub u32);

impl CompatFeatures {
    pub const DIR_PREALLOC: Self = Self(0x0001);
    pub const IMAGIC_INODES: Self = Self(0x0002);
    pub const HAS_JOURNAL: Self = Self(0x0004);
    pub const EXT_ATTR: Self = Self(0x0008);
    pub const RESIZE_INODE: Self = Self(0x0010);
    pub const DIR_INDEX: Self = Self(0x0020);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "DIR_PREALLOC"),
        (0x0002, "IMAGIC_INODES"),
        (0x0004, "HAS_JOURNAL"),
        (0x0008, "EXT_ATTR"),
        (0x0010, "RESIZE_INODE"),
        (0x0020, "DIR_INDEX"),
    ];

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Names of all set flags; unknown bits are reported via `unknown_bits`.
    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !known_mask(Self::KNOWN)
    }
}

impl std::fmt::Display for CompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Incompatible feature flags (`s_feature_incompat`).
///
/// A reader that does not understand a set bit cannot safely interpret the
/// volume. This toolkit reports them; it does not refuse to proceed, since
/// refusing defeats the point of forensic inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompatFeatures(pub u32);

impl IncompatFeatures {
    pub const COMPRESSION: Self = Self(0x0001);
    pub const FILETYPE: Self = Self(0x0002);
    pub const RECOVER: Self = Self(0x0004);
    pub const JOURNAL_DEV: Self = Self(0x0008);
    pub const META_BG: Self = Self(0x0010);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "COMPRESSION"),
        (0x0002, "FILETYPE"),
        (0x0004, "RECOVER"),
        (0x0008, "JOURNAL_DEV"),
        (0x0010, "META_BG"),
    ];

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !known_mask(Self::KNOWN)
    }
}

impl std::fmt::Display for IncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Read-only compatible feature flags (`s_feature_ro_compat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoCompatFeatures(pub u32);

impl RoCompatFeatures {
    pub const SPARSE_SUPER: Self = Self(0x0001);
    pub const LARGE_FILE: Self = Self(0x0002);
    pub const BTREE_DIR: Self = Self(0x0004);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "SPARSE_SUPER"),
        (0x0002, "LARGE_FILE"),
        (0x0004, "BTREE_DIR"),
    ];

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !known_mask(Self::KNOWN)
    }
}

impl std::fmt::Display for RoCompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Per-inode flags (`i_flags`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeFlags(pub u32);

impl InodeFlags {
    pub const SECRM: Self = Self(0x0000_0001);
    pub const UNRM: Self = Self(0x0000_0002);
    pub const COMPR: Self = Self(0x0000_0004);
    pub const SYNC: Self = Self(0x0000_0008);
    pub const IMMUTABLE: Self = Self(0x0000_0010);
    pub const APPEND: Self = Self(0x0000_0020);
    pub const NODUMP: Self = Self(0x0000_0040);
    pub const NOATIME: Self = Self(0x0000_0080);
    pub const HASH_INDEXED_DIR: Self = Self(0x0001_0000);
    pub const AFS_DIR: Self = Self(0x0002_0000);
    pub const JOURNAL_DATA: Self = Self(0x0004_0000);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0000_0001, "SECRM"),
        (0x0000_0002, "UNRM"),
        (0x0000_0004, "COMPR"),
        (0x0000_0008, "SYNC"),
        (0x0000_0010, "IMMUTABLE"),
        (0x0000_0020, "APPEND"),
        (0x0000_0040, "NODUMP"),
        (0x0000_0080, "NOATIME"),
        (0x0001_0000, "HASH_INDEXED_DIR"),
        (0x0002_0000, "AFS_DIR"),
        (0x0004_0000, "JOURNAL_DATA"),
    ];

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !known_mask(Self::KNOWN)
    }
}

impl std::fmt::Display for InodeFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

// ── Shared flag helpers ─────────────────────────────────────────────────────

fn known_mask(known: &[(u32, &'static str)]) -> u32 {
    known.iter().map(|(bit, _)| bit).fold(0, |a, b| a | b)
}

/// Collect names of all set bits from a `(bit, name)` table.
fn describe_flags(bits: u32, known: &[(u32, &'static str)]) -> Vec<&'static str> {
    known
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Format a bitmask as a pipe-separated list of flag names.
///
/// Example output: `IMMUTABLE|NOATIME` or `(none)` when zero. Unknown bits
/// are appended as hex, e.g. `SPARSE_SUPER|0x8`.
fn format_flags(
    f: &mut std::fmt::Formatter<'_>,
    bits: u32,
    known: &[(u32, &'static str)],
) -> std::fmt::Result {
    if bits == 0 {
        return f.write_str("(none)");
    }
    let mut first = true;
    let mut remaining = bits;
    for &(bit, name) in known {
        if remaining & bit != 0 {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            remaining &= !bit;
            first = false;
        }
    }
    if remaining != 0 {
        if !first {
            f.write_str("|")?;
        }
        write!(f, "0x{remaining:X}")?;
    }
    Ok(())
}

// ── File types ──────────────────────────────────────────────────────────────

/// File type, from either a directory entry's type byte or an inode's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ext2FileType {
    Unknown,
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Symlink,
}

impl Ext2FileType {
    /// Decode a directory entry's `file_type` byte. Values outside the
    /// defined range come back as `Unknown` rather than an error; damaged
    /// directories produce them routinely.
    #[must_use]
    pub fn from_dir_entry(byte: u8) -> Self {
        match byte {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::CharDevice,
            4 => Self::BlockDevice,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    /// Decode the type nibble of an inode mode.
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            S_IFLNK => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    /// Three-letter tag for listings.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Unknown => "???",
            Self::Regular => "FIL",
            Self::Directory => "DIR",
            Self::CharDevice => "CHR",
            Self::BlockDevice => "BLK",
            Self::Fifo => "FIF",
            Self::Socket => "SOC",
            Self::Symlink => "LNK",
        }
    }
}

impl std::fmt::Display for Ext2FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Regular => "regular file",
            Self::Directory => "directory",
            Self::CharDevice => "character device",
            Self::BlockDevice => "block device",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
            Self::Symlink => "symbolic link",
        };
        f.write_str(name)
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Decoded ext2 superblock.
///
/// Every decoded field lives below offset 0x200, so one 512-byte sector is
/// enough input. A wrong magic is recorded, not rejected: on the volumes
/// this toolkit exists for, a trashed superblock is often exactly what the
/// operator needs to look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_frag_size: i32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,
    pub last_mounted: String,

    // ── State & mount history ────────────────────────────────────────────
    pub state: u16,
    pub errors: u16,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub mtime: u32,
    pub wtime: u32,
    pub lastcheck: u32,
    pub checkinterval: u32,

    // ── Revision & layout ────────────────────────────────────────────────
    pub rev_level: u32,
    pub minor_rev_level: u16,
    pub creator_os: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    pub first_ino: u32,
    pub inode_size: u16,
    /// Which block group this superblock copy was written into.
    pub block_group_nr: u16,

    // ── Features ─────────────────────────────────────────────────────────
    pub feature_compat: CompatFeatures,
    pub feature_incompat: IncompatFeatures,
    pub feature_ro_compat: RoCompatFeatures,

    // ── Journal (ext3) ───────────────────────────────────────────────────
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,
}

impl Ext2Superblock {
    /// Decode a superblock from the 512-byte sector it was read into.
    pub fn parse_sector_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SECTOR_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SECTOR_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let rev_level = read_le_u32(region, 0x4C)?;
        // Revision 0 fixed both of these; the on-disk fields are unused there.
        let (first_ino, inode_size) = if rev_level == 0 {
            (11, 128)
        } else {
            (read_le_u32(region, 0x54)?, read_le_u16(region, 0x58)?)
        };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            reserved_blocks_count: read_le_u32(region, 0x08)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size: read_le_u32(region, 0x18)?,
            log_frag_size: i32::from_le_bytes(read_fixed::<4>(region, 0x1C)?),
            blocks_per_group: read_le_u32(region, 0x20)?,
            frags_per_group: read_le_u32(region, 0x24)?,
            inodes_per_group: read_le_u32(region, 0x28)?,

            magic: read_le_u16(region, 0x38)?,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),
            last_mounted: trim_nul_padded(&read_fixed::<64>(region, 0x88)?),

            state: read_le_u16(region, 0x3A)?,
            errors: read_le_u16(region, 0x3C)?,
            mnt_count: read_le_u16(region, 0x34)?,
            max_mnt_count: read_le_u16(region, 0x36)?,
            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,
            lastcheck: read_le_u32(region, 0x40)?,
            checkinterval: read_le_u32(region, 0x44)?,

            rev_level,
            minor_rev_level: read_le_u16(region, 0x3E)?,
            creator_os: read_le_u32(region, 0x48)?,
            def_resuid: read_le_u16(region, 0x50)?,
            def_resgid: read_le_u16(region, 0x52)?,
            first_ino,
            inode_size,
            block_group_nr: read_le_u16(region, 0x5A)?,

            feature_compat: CompatFeatures(read_le_u32(region, 0x5C)?),
            feature_incompat: IncompatFeatures(read_le_u32(region, 0x60)?),
            feature_ro_compat: RoCompatFeatures(read_le_u32(region, 0x64)?),

            journal_inum: read_le_u32(region, 0xE0)?,
            journal_dev: read_le_u32(region, 0xE4)?,
            last_orphan: read_le_u32(region, 0xE8)?,
        })
    }

    /// Whether the magic field holds the expected 0xEF53.
    #[must_use]
    pub fn magic_matches(&self) -> bool {
        self.magic == EXT2_SUPER_MAGIC
    }

    #[must_use]
    pub fn has_compat(&self, mask: CompatFeatures) -> bool {
        self.feature_compat.contains(mask)
    }

    #[must_use]
    pub fn has_incompat(&self, mask: IncompatFeatures) -> bool {
        self.feature_incompat.contains(mask)
    }

    #[must_use]
    pub fn has_ro_compat(&self, mask: RoCompatFeatures) -> bool {
        self.feature_ro_compat.contains(mask)
    }

    /// Whether only select groups carry superblock backups.
    #[must_use]
    pub fn has_sparse_super(&self) -> bool {
        self.has_ro_compat(RoCompatFeatures::SPARSE_SUPER)
    }

    /// Fragment size in bytes. The on-disk value is a signed shift relative
    /// to 1024, so a damaged field can produce `None` (shift out of range)
    /// or 0 (shifted to nothing); both are worth showing to the operator.
    #[must_use]
    pub fn frag_size(&self) -> Option<u32> {
        if self.log_frag_size >= 0 {
            u32::try_from(self.log_frag_size)
                .ok()
                .and_then(|shift| 1024_u32.checked_shl(shift))
        } else {
            1024_u32.checked_shr(self.log_frag_size.unsigned_abs())
        }
    }
}

// ── Block-group descriptor ──────────────────────────────────────────────────

/// One 32-byte block-group descriptor.
///
/// Decode and re-encode both exist: the repair pass rewrites descriptor
/// bytes inside a sector image before staging it to the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    /// Decode one descriptor from the start of `bytes`.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            block_bitmap: read_le_u32(bytes, 0x00)?,
            inode_bitmap: read_le_u32(bytes, 0x04)?,
            inode_table: read_le_u32(bytes, 0x08)?,
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }

    /// Decode the descriptor at `index` within a 512-byte sector image.
    pub fn parse_at(sector: &[u8], index: usize) -> Result<Self, ParseError> {
        if index >= GROUP_DESCS_PER_SECTOR {
            return Err(ParseError::InvalidField {
                field: "descriptor_index",
                reason: "beyond sector capacity",
            });
        }
        let bytes = ensure_slice(sector, index * GROUP_DESC_SIZE, GROUP_DESC_SIZE)?;
        Self::parse_from_bytes(bytes)
    }

    /// Encode this descriptor over the start of `out`.
    ///
    /// Only the decoded fields (the first 18 bytes) are rewritten; the pad
    /// and reserved tail of the 32-byte record keeps whatever was there.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<(), ParseError> {
        if out.len() < GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: GROUP_DESC_SIZE,
                offset: 0,
                actual: out.len(),
            });
        }
        out[0x00..0x04].copy_from_slice(&self.block_bitmap.to_le_bytes());
        out[0x04..0x08].copy_from_slice(&self.inode_bitmap.to_le_bytes());
        out[0x08..0x0C].copy_from_slice(&self.inode_table.to_le_bytes());
        out[0x0C..0x0E].copy_from_slice(&self.free_blocks_count.to_le_bytes());
        out[0x0E..0x10].copy_from_slice(&self.free_inodes_count.to_le_bytes());
        out[0x10..0x12].copy_from_slice(&self.used_dirs_count.to_le_bytes());
        Ok(())
    }

    /// Encode this descriptor at `index` within a 512-byte sector image.
    pub fn encode_at(&self, sector: &mut [u8], index: usize) -> Result<(), ParseError> {
        if index >= GROUP_DESCS_PER_SECTOR {
            return Err(ParseError::InvalidField {
                field: "descriptor_index",
                reason: "beyond sector capacity",
            });
        }
        let offset = index * GROUP_DESC_SIZE;
        let end = offset + GROUP_DESC_SIZE;
        if sector.len() < end {
            return Err(ParseError::InsufficientData {
                needed: GROUP_DESC_SIZE,
                offset,
                actual: sector.len().saturating_sub(offset),
            });
        }
        self.encode_into(&mut sector[offset..end])
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// Decoded ext2 inode record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u16,
    /// Low 32 bits of the size; see [`Ext2Inode::size64`].
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    /// Occupied space in 512-byte sectors, not filesystem blocks.
    pub blocks: u32,
    pub flags: InodeFlags,
    pub osd1: u32,
    /// 12 direct pointers plus single/double/triple indirect roots.
    pub block: [u32; INODE_BLOCK_SLOTS],
    pub generation: u32,
    pub file_acl: u32,
    /// For regular files this slot holds the high 32 bits of the size.
    pub dir_acl: u32,
    pub faddr: u32,
}

impl Ext2Inode {
    /// Link counts above this are treated as corruption, full stop.
    pub const BOGUS_LINKS_LIMIT: u16 = 4096;
    /// Link counts above this are merely worth a second look.
    pub const SUSPICIOUS_LINKS_LIMIT: u16 = 1024;

    /// Decode an inode from its on-disk record. The base 128 bytes carry
    /// everything this toolkit reads; larger `inode_size` layouts just have
    /// trailing space we ignore.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 128 {
            return Err(ParseError::InsufficientData {
                needed: 128,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut block = [0_u32; INODE_BLOCK_SLOTS];
        for (slot, target) in block.iter_mut().enumerate() {
            *target = read_le_u32(bytes, 0x28 + slot * 4)?;
        }

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: read_le_u16(bytes, 0x02)?,
            size: read_le_u32(bytes, 0x04)?,
            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,
            gid: read_le_u16(bytes, 0x18)?,
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: InodeFlags(read_le_u32(bytes, 0x20)?),
            osd1: read_le_u32(bytes, 0x24)?,
            block,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: read_le_u32(bytes, 0x68)?,
            dir_acl: read_le_u32(bytes, 0x6C)?,
            faddr: read_le_u32(bytes, 0x70)?,
        })
    }

    #[must_use]
    pub fn file_type(&self) -> Ext2FileType {
        Ext2FileType::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Full file size. Regular files split a 64-bit size across `size`
    /// and the `dir_acl` slot; everything else uses `size` alone.
    #[must_use]
    pub fn size64(&self) -> u64 {
        if self.is_regular() {
            u64::from(self.size) | (u64::from(self.dir_acl) << 32)
        } else {
            u64::from(self.size)
        }
    }

    /// Record-level corruption check, with the reason when it trips.
    ///
    /// Deliberately blunt: it has to survive inode tables full of raw
    /// garbage, so it only flags states no live inode can reach.
    #[must_use]
    pub fn looks_bogus(&self) -> Option<&'static str> {
        if self.links_count > Self::BOGUS_LINKS_LIMIT {
            return Some("links count beyond any plausible value");
        }
        if self.mode != 0 && self.mode & S_IFMT == 0 {
            return Some("nonzero mode with an empty file-type nibble");
        }
        None
    }

    /// Plausible but worth flagging in listings.
    #[must_use]
    pub fn suspicious_links(&self) -> bool {
        self.links_count > Self::SUSPICIOUS_LINKS_LIMIT
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// One directory entry as stored on disk.
///
/// The name is kept as raw bytes; names on a damaged volume are routinely
/// not UTF-8 and the listing layer decides how to render them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2DirEntry {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
    pub name: Vec<u8>,
}

impl Ext2DirEntry {
    /// Fixed header bytes before the name.
    pub const HEADER_SIZE: usize = 8;

    /// Decode the entry starting at `offset` within a directory block.
    pub fn parse_at(block: &[u8], offset: usize) -> Result<Self, ParseError> {
        let inode = read_le_u32(block, offset)?;
        let rec_len = read_le_u16(block, offset + 4)?;
        let name_len = ensure_slice(block, offset + 6, 1)?[0];
        let file_type = ensure_slice(block, offset + 7, 1)?[0];

        if rec_len == 0 {
            return Err(ParseError::InvalidField {
                field: "rec_len",
                reason: "zero record length",
            });
        }
        let rec_len_usize = usize::from(rec_len);
        if rec_len_usize < Self::HEADER_SIZE {
            return Err(ParseError::InvalidField {
                field: "rec_len",
                reason: "shorter than the entry header",
            });
        }
        if usize::from(name_len) > rec_len_usize - Self::HEADER_SIZE {
            return Err(ParseError::InvalidField {
                field: "name_len",
                reason: "name does not fit inside the record",
            });
        }
        let end = offset
            .checked_add(rec_len_usize)
            .ok_or(ParseError::InvalidField {
                field: "rec_len",
                reason: "record offset overflow",
            })?;
        if end > block.len() {
            return Err(ParseError::InvalidField {
                field: "rec_len",
                reason: "record extends past the block end",
            });
        }

        let name = ensure_slice(block, offset + Self::HEADER_SIZE, usize::from(name_len))?.to_vec();
        Ok(Self {
            inode,
            rec_len,
            name_len,
            file_type,
            name,
        })
    }

    /// Entries with inode 0 hold no file; they pad out the block.
    #[must_use]
    pub fn is_padding(&self) -> bool {
        self.inode == 0
    }

    #[must_use]
    pub fn kind(&self) -> Ext2FileType {
        Ext2FileType::from_dir_entry(self.file_type)
    }

    /// `.` or `..`, matched on the raw name bytes.
    #[must_use]
    pub fn is_dot_entry(&self) -> bool {
        matches!(self.name.as_slice(), b"." | b"..")
    }

    /// Name rendered for display, lossily.
    #[must_use]
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Walks the entries of one directory block.
///
/// The first malformed entry is yielded as the error that describes it and
/// ends the iteration; whatever bytes follow cannot be trusted to be
/// entries at all. Padding entries (inode 0) are yielded normally so
/// callers can render them.
pub struct DirBlockIter<'a> {
    block: &'a [u8],
    offset: usize,
}

impl<'a> DirBlockIter<'a> {
    #[must_use]
    pub fn new(block: &'a [u8]) -> Self {
        Self { block, offset: 0 }
    }

    /// Byte offset the next entry would be decoded from.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for DirBlockIter<'_> {
    type Item = Result<Ext2DirEntry, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.block.len() {
            return None;
        }
        match Ext2DirEntry::parse_at(self.block, self.offset) {
            Ok(entry) => {
                self.offset += usize::from(entry.rec_len);
                Some(Ok(entry))
            }
            Err(err) => {
                self.offset = self.block.len();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn sample_superblock_sector() -> [u8; SECTOR_SIZE] {
        let mut raw = [0_u8; SECTOR_SIZE];
        put_u32(&mut raw, 0x00, 65_536); // inodes_count
        put_u32(&mut raw, 0x04, 262_144); // blocks_count
        put_u32(&mut raw, 0x08, 13_107); // reserved
        put_u32(&mut raw, 0x0C, 120_000); // free blocks
        put_u32(&mut raw, 0x10, 60_000); // free inodes
        put_u32(&mut raw, 0x14, 0); // first data block
        put_u32(&mut raw, 0x18, 2); // log block size -> 4096
        raw[0x1C..0x20].copy_from_slice(&2_i32.to_le_bytes()); // log frag size
        put_u32(&mut raw, 0x20, 32_768); // blocks per group
        put_u32(&mut raw, 0x24, 32_768); // frags per group
        put_u32(&mut raw, 0x28, 8_192); // inodes per group
        put_u32(&mut raw, 0x2C, 1_600_000_000); // mtime
        put_u32(&mut raw, 0x30, 1_600_000_100); // wtime
        put_u16(&mut raw, 0x34, 21); // mnt count
        put_u16(&mut raw, 0x36, 32); // max mnt count
        put_u16(&mut raw, 0x38, EXT2_SUPER_MAGIC);
        put_u16(&mut raw, 0x3A, 1); // state
        put_u16(&mut raw, 0x3C, 1); // errors behavior
        put_u32(&mut raw, 0x40, 1_590_000_000); // lastcheck
        put_u32(&mut raw, 0x44, 15_552_000); // checkinterval
        put_u32(&mut raw, 0x4C, 1); // rev level
        put_u32(&mut raw, 0x54, 11); // first ino
        put_u16(&mut raw, 0x58, 128); // inode size
        put_u16(&mut raw, 0x5A, 0); // block group nr
        put_u32(&mut raw, 0x5C, CompatFeatures::HAS_JOURNAL.bits());
        put_u32(&mut raw, 0x60, IncompatFeatures::FILETYPE.bits());
        put_u32(&mut raw, 0x64, RoCompatFeatures::SPARSE_SUPER.bits());
        for (i, byte) in raw[0x68..0x78].iter_mut().enumerate() {
            *byte = 0x40 + i as u8;
        }
        raw[0x78..0x7E].copy_from_slice(b"rescue");
        raw[0x88..0x94].copy_from_slice(b"/mnt/damaged");
        put_u32(&mut raw, 0xE0, 8); // journal inum
        raw
    }

    #[test]
    fn superblock_decodes_geometry_and_identity() {
        let raw = sample_superblock_sector();
        let sb = Ext2Superblock::parse_sector_region(&raw).expect("parse");

        assert_eq!(sb.inodes_count, 65_536);
        assert_eq!(sb.blocks_count, 262_144);
        assert_eq!(sb.log_block_size, 2);
        assert_eq!(sb.blocks_per_group, 32_768);
        assert_eq!(sb.inodes_per_group, 8_192);
        assert_eq!(sb.inode_size, 128);
        assert_eq!(sb.first_ino, 11);
        assert_eq!(sb.block_group_nr, 0);
        assert_eq!(sb.volume_name, "rescue");
        assert_eq!(sb.last_mounted, "/mnt/damaged");
        assert_eq!(sb.journal_inum, 8);
        assert!(sb.magic_matches());
        assert!(sb.has_sparse_super());
        assert!(sb.has_compat(CompatFeatures::HAS_JOURNAL));
        assert!(sb.has_incompat(IncompatFeatures::FILETYPE));
        assert_eq!(sb.frag_size(), Some(4096));
    }

    #[test]
    fn superblock_bad_magic_is_recorded_not_rejected() {
        let mut raw = sample_superblock_sector();
        put_u16(&mut raw, 0x38, 0xDEAD);
        let sb = Ext2Superblock::parse_sector_region(&raw).expect("parse");
        assert!(!sb.magic_matches());
        assert_eq!(sb.magic, 0xDEAD);
    }

    #[test]
    fn superblock_requires_a_whole_sector() {
        let raw = sample_superblock_sector();
        let err = Ext2Superblock::parse_sector_region(&raw[..100]).expect_err("short");
        assert!(matches!(
            err,
            ParseError::InsufficientData {
                needed: SECTOR_SIZE,
                ..
            }
        ));
    }

    #[test]
    fn superblock_rev0_normalizes_inode_layout() {
        let mut raw = sample_superblock_sector();
        put_u32(&mut raw, 0x4C, 0); // rev 0
        put_u32(&mut raw, 0x54, 0xDEAD_BEEF); // garbage in unused fields
        put_u16(&mut raw, 0x58, 0);
        let sb = Ext2Superblock::parse_sector_region(&raw).expect("parse");
        assert_eq!(sb.first_ino, 11);
        assert_eq!(sb.inode_size, 128);
    }

    #[test]
    fn negative_frag_log_shifts_down() {
        let mut raw = sample_superblock_sector();
        raw[0x1C..0x20].copy_from_slice(&(-1_i32).to_le_bytes());
        let sb = Ext2Superblock::parse_sector_region(&raw).expect("parse");
        assert_eq!(sb.frag_size(), Some(512));
    }

    #[test]
    fn feature_displays_render_known_and_unknown_bits() {
        assert_eq!(CompatFeatures(0).to_string(), "(none)");
        assert_eq!(CompatFeatures(0x4).to_string(), "HAS_JOURNAL");
        assert_eq!(
            RoCompatFeatures(0x9).to_string(),
            "SPARSE_SUPER|0x8",
            "unknown bits render as hex"
        );
        assert_eq!(
            IncompatFeatures(0x6).describe(),
            vec!["FILETYPE", "RECOVER"]
        );
        assert_eq!(RoCompatFeatures(0x8).unknown_bits(), 0x8);
    }

    #[test]
    fn inode_flag_display_follows_table_order() {
        let flags = InodeFlags(
            InodeFlags::IMMUTABLE.bits() | InodeFlags::NOATIME.bits() | 0x0001_0000,
        );
        assert_eq!(flags.to_string(), "IMMUTABLE|NOATIME|HASH_INDEXED_DIR");
        assert_eq!(InodeFlags(0x100).to_string(), "0x100");
    }

    fn sample_group_desc_sector() -> [u8; SECTOR_SIZE] {
        let mut sector = [0xAA_u8; SECTOR_SIZE];
        for index in 0..GROUP_DESCS_PER_SECTOR {
            let base = index * GROUP_DESC_SIZE;
            put_u32(&mut sector, base, 0x401 + index as u32);
            put_u32(&mut sector, base + 0x04, 0x402 + index as u32);
            put_u32(&mut sector, base + 0x08, 0x403 + index as u32);
            put_u16(&mut sector, base + 0x0C, 100);
            put_u16(&mut sector, base + 0x0E, 200);
            put_u16(&mut sector, base + 0x10, 5);
        }
        sector
    }

    #[test]
    fn group_desc_parse_at_indexes_into_the_sector() {
        let sector = sample_group_desc_sector();
        let desc = Ext2GroupDesc::parse_at(&sector, 3).expect("parse");
        assert_eq!(desc.block_bitmap, 0x404);
        assert_eq!(desc.inode_bitmap, 0x405);
        assert_eq!(desc.inode_table, 0x406);
        assert_eq!(desc.free_blocks_count, 100);
        assert_eq!(desc.used_dirs_count, 5);

        let err = Ext2GroupDesc::parse_at(&sector, GROUP_DESCS_PER_SECTOR).expect_err("index");
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "descriptor_index",
                ..
            }
        ));
    }

    #[test]
    fn group_desc_encode_preserves_reserved_tail() {
        let mut sector = sample_group_desc_sector();
        let mut desc = Ext2GroupDesc::parse_at(&sector, 2).expect("parse");
        desc.inode_table = 0x1234;
        desc.encode_at(&mut sector, 2).expect("encode");

        let reparsed = Ext2GroupDesc::parse_at(&sector, 2).expect("reparse");
        assert_eq!(reparsed.inode_table, 0x1234);
        assert_eq!(reparsed.block_bitmap, desc.block_bitmap);

        // Pad and reserved bytes of the record keep their fill.
        let base = 2 * GROUP_DESC_SIZE;
        assert!(sector[base + 0x12..base + GROUP_DESC_SIZE]
            .iter()
            .all(|&b| b == 0xAA));
        // Neighboring descriptors are untouched.
        let next = Ext2GroupDesc::parse_at(&sector, 3).expect("neighbor");
        assert_eq!(next.inode_table, 0x406);
    }

    fn sample_inode_bytes(mode: u16, links: u16) -> [u8; 128] {
        let mut raw = [0_u8; 128];
        put_u16(&mut raw, 0x00, mode);
        put_u16(&mut raw, 0x02, 1000); // uid
        put_u32(&mut raw, 0x04, 0x2000); // size
        put_u32(&mut raw, 0x08, 1_600_000_000); // atime
        put_u16(&mut raw, 0x18, 1000); // gid
        put_u16(&mut raw, 0x1A, links);
        put_u32(&mut raw, 0x1C, 16); // 512-byte sectors
        put_u32(&mut raw, 0x20, InodeFlags::NOATIME.bits());
        for slot in 0..INODE_BLOCK_SLOTS {
            put_u32(&mut raw, 0x28 + slot * 4, 0x500 + slot as u32);
        }
        put_u32(&mut raw, 0x64, 7); // generation
        put_u32(&mut raw, 0x6C, 1); // dir_acl / size high
        raw
    }

    #[test]
    fn inode_decodes_and_reconstructs_regular_file_size() {
        let raw = sample_inode_bytes(0o100_644, 1);
        let inode = Ext2Inode::parse_from_bytes(&raw).expect("parse");

        assert_eq!(inode.file_type(), Ext2FileType::Regular);
        assert!(inode.is_regular());
        assert_eq!(inode.block[0], 0x500);
        assert_eq!(inode.block[14], 0x50E);
        assert_eq!(inode.size64(), (1_u64 << 32) | 0x2000);
        assert!(inode.flags.contains(InodeFlags::NOATIME));
        assert!(inode.looks_bogus().is_none());
    }

    #[test]
    fn dir_acl_slot_only_extends_regular_files() {
        let raw = sample_inode_bytes(0o040_755, 2);
        let inode = Ext2Inode::parse_from_bytes(&raw).expect("parse");
        assert!(inode.is_directory());
        assert_eq!(inode.size64(), 0x2000, "dir_acl must not extend a directory");
    }

    #[test]
    fn bogosity_heuristic_boundaries() {
        let ok = Ext2Inode::parse_from_bytes(&sample_inode_bytes(0o100_644, 4096)).expect("parse");
        assert!(ok.looks_bogus().is_none());
        assert!(ok.suspicious_links());

        let links = Ext2Inode::parse_from_bytes(&sample_inode_bytes(0o100_644, 4097)).expect("parse");
        assert!(links.looks_bogus().expect("bogus").contains("links count"));

        let mode = Ext2Inode::parse_from_bytes(&sample_inode_bytes(0o0777, 1)).expect("parse");
        assert!(mode.looks_bogus().expect("bogus").contains("type nibble"));

        let cleared = Ext2Inode::parse_from_bytes(&sample_inode_bytes(0, 0)).expect("parse");
        assert!(cleared.looks_bogus().is_none(), "a zeroed record is just free");
    }

    #[test]
    fn inode_requires_base_record() {
        let raw = sample_inode_bytes(0o100_644, 1);
        let err = Ext2Inode::parse_from_bytes(&raw[..64]).expect_err("short");
        assert!(matches!(
            err,
            ParseError::InsufficientData { needed: 128, .. }
        ));
    }

    fn write_entry(
        block: &mut [u8],
        offset: usize,
        inode: u32,
        rec_len: u16,
        name: &[u8],
        file_type: u8,
    ) {
        put_u32(block, offset, inode);
        put_u16(block, offset + 4, rec_len);
        block[offset + 6] = u8::try_from(name.len()).expect("name length");
        block[offset + 7] = file_type;
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
    }

    fn sample_dir_block() -> Vec<u8> {
        let mut block = vec![0_u8; 128];
        write_entry(&mut block, 0, 2, 12, b".", 2);
        write_entry(&mut block, 12, 2, 12, b"..", 2);
        write_entry(&mut block, 24, 14, 20, b"notes.txt", 1);
        write_entry(&mut block, 44, 0, 84, b"", 0); // padding to the end
        block
    }

    #[test]
    fn dir_iterator_walks_entries_and_padding() {
        let block = sample_dir_block();
        let entries: Vec<Ext2DirEntry> = DirBlockIter::new(&block)
            .collect::<Result<_, _>>()
            .expect("all entries valid");

        assert_eq!(entries.len(), 4);
        assert!(entries[0].is_dot_entry());
        assert!(entries[1].is_dot_entry());
        assert_eq!(entries[2].name_lossy(), "notes.txt");
        assert_eq!(entries[2].kind(), Ext2FileType::Regular);
        assert_eq!(entries[2].inode, 14);
        assert!(entries[3].is_padding());
        assert_eq!(entries[3].rec_len, 84);
    }

    #[test]
    fn zero_rec_len_stops_the_block() {
        let mut block = sample_dir_block();
        put_u16(&mut block, 12 + 4, 0);

        let mut iter = DirBlockIter::new(&block);
        assert!(iter.next().expect("first").is_ok());
        let err = iter.next().expect("second").expect_err("zero rec_len");
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "rec_len",
                reason: "zero record length",
            }
        ));
        assert!(iter.next().is_none(), "iterator must fuse after the error");
    }

    #[test]
    fn malformed_entries_are_rejected() {
        // rec_len below the header size
        let mut block = sample_dir_block();
        put_u16(&mut block, 4, 4);
        let err = DirBlockIter::new(&block).next().expect("entry").expect_err("short rec_len");
        assert!(matches!(err, ParseError::InvalidField { field: "rec_len", .. }));

        // name_len that does not fit the record
        let mut block = sample_dir_block();
        block[24 + 6] = 200;
        let err = DirBlockIter::new(&block).nth(2).expect("entry").expect_err("name_len");
        assert!(matches!(err, ParseError::InvalidField { field: "name_len", .. }));

        // rec_len running past the block end
        let mut block = sample_dir_block();
        put_u16(&mut block, 44 + 4, 200);
        let err = DirBlockIter::new(&block).nth(3).expect("entry").expect_err("overrun");
        assert!(matches!(err, ParseError::InvalidField { field: "rec_len", .. }));
    }

    #[test]
    fn file_types_from_mode_and_dir_entry_agree() {
        assert_eq!(Ext2FileType::from_mode(0o100_644), Ext2FileType::Regular);
        assert_eq!(Ext2FileType::from_mode(0o040_755), Ext2FileType::Directory);
        assert_eq!(Ext2FileType::from_mode(0o120_777), Ext2FileType::Symlink);
        assert_eq!(Ext2FileType::from_mode(0o0644), Ext2FileType::Unknown);

        assert_eq!(Ext2FileType::from_dir_entry(1), Ext2FileType::Regular);
        assert_eq!(Ext2FileType::from_dir_entry(2), Ext2FileType::Directory);
        assert_eq!(Ext2FileType::from_dir_entry(9), Ext2FileType::Unknown);

        assert_eq!(Ext2FileType::Regular.tag(), "FIL");
        assert_eq!(Ext2FileType::Directory.tag(), "DIR");
        assert_eq!(Ext2FileType::Unknown.tag(), "???");
    }
}
