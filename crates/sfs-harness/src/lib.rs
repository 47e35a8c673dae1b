#![forbid(unsafe_code)]
//! Test tooling for the salvagefs workspace.
//!
//! Three things live here, none of which ship to operators: sparse JSON
//! fixtures describing on-disk structures (see `conformance/fixtures/`),
//! a synthetic two-group volume builder small enough to write in a test
//! yet complete enough for every layer to open, walk, and repair, and a
//! scatter routine that splits a flat image into the striped member set
//! the RAID backend reassembles.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sfs_device::locate_sector;
use sfs_ondisk::{DirBlockIter, Ext2DirEntry, Ext2Inode, Ext2Superblock};
use sfs_types::{SECTOR_SIZE, SUPERBLOCK_SECTOR, SectorNumber};
use std::fs;
use std::path::Path;

// ── Sparse fixtures ─────────────────────────────────────────────────────────

/// A byte region described by its meaningful stretches only. Everything
/// not covered by a write is zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

impl SparseFixture {
    /// Materialize the full region this fixture describes.
    pub fn expand(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0_u8; self.size];
        for write in &self.writes {
            let payload = hex::decode(&write.hex)
                .with_context(|| format!("invalid hex at offset {}", write.offset))?;

            let end = write
                .offset
                .checked_add(payload.len())
                .context("fixture offset overflow")?;
            if end > bytes.len() {
                bail!(
                    "fixture write out of bounds: offset={} payload={} size={}",
                    write.offset,
                    payload.len(),
                    bytes.len()
                );
            }

            bytes[write.offset..end].copy_from_slice(&payload);
        }
        Ok(bytes)
    }
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    fixture.expand()
}

/// Describe `region` by its nonzero runs. Zero gaps shorter than eight
/// bytes stay inside a run so adjacent fields don't shatter into dozens
/// of two-byte writes.
#[must_use]
pub fn sparse_from_region(region: &[u8]) -> SparseFixture {
    const MERGE_GAP: usize = 8;

    let mut writes = Vec::new();
    let mut index = 0;
    while index < region.len() {
        if region[index] == 0 {
            index += 1;
            continue;
        }
        let start = index;
        let mut last_nonzero = index;
        while index < region.len() && index - last_nonzero < MERGE_GAP {
            if region[index] != 0 {
                last_nonzero = index;
            }
            index += 1;
        }
        writes.push(FixtureWrite {
            offset: start,
            hex: hex::encode(&region[start..=last_nonzero]),
        });
    }

    SparseFixture {
        size: region.len(),
        writes,
    }
}

/// Cut `len` bytes starting at `offset` out of an image as a fixture
/// rooted at the region's own offset zero.
pub fn extract_region(image: &[u8], offset: usize, len: usize) -> Result<SparseFixture> {
    let end = offset.checked_add(len).context("region end overflows")?;
    if end > image.len() {
        bail!(
            "region {offset}+{len} extends past the {}-byte image",
            image.len()
        );
    }
    Ok(sparse_from_region(&image[offset..end]))
}

/// Extract the primary superblock sector as a fixture. The extracted
/// bytes must decode, which catches pointing this at the wrong image.
pub fn extract_superblock(image: &[u8]) -> Result<SparseFixture> {
    let offset = SUPERBLOCK_SECTOR as usize * SECTOR_SIZE;
    let fixture = extract_region(image, offset, SECTOR_SIZE)?;
    let expanded = fixture.expand()?;
    Ext2Superblock::parse_sector_region(&expanded)
        .context("extracted region does not decode as a superblock")?;
    Ok(fixture)
}

pub fn validate_superblock_fixture(path: &Path) -> Result<Ext2Superblock> {
    let data = load_sparse_fixture(path)?;
    Ext2Superblock::parse_sector_region(&data)
        .with_context(|| format!("failed superblock parse for fixture {}", path.display()))
}

pub fn validate_inode_fixture(path: &Path) -> Result<Ext2Inode> {
    let data = load_sparse_fixture(path)?;
    Ext2Inode::parse_from_bytes(&data)
        .with_context(|| format!("failed inode parse for fixture {}", path.display()))
}

pub fn validate_dir_block_fixture(path: &Path) -> Result<Vec<Ext2DirEntry>> {
    let data = load_sparse_fixture(path)?;
    let mut entries = Vec::new();
    for entry in DirBlockIter::new(&data) {
        entries
            .push(entry.with_context(|| format!("malformed entry in fixture {}", path.display()))?);
    }
    Ok(entries)
}

// ── Synthetic volume images ─────────────────────────────────────────────────

/// Builds a complete two-group volume image in memory.
///
/// The geometry is fixed: 4 KiB blocks, two full groups, metadata at the
/// positions the superblock arithmetic derives. [`ImageBuilder::two_groups`]
/// plants a root directory holding one file and one subdirectory, so the
/// resulting image exercises every read path; the mutators then let a test
/// damage exactly the bytes its scenario needs.
///
/// Mutator arguments are contracts, not input validation: a group, inode,
/// or block outside the image is a bug in the test and panics.
pub struct ImageBuilder {
    bytes: Vec<u8>,
}

impl ImageBuilder {
    pub const BLOCK_SIZE: usize = 4096;
    pub const BLOCKS_PER_GROUP: u32 = 2048;
    pub const INODES_PER_GROUP: u32 = 512;
    pub const GROUPS: u32 = 2;
    /// Per-group block bitmap positions; the inode bitmap and table
    /// follow at +1 and +2.
    pub const GROUP_METADATA: [u32; 2] = [1025, 3073];

    pub const ROOT_DIR_BLOCK: u32 = 1100;
    pub const HELLO_INO: u32 = 12;
    pub const HELLO_BLOCK: u32 = 1101;
    pub const HELLO_CONTENT: &'static [u8] = b"recovered from the array\n";
    pub const LOGS_INO: u32 = 13;
    pub const LOGS_DIR_BLOCK: u32 = 1102;
    pub const TRACE_INO: u32 = 14;
    pub const TRACE_BLOCK: u32 = 1103;
    pub const TRACE_CONTENT: &'static [u8] = b"panic at 03:14 rebuilding stripe 7\n";

    /// The standard image: superblock, clean descriptors, and a small
    /// directory tree rooted at inode 2.
    #[must_use]
    pub fn two_groups() -> Self {
        let total =
            Self::GROUPS as usize * Self::BLOCKS_PER_GROUP as usize * Self::BLOCK_SIZE;
        let mut builder = Self {
            bytes: vec![0_u8; total],
        };
        builder.write_superblock();
        for group in 0..Self::GROUPS {
            let bitmap = Self::GROUP_METADATA[group as usize];
            builder.set_descriptor(group, bitmap, bitmap + 1, bitmap + 2);
        }

        builder.write_inode(
            2,
            &inode_record(
                0o040_755,
                Self::BLOCK_SIZE as u64,
                3,
                &[(0, Self::ROOT_DIR_BLOCK)],
            ),
        );
        builder.write_block(
            Self::ROOT_DIR_BLOCK,
            &dir_block(
                Self::BLOCK_SIZE,
                &[
                    (2, b".", 2),
                    (2, b"..", 2),
                    (Self::HELLO_INO, b"hello.txt", 1),
                    (Self::LOGS_INO, b"logs", 2),
                ],
            ),
        );
        builder.write_inode(
            Self::HELLO_INO,
            &inode_record(
                0o100_644,
                Self::HELLO_CONTENT.len() as u64,
                1,
                &[(0, Self::HELLO_BLOCK)],
            ),
        );
        builder.write_block(Self::HELLO_BLOCK, Self::HELLO_CONTENT);

        builder.write_inode(
            Self::LOGS_INO,
            &inode_record(
                0o040_755,
                Self::BLOCK_SIZE as u64,
                2,
                &[(0, Self::LOGS_DIR_BLOCK)],
            ),
        );
        builder.write_block(
            Self::LOGS_DIR_BLOCK,
            &dir_block(
                Self::BLOCK_SIZE,
                &[
                    (Self::LOGS_INO, b".", 2),
                    (2, b"..", 2),
                    (Self::TRACE_INO, b"trace.log", 1),
                ],
            ),
        );
        builder.write_inode(
            Self::TRACE_INO,
            &inode_record(
                0o100_600,
                Self::TRACE_CONTENT.len() as u64,
                1,
                &[(0, Self::TRACE_BLOCK)],
            ),
        );
        builder.write_block(Self::TRACE_BLOCK, Self::TRACE_CONTENT);

        builder
    }

    /// Point `group`'s descriptor at the given metadata blocks.
    pub fn set_descriptor(
        &mut self,
        group: u32,
        block_bitmap: u32,
        inode_bitmap: u32,
        inode_table: u32,
    ) {
        assert!(group < Self::GROUPS, "group {group} outside the image");
        let offset = Self::BLOCK_SIZE + group as usize * 32;
        self.put_u32(offset, block_bitmap);
        self.put_u32(offset + 0x04, inode_bitmap);
        self.put_u32(offset + 0x08, inode_table);
        self.put_u16(offset + 0x0C, 1500);
        self.put_u16(offset + 0x0E, 400);
        self.put_u16(offset + 0x10, 2);
    }

    /// Write a 128-byte record into the inode table that owns `ino`.
    ///
    /// Records land at the standard table positions regardless of where
    /// the descriptors currently point, which is exactly what a
    /// misdirected-pointer scenario needs.
    pub fn write_inode(&mut self, ino: u32, record: &[u8; 128]) {
        assert!(
            ino >= 1 && ino <= Self::GROUPS * Self::INODES_PER_GROUP,
            "inode {ino} outside the image"
        );
        let index = ino - 1;
        let group = index / Self::INODES_PER_GROUP;
        let slot = (index % Self::INODES_PER_GROUP) as usize;
        let table = Self::GROUP_METADATA[group as usize] + 2;
        let offset = table as usize * Self::BLOCK_SIZE + slot * 128;
        self.bytes[offset..offset + 128].copy_from_slice(record);
    }

    /// Write `payload` at the start of `block`.
    pub fn write_block(&mut self, block: u32, payload: &[u8]) {
        assert!(
            block < Self::GROUPS * Self::BLOCKS_PER_GROUP,
            "block {block} outside the image"
        );
        assert!(payload.len() <= Self::BLOCK_SIZE, "payload spans blocks");
        let offset = block as usize * Self::BLOCK_SIZE;
        self.bytes[offset..offset + payload.len()].copy_from_slice(payload);
    }

    /// Raw byte patch, for damage no structured mutator models.
    pub fn patch(&mut self, offset: usize, payload: &[u8]) {
        self.bytes[offset..offset + payload.len()].copy_from_slice(payload);
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    fn write_superblock(&mut self) {
        let sb = SUPERBLOCK_SECTOR as usize * SECTOR_SIZE;
        self.put_u32(sb, Self::GROUPS * Self::INODES_PER_GROUP);
        self.put_u32(sb + 0x04, Self::GROUPS * Self::BLOCKS_PER_GROUP);
        self.put_u32(sb + 0x08, 204);
        self.put_u32(sb + 0x0C, 3000);
        self.put_u32(sb + 0x10, 1000);
        self.put_u32(sb + 0x18, 2);
        self.put_u32(sb + 0x1C, 2);
        self.put_u32(sb + 0x20, Self::BLOCKS_PER_GROUP);
        self.put_u32(sb + 0x24, Self::BLOCKS_PER_GROUP);
        self.put_u32(sb + 0x28, Self::INODES_PER_GROUP);
        self.put_u16(sb + 0x34, 3);
        self.put_u16(sb + 0x36, 32);
        self.put_u16(sb + 0x38, 0xEF53);
        self.put_u16(sb + 0x3A, 1);
        self.put_u16(sb + 0x3C, 1);
        self.put_u32(sb + 0x4C, 1);
        self.put_u32(sb + 0x54, 11);
        self.put_u16(sb + 0x58, 128);
        self.put_u32(sb + 0x60, 0x2);
        self.put_u32(sb + 0x64, 0x1);
        self.patch(
            sb + 0x68,
            &[
                0xD1, 0x5C, 0x0F, 0x42, 0x9A, 0x31, 0x4B, 0x8E, 0xB6, 0x20, 0x77, 0xC3, 0x04,
                0xED, 0x59, 0xAF,
            ],
        );
        self.patch(sb + 0x78, b"salvage-e2e");
        self.patch(sb + 0x88, b"/mnt/recovered");
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Build a 128-byte inode record. `pointers` fills chosen block slots;
/// everything unnamed stays zero.
#[must_use]
pub fn inode_record(mode: u16, size: u64, links: u16, pointers: &[(usize, u32)]) -> [u8; 128] {
    let mut record = [0_u8; 128];
    record[0x00..0x02].copy_from_slice(&mode.to_le_bytes());
    record[0x04..0x08].copy_from_slice(&(size as u32).to_le_bytes());
    record[0x1A..0x1C].copy_from_slice(&links.to_le_bytes());
    let sectors = size.div_ceil(SECTOR_SIZE as u64) as u32;
    record[0x1C..0x20].copy_from_slice(&sectors.to_le_bytes());
    for &(slot, block) in pointers {
        assert!(slot < 15, "inode block slot {slot} out of range");
        let at = 0x28 + slot * 4;
        record[at..at + 4].copy_from_slice(&block.to_le_bytes());
    }
    record
}

/// Build one directory block: the given `(inode, name, file_type)` entries
/// followed by a padding record absorbing the rest of `size`.
#[must_use]
pub fn dir_block(size: usize, entries: &[(u32, &[u8], u8)]) -> Vec<u8> {
    let mut block = vec![0_u8; size];
    let mut offset = 0;
    for &(inode, name, file_type) in entries {
        assert!(name.len() <= 255, "directory name too long");
        let rec_len = (Ext2DirEntry::HEADER_SIZE + name.len()).next_multiple_of(4);
        assert!(offset + rec_len <= size, "entries overflow the block");
        block[offset..offset + 4].copy_from_slice(&inode.to_le_bytes());
        block[offset + 4..offset + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
        block[offset + 6] = name.len() as u8;
        block[offset + 7] = file_type;
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
        offset += rec_len;
    }
    let remaining = size - offset;
    assert!(
        remaining == 0 || remaining >= Ext2DirEntry::HEADER_SIZE,
        "no room left for the padding record"
    );
    if remaining > 0 {
        block[offset + 4..offset + 6].copy_from_slice(&(remaining as u16).to_le_bytes());
    }
    block
}

// ── RAID member scattering ──────────────────────────────────────────────────

/// Scatter a flat volume image into the three member images the RAID
/// backend reassembles, placing each logical sector at the member position
/// the left-symmetric math derives. Parity chunks stay zeroed; the backend
/// never serves data from them.
pub fn scatter_into_members(image: &[u8]) -> Result<[Vec<u8>; 3]> {
    if image.len() % SECTOR_SIZE != 0 {
        bail!("image length {} is not sector-aligned", image.len());
    }
    let sectors = (image.len() / SECTOR_SIZE) as u64;

    let mut highest = SectorNumber(0);
    for logical in 0..sectors {
        let location = locate_sector(SectorNumber(logical))
            .with_context(|| format!("logical sector {logical} overflows RAID addressing"))?;
        highest = highest.max(location.member_sector);
    }

    let member_len = (highest.0 as usize + 1) * SECTOR_SIZE;
    let mut members = [
        vec![0_u8; member_len],
        vec![0_u8; member_len],
        vec![0_u8; member_len],
    ];
    for logical in 0..sectors {
        let location = locate_sector(SectorNumber(logical))
            .with_context(|| format!("logical sector {logical} overflows RAID addressing"))?;
        let src = logical as usize * SECTOR_SIZE;
        let dst = location.member_sector.0 as usize * SECTOR_SIZE;
        members[location.disk][dst..dst + SECTOR_SIZE]
            .copy_from_slice(&image[src..src + SECTOR_SIZE]);
    }

    Ok(members)
}
