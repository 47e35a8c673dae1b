//! Synthetic in-memory volumes for this crate's tests.
//!
//! Geometry is fixed small: 4 KiB blocks, 1024 blocks and 64 inodes per
//! group, group 0 metadata at blocks 3/4/5 (the inode table spans blocks
//! 5 and 6). Tests write whatever metadata and data blocks they need and
//! wrap the bytes in a [`MockBackend`].

use crate::volume::{OpenOptions, Volume};
use sfs_device::{DiskBackend, SectorBuf};
use sfs_error::{Result, SfsError};
use sfs_types::{EXT2_SUPER_MAGIC, SECTOR_SIZE, SectorNumber};
use std::sync::{Arc, Mutex};

pub(crate) const TEST_BLOCK_SIZE: usize = 4096;
pub(crate) const TEST_BLOCKS_PER_GROUP: u32 = 1024;
pub(crate) const TEST_INODES_PER_GROUP: u32 = 64;
pub(crate) const GROUP0_INODE_TABLE: u32 = 5;
/// First block after group 0's two inode-table blocks.
pub(crate) const FIRST_FREE_BLOCK: u32 = 7;

/// Backend over an in-memory image that logs the sectors it served and
/// can inject one failing sector.
#[derive(Debug)]
pub(crate) struct MockBackend {
    data: Vec<u8>,
    reads: Arc<Mutex<Vec<u64>>>,
    pub fail_at: Option<u64>,
}

impl MockBackend {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: Arc::new(Mutex::new(Vec::new())),
            fail_at: None,
        }
    }

    /// Shared handle to the read log; survives boxing the backend.
    pub(crate) fn read_log(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.reads)
    }
}

impl DiskBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn read_sector(&self, sector: SectorNumber, buf: &mut SectorBuf) -> Result<()> {
        self.reads.lock().expect("read log").push(sector.0);
        if self.fail_at == Some(sector.0) {
            return Err(SfsError::Io(std::io::Error::other("injected fault")));
        }
        let start = usize::try_from(sector.0).expect("sector index") * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(SfsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past image end",
            )));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn mark_unreadable(&mut self, _sector: SectorNumber) -> Result<()> {
        Err(SfsError::MarkUnsupported("mock backend".to_owned()))
    }
}

/// Image whose sector N is filled with the byte N, for addressing tests.
pub(crate) fn patterned_image(sectors: usize) -> Vec<u8> {
    let mut data = vec![0_u8; sectors * SECTOR_SIZE];
    for (index, chunk) in data.chunks_exact_mut(SECTOR_SIZE).enumerate() {
        chunk.fill(index as u8);
    }
    data
}

/// A buildable volume image with the fixed test geometry.
pub(crate) struct TestImage {
    pub data: Vec<u8>,
}

impl TestImage {
    /// Zeroed image of `blocks_count` blocks with a valid superblock at
    /// sector 2 and group 0's descriptor at block 1.
    pub(crate) fn new(blocks_count: u32) -> Self {
        let mut image = Self {
            data: vec![0_u8; blocks_count as usize * TEST_BLOCK_SIZE],
        };
        let groups = blocks_count.div_ceil(TEST_BLOCKS_PER_GROUP);

        let sb = 1024;
        image.put_u32(sb + 0x00, TEST_INODES_PER_GROUP * groups);
        image.put_u32(sb + 0x04, blocks_count);
        image.put_u32(sb + 0x18, 2); // log_block_size -> 4096
        image.put_u32(sb + 0x20, TEST_BLOCKS_PER_GROUP);
        image.put_u32(sb + 0x24, TEST_BLOCKS_PER_GROUP);
        image.put_u32(sb + 0x28, TEST_INODES_PER_GROUP);
        image.put_u16(sb + 0x38, EXT2_SUPER_MAGIC);
        image.put_u16(sb + 0x3A, 1); // state: clean
        image.put_u32(sb + 0x4C, 1); // rev level
        image.put_u32(sb + 0x54, 11); // first ino
        image.put_u16(sb + 0x58, 128); // inode size
        image.put_u32(sb + 0x60, 0x2); // incompat: FILETYPE
        image.put_u32(sb + 0x64, 0x1); // ro_compat: SPARSE_SUPER

        image.set_group_desc(0, 3, 4, GROUP0_INODE_TABLE);
        image
    }

    pub(crate) fn put_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn put_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Write `group`'s descriptor into the table at block 1.
    pub(crate) fn set_group_desc(
        &mut self,
        group: u32,
        block_bitmap: u32,
        inode_bitmap: u32,
        inode_table: u32,
    ) {
        let base = TEST_BLOCK_SIZE + group as usize * 32;
        self.put_u32(base, block_bitmap);
        self.put_u32(base + 0x04, inode_bitmap);
        self.put_u32(base + 0x08, inode_table);
    }

    pub(crate) fn write_block(&mut self, block: u32, bytes: &[u8]) {
        let base = block as usize * TEST_BLOCK_SIZE;
        self.data[base..base + bytes.len()].copy_from_slice(bytes);
    }

    /// Place an inode record in group 0's table. `ino` is the global
    /// 1-based number and must stay within the first group.
    pub(crate) fn write_inode(&mut self, ino: u32, record: &[u8; 128]) {
        assert!(ino >= 1 && ino <= TEST_INODES_PER_GROUP, "ino {ino}");
        let base =
            GROUP0_INODE_TABLE as usize * TEST_BLOCK_SIZE + (ino as usize - 1) * 128;
        self.data[base..base + 128].copy_from_slice(record);
    }

    pub(crate) fn into_backend(self) -> MockBackend {
        MockBackend::new(self.data)
    }

    pub(crate) fn into_volume(self) -> Volume {
        Volume::from_backend(Box::new(self.into_backend()), &OpenOptions::default())
            .expect("open test volume")
    }

    pub(crate) fn into_volume_with(self, options: &OpenOptions) -> Volume {
        Volume::from_backend(Box::new(self.into_backend()), options).expect("open test volume")
    }
}

/// Minimal inode record: mode, split 64-bit size, link count, and chosen
/// block-pointer slots.
pub(crate) fn inode_record(mode: u16, size: u64, links: u16, ptrs: &[(usize, u32)]) -> [u8; 128] {
    let mut raw = [0_u8; 128];
    raw[0x00..0x02].copy_from_slice(&mode.to_le_bytes());
    raw[0x04..0x08].copy_from_slice(&((size & 0xFFFF_FFFF) as u32).to_le_bytes());
    raw[0x1A..0x1C].copy_from_slice(&links.to_le_bytes());
    raw[0x6C..0x70].copy_from_slice(&((size >> 32) as u32).to_le_bytes());
    for &(slot, ptr) in ptrs {
        let base = 0x28 + slot * 4;
        raw[base..base + 4].copy_from_slice(&ptr.to_le_bytes());
    }
    raw
}

/// Build one directory block from `(inode, name, file_type)` triples; the
/// final entry's record absorbs the rest of the block.
pub(crate) fn dir_block(entries: &[(u32, &[u8], u8)]) -> Vec<u8> {
    let mut block = vec![0_u8; TEST_BLOCK_SIZE];
    let mut offset = 0;
    for (position, &(ino, name, file_type)) in entries.iter().enumerate() {
        let body = 8 + name.len();
        let rec_len = if position + 1 == entries.len() {
            TEST_BLOCK_SIZE - offset
        } else {
            (body + 3) & !3
        };
        assert!(rec_len >= body && offset + rec_len <= TEST_BLOCK_SIZE);
        block[offset..offset + 4].copy_from_slice(&ino.to_le_bytes());
        block[offset + 4..offset + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
        block[offset + 6] = name.len() as u8;
        block[offset + 7] = file_type;
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
        offset += rec_len;
    }
    block
}
