//! Inode lookup, logical-to-volume block mapping, and content streaming.

use crate::volume::Volume;
use sfs_error::{Result, SfsError};
use sfs_ondisk::Ext2Inode;
use sfs_types::{
    BlockNumber, INODE_DIRECT_SLOTS, INODE_SLOT_INDIRECT1, INODE_SLOT_INDIRECT2,
    INODE_SLOT_INDIRECT3, InodeNumber, ensure_slice, inode_index_in_group, inode_to_group,
    read_le_u32, u64_to_usize,
};

/// What a file-logical block index resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    /// A zero pointer somewhere along the chain; the range reads as zeros.
    Sparse,
    /// The content lives at this volume block.
    Mapped(BlockNumber),
}

fn class_of(pointer: u32) -> BlockClass {
    if pointer == 0 {
        BlockClass::Sparse
    } else {
        BlockClass::Mapped(BlockNumber(u64::from(pointer)))
    }
}

/// Locates inode records and walks their block-pointer chains.
pub struct InodeResolver<'v> {
    volume: &'v Volume,
}

impl<'v> InodeResolver<'v> {
    #[must_use]
    pub fn new(volume: &'v Volume) -> Self {
        Self { volume }
    }

    /// Read and decode the record for `ino` out of its group's table.
    pub fn find(&self, ino: InodeNumber) -> Result<Ext2Inode> {
        let model = self.volume.model();
        let count = model.superblock.inodes_count;
        if ino.0 == 0 || ino.0 > count {
            return Err(SfsError::NotFound(format!(
                "inode {ino} outside this volume's 1..={count}"
            )));
        }

        let per_group = model.superblock.inodes_per_group;
        let group = inode_to_group(ino, per_group);
        let desc = self.volume.load_group_desc(group)?;
        let index = inode_index_in_group(ino, per_group);
        let inodes_per_block = model.inodes_per_block();
        let table_block = u64::from(desc.inode_table) + u64::from(index / inodes_per_block);
        let record_size = usize::from(model.superblock.inode_size);
        let offset = (index % inodes_per_block) as usize * record_size;

        let mut block = self.volume.block_buffer();
        self.volume.read_block(BlockNumber(table_block), &mut block)?;
        let record = ensure_slice(&block, offset, record_size).map_err(|err| {
            SfsError::Corruption {
                block: table_block,
                detail: format!("inode {ino} record: {err}"),
            }
        })?;
        Ext2Inode::parse_from_bytes(record).map_err(|err| SfsError::Corruption {
            block: table_block,
            detail: format!("inode {ino} record: {err}"),
        })
    }

    /// Map a file-logical block index onto the volume.
    ///
    /// Four tiers: 12 direct slots, then the single, double, and triple
    /// indirect chains. A zero pointer at any level is a hole, not an
    /// error; holes are routine in both sparse files and wreckage. An
    /// index past the triple chain means the inode claims more content
    /// than the pointer structure can address.
    pub fn resolve_block(&self, inode: &Ext2Inode, logical: u64) -> Result<BlockClass> {
        let p = self.volume.model().block_size.pointers_per_block();
        let direct = INODE_DIRECT_SLOTS as u64;
        let single_end = direct + p;
        let double_end = single_end + p * p;
        let triple_end = double_end + p * p * p;

        if logical < direct {
            Ok(class_of(inode.block[logical as usize]))
        } else if logical < single_end {
            let i = logical - direct;
            self.walk_chain(inode.block[INODE_SLOT_INDIRECT1], &[i])
        } else if logical < double_end {
            let i = logical - single_end;
            self.walk_chain(inode.block[INODE_SLOT_INDIRECT2], &[i / p, i % p])
        } else if logical < triple_end {
            let i = logical - double_end;
            self.walk_chain(
                inode.block[INODE_SLOT_INDIRECT3],
                &[i / (p * p), (i % (p * p)) / p, i % p],
            )
        } else {
            Err(SfsError::Corruption {
                block: logical,
                detail: format!(
                    "logical block index beyond the triple-indirect limit of {triple_end}"
                ),
            })
        }
    }

    fn walk_chain(&self, root: u32, indices: &[u64]) -> Result<BlockClass> {
        let mut current = root;
        for &index in indices {
            if current == 0 {
                return Ok(BlockClass::Sparse);
            }
            current = self.pointer_at(BlockNumber(u64::from(current)), index)?;
        }
        Ok(class_of(current))
    }

    fn pointer_at(&self, block: BlockNumber, index: u64) -> Result<u32> {
        let mut buf = self.volume.block_buffer();
        self.volume.read_block(block, &mut buf)?;
        let offset = u64_to_usize(index * 4, "pointer_offset")
            .map_err(|err| SfsError::Parse(err.to_string()))?;
        read_le_u32(&buf, offset).map_err(|err| SfsError::Corruption {
            block: block.0,
            detail: format!("indirect pointer {index}: {err}"),
        })
    }
}

/// Sequential reader over one inode's content.
///
/// Holes transfer as zeros with no backend I/O. The current block is
/// cached so short reads do not re-walk the pointer chain.
pub struct FileStream<'v> {
    volume: &'v Volume,
    inode: Ext2Inode,
    current_block: u64,
    offset_in_block: usize,
    buffer: Vec<u8>,
    buffered: Option<u64>,
}

impl<'v> FileStream<'v> {
    /// Open `ino` for sequential reading from offset zero.
    pub fn open(volume: &'v Volume, ino: InodeNumber) -> Result<Self> {
        let inode = volume.read_inode(ino)?;
        Ok(Self::over(volume, inode))
    }

    /// Stream an already-decoded inode.
    #[must_use]
    pub fn over(volume: &'v Volume, inode: Ext2Inode) -> Self {
        let buffer = volume.block_buffer();
        Self {
            volume,
            inode,
            current_block: 0,
            offset_in_block: 0,
            buffer,
            buffered: None,
        }
    }

    #[must_use]
    pub fn inode(&self) -> &Ext2Inode {
        &self.inode
    }

    /// Content length in bytes, with the split 64-bit size reassembled
    /// for regular files.
    #[must_use]
    pub fn len_bytes(&self) -> u64 {
        self.inode.size64()
    }

    /// Read up to `out.len()` bytes. Returns 0 only at end of file.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let block_size = self.buffer.len();
        let size = self.inode.size64();
        let mut copied = 0;

        while copied < out.len() {
            let position = self
                .current_block
                .saturating_mul(block_size as u64)
                .saturating_add(self.offset_in_block as u64);
            if position >= size {
                break;
            }
            let take = (block_size - self.offset_in_block).min(out.len() - copied);
            let take = u64_to_usize((size - position).min(take as u64), "stream_span")
                .map_err(|err| SfsError::Parse(err.to_string()))?;

            self.fill_buffer()?;
            out[copied..copied + take].copy_from_slice(
                &self.buffer[self.offset_in_block..self.offset_in_block + take],
            );
            copied += take;
            self.offset_in_block += take;
            if self.offset_in_block == block_size {
                self.current_block += 1;
                self.offset_in_block = 0;
            }
        }
        Ok(copied)
    }

    fn fill_buffer(&mut self) -> Result<()> {
        if self.buffered == Some(self.current_block) {
            return Ok(());
        }
        match InodeResolver::new(self.volume).resolve_block(&self.inode, self.current_block)? {
            BlockClass::Sparse => self.buffer.fill(0),
            BlockClass::Mapped(block) => self.volume.read_block(block, &mut self.buffer)?,
        }
        self.buffered = Some(self.current_block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::{TestImage, inode_record};

    fn pointer_block(pointers: &[(usize, u32)]) -> Vec<u8> {
        let mut block = vec![0_u8; 4096];
        for &(index, pointer) in pointers {
            let base = index * 4;
            block[base..base + 4].copy_from_slice(&pointer.to_le_bytes());
        }
        block
    }

    #[test]
    fn find_decodes_a_record_from_the_table() {
        let mut image = TestImage::new(64);
        image.write_inode(12, &inode_record(0o100_644, 5000, 1, &[(0, 7), (1, 8)]));
        let volume = image.into_volume();

        let inode = volume.read_inode(InodeNumber(12)).expect("find");
        assert!(inode.is_regular());
        assert_eq!(inode.size64(), 5000);
        assert_eq!(inode.links_count, 1);
        assert_eq!(inode.block[0], 7);
        assert_eq!(inode.block[1], 8);
    }

    #[test]
    fn find_reaches_the_second_table_block() {
        let mut image = TestImage::new(64);
        image.write_inode(40, &inode_record(0o040_755, 4096, 2, &[(0, 9)]));
        let volume = image.into_volume();

        let inode = volume.read_inode(InodeNumber(40)).expect("find");
        assert!(inode.is_directory());
        assert_eq!(inode.block[0], 9);
    }

    #[test]
    fn find_rejects_out_of_range_numbers() {
        let volume = TestImage::new(64).into_volume();
        assert!(matches!(
            volume.read_inode(InodeNumber(0)),
            Err(SfsError::NotFound(_))
        ));
        assert!(matches!(
            volume.read_inode(InodeNumber(65)),
            Err(SfsError::NotFound(_))
        ));
    }

    #[test]
    fn find_packs_each_group_from_its_own_table_start() {
        // 40 inodes per group against 32 records per block: group 1 opens
        // mid-block in global numbering, yet its table packs from slot 0.
        let mut image = TestImage::new(2048);
        image.put_u32(1024 + 0x00, 80);
        image.put_u32(1024 + 0x28, 40);
        image.set_group_desc(1, 1038, 1039, 1040);
        // Inode 42 is group 1's second record: table block 1040, byte 128.
        image.patch(
            1040 * 4096 + 128,
            &inode_record(0o100_644, 1234, 1, &[(0, 77)]),
        );
        let volume = image.into_volume();

        let inode = volume.read_inode(InodeNumber(42)).expect("find");
        assert!(inode.is_regular());
        assert_eq!(inode.size64(), 1234);
        assert_eq!(inode.links_count, 1);
        assert_eq!(inode.block[0], 77);
    }

    #[test]
    fn zero_inode_is_sparse_until_the_addressing_limit() {
        let volume = TestImage::new(64).into_volume();
        let inode = Ext2Inode::parse_from_bytes(&[0_u8; 128]).expect("zero inode");
        let resolver = volume.resolver();

        // P = 1024 pointers per 4 KiB block.
        let triple_limit = 12 + 1024 + 1024 * 1024 + 1024_u64.pow(3);
        for logical in [0, 11, 12, 1035, 1036, 1_049_611, 1_049_612, triple_limit - 1] {
            assert_eq!(
                resolver.resolve_block(&inode, logical).expect("resolve"),
                BlockClass::Sparse,
                "logical {logical}"
            );
        }

        let err = resolver
            .resolve_block(&inode, triple_limit)
            .expect_err("beyond the pointer structure");
        assert!(matches!(err, SfsError::Corruption { .. }));
    }

    #[test]
    fn single_indirect_chain_resolves() {
        let mut image = TestImage::new(64);
        let mut ptrs: Vec<(usize, u32)> = (0..12).map(|slot| (slot, 20 + slot as u32)).collect();
        ptrs.push((INODE_SLOT_INDIRECT1, 9));
        image.write_inode(13, &inode_record(0o100_644, 14 * 4096, 1, &ptrs));
        image.write_block(9, &pointer_block(&[(0, 32), (1, 33)]));
        let volume = image.into_volume();

        let inode = volume.read_inode(InodeNumber(13)).expect("find");
        let resolver = volume.resolver();
        assert_eq!(
            resolver.resolve_block(&inode, 5).expect("direct"),
            BlockClass::Mapped(BlockNumber(25))
        );
        assert_eq!(
            resolver.resolve_block(&inode, 12).expect("indirect"),
            BlockClass::Mapped(BlockNumber(32))
        );
        assert_eq!(
            resolver.resolve_block(&inode, 13).expect("indirect"),
            BlockClass::Mapped(BlockNumber(33))
        );
        assert_eq!(
            resolver.resolve_block(&inode, 14).expect("hole"),
            BlockClass::Sparse,
            "unset slot in the pointer block is a hole"
        );
    }

    #[test]
    fn double_indirect_chain_resolves() {
        let mut image = TestImage::new(64);
        image.write_inode(
            14,
            &inode_record(0o100_644, 0, 1, &[(INODE_SLOT_INDIRECT2, 10)]),
        );
        image.write_block(10, &pointer_block(&[(0, 11)]));
        image.write_block(11, &pointer_block(&[(5, 40)]));
        let volume = image.into_volume();

        let inode = volume.read_inode(InodeNumber(14)).expect("find");
        let resolver = volume.resolver();
        assert_eq!(
            resolver.resolve_block(&inode, 12 + 1024 + 5).expect("deep"),
            BlockClass::Mapped(BlockNumber(40))
        );
        assert_eq!(
            resolver.resolve_block(&inode, 12 + 1024 + 6).expect("hole"),
            BlockClass::Sparse
        );
    }

    #[test]
    fn stream_serves_holes_as_zeros() {
        let mut image = TestImage::new(64);
        let size = 2 * 4096 + 100;
        image.write_inode(
            12,
            &inode_record(0o100_644, size as u64, 1, &[(0, 7), (2, 8)]),
        );
        image.write_block(7, &[0x11_u8; 4096]);
        image.write_block(8, &[0x33_u8; 4096]);
        let volume = image.into_volume();

        let mut stream = FileStream::open(&volume, InodeNumber(12)).expect("open");
        assert_eq!(stream.len_bytes(), size as u64);

        let mut content = vec![0_u8; size];
        let got = stream.read(&mut content).expect("read");
        assert_eq!(got, size);
        assert!(content[..4096].iter().all(|b| *b == 0x11));
        assert!(content[4096..8192].iter().all(|b| *b == 0), "hole is zeros");
        assert!(content[8192..].iter().all(|b| *b == 0x33));

        let mut more = [0_u8; 64];
        assert_eq!(stream.read(&mut more).expect("eof"), 0);
    }

    #[test]
    fn short_reads_assemble_the_same_bytes() {
        let mut image = TestImage::new(64);
        image.write_inode(15, &inode_record(0o100_644, 6000, 1, &[(0, 41), (1, 42)]));
        image.write_block(41, &[0xA0_u8; 4096]);
        image.write_block(42, &[0xB1_u8; 4096]);
        let volume = image.into_volume();

        let mut oneshot = vec![0_u8; 6000];
        let mut stream = FileStream::open(&volume, InodeNumber(15)).expect("open");
        assert_eq!(stream.read(&mut oneshot).expect("read"), 6000);

        let mut pieced = Vec::new();
        let mut stream = FileStream::open(&volume, InodeNumber(15)).expect("open");
        let mut chunk = [0_u8; 100];
        loop {
            let got = stream.read(&mut chunk).expect("read");
            if got == 0 {
                break;
            }
            pieced.extend_from_slice(&chunk[..got]);
        }
        assert_eq!(pieced, oneshot);
    }

    #[test]
    fn dir_acl_size_extension_ignored_for_directories() {
        let mut image = TestImage::new(64);
        // dir_acl slot populated, but a directory's size stays 32-bit.
        let mut record = inode_record(0o040_755, 4096, 2, &[(0, 7)]);
        record[0x6C..0x70].copy_from_slice(&1_u32.to_le_bytes());
        image.write_inode(12, &record);
        let volume = image.into_volume();

        let stream = FileStream::open(&volume, InodeNumber(12)).expect("open");
        assert_eq!(stream.len_bytes(), 4096);
    }
}
