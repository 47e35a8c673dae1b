#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate, no I/O and no side effects. Decodes byte slices into
//! typed structures for the ext2 superblock, block-group descriptors, inode
//! records, and directory entry blocks, plus feature/flag bitset formatting.
//! Everything is bounds-checked; nothing here trusts a damaged volume.

pub mod ext2;

pub use ext2::{
    CompatFeatures, DirBlockIter, Ext2DirEntry, Ext2FileType, Ext2GroupDesc, Ext2Inode,
    Ext2Superblock, GROUP_DESC_SIZE, GROUP_DESCS_PER_SECTOR, IncompatFeatures, InodeFlags,
    RoCompatFeatures,
};
