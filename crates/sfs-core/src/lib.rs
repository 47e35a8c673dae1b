//! Volume sessions over damaged ext2 images.
//!
//! A [`Volume`] binds a sector backend, a copy-on-write overlay, and a
//! decoded superblock into one read path: every sector consults the
//! overlay first, so staged repairs are visible to all higher layers
//! without touching the backing image. On top of that sit the geometry
//! model, inode resolution, file streaming, directory walks, and inode
//! table scans.

#![forbid(unsafe_code)]

pub mod addr;
pub mod dir;
pub mod file;
pub mod itable;
pub mod model;
pub mod volume;

#[cfg(test)]
pub(crate) mod testimg;

pub use addr::DiskAddressSpace;
pub use dir::{DEFAULT_MAX_DEPTH, DirListing, DirWalkOptions, ListingRow, list_directory};
pub use file::{BlockClass, FileStream, InodeResolver};
pub use itable::{BlockTally, ItableScanReport, load_inode_table, scan_inode_table};
pub use model::{RESERVED_GROUP_BLOCKS, SuperblockModel};
pub use volume::{OpenOptions, Volume};
