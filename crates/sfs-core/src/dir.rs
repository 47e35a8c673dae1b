//! Directory listing with bounded recursive descent.
//!
//! Directory blocks on a damaged volume routinely contain cycles, records
//! that point back up the tree, and blocks that degenerate into garbage
//! partway through. The walk here contains all of that: corruption inside
//! one block abandons that block only, a subdirectory that cannot be
//! walked is skipped with a tally, and recursion is capped so a cycle
//! terminates instead of recursing forever.

use crate::file::FileStream;
use crate::volume::Volume;
use serde::Serialize;
use sfs_error::{Result, SfsError};
use sfs_ondisk::{DirBlockIter, Ext2FileType};
use sfs_types::InodeNumber;

/// Recursion ceiling when no explicit cap is given.
pub const DEFAULT_MAX_DEPTH: u32 = 64;

/// Controls for [`list_directory`].
#[derive(Debug, Clone, Copy)]
pub struct DirWalkOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Cap on listed levels. The start directory is depth 0 and rows
    /// never reach this depth, so a cycle bottoms out.
    pub max_depth: u32,
}

impl Default for DirWalkOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// One directory record, annotated with where the walk found it.
#[derive(Debug, Clone, Serialize)]
pub struct ListingRow {
    pub parent: InodeNumber,
    pub depth: u32,
    pub inode: u32,
    pub kind: Ext2FileType,
    pub rec_len: u16,
    pub name: String,
    /// Unused record (inode 0) holding space at the end of a block.
    pub is_padding: bool,
}

/// Everything a walk produced, including damage tallies.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirListing {
    pub rows: Vec<ListingRow>,
    /// Blocks abandoned partway through on a malformed record.
    pub corrupt_blocks: u32,
    /// Subdirectories whose own walk failed and was skipped.
    pub skipped_subdirs: u32,
}

/// List `ino`, optionally descending into subdirectories.
///
/// An error from the start directory itself propagates; trouble below it
/// is contained and tallied on the listing.
pub fn list_directory(
    volume: &Volume,
    ino: InodeNumber,
    options: DirWalkOptions,
) -> Result<DirListing> {
    let mut listing = DirListing::default();
    walk_one(volume, ino, 0, options, &mut listing)?;
    Ok(listing)
}

fn walk_one(
    volume: &Volume,
    ino: InodeNumber,
    depth: u32,
    options: DirWalkOptions,
    listing: &mut DirListing,
) -> Result<()> {
    let inode = volume.read_inode(ino)?;
    if !inode.is_directory() {
        return Err(SfsError::Format(format!(
            "inode {ino} is {}, not a directory",
            inode.file_type()
        )));
    }

    let mut subdirs = Vec::new();
    let mut stream = FileStream::over(volume, inode);
    let mut block = volume.block_buffer();
    loop {
        let got = stream.read(&mut block)?;
        if got == 0 {
            break;
        }
        for parsed in DirBlockIter::new(&block[..got]) {
            match parsed {
                Ok(entry) => {
                    // Only a live, non-dot, directory-typed record is a
                    // candidate for descent; everything is still listed.
                    if options.recursive
                        && entry.inode != 0
                        && !entry.is_dot_entry()
                        && entry.kind() == Ext2FileType::Directory
                    {
                        subdirs.push(InodeNumber(entry.inode));
                    }
                    listing.rows.push(ListingRow {
                        parent: ino,
                        depth,
                        inode: entry.inode,
                        kind: entry.kind(),
                        rec_len: entry.rec_len,
                        name: entry.name_lossy(),
                        is_padding: entry.is_padding(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        target: "sfs::core",
                        inode = ino.0,
                        depth,
                        error = %err,
                        "directory_block_corrupt"
                    );
                    listing.corrupt_blocks += 1;
                    break;
                }
            }
        }
    }

    if depth + 1 < options.max_depth {
        for child in subdirs {
            if let Err(err) = walk_one(volume, child, depth + 1, options, listing) {
                tracing::warn!(
                    target: "sfs::core",
                    inode = child.0,
                    error = %err,
                    "subdirectory_walk_skipped"
                );
                listing.skipped_subdirs += 1;
            }
        }
    }
    Ok(())
}
