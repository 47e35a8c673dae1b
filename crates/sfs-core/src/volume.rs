//! Volume sessions.
//!
//! A [`Volume`] binds one backend, one overlay, and the superblock model
//! read at open. All metadata loads go through the overlay-first address
//! space, so staged repairs are visible to every later operation in the
//! session.

use crate::addr::DiskAddressSpace;
use crate::file::InodeResolver;
use crate::model::SuperblockModel;
use sfs_device::{DiskBackend, open_backend};
use sfs_error::{Result, SfsError};
use sfs_ondisk::{Ext2GroupDesc, Ext2Inode, Ext2Superblock};
use sfs_types::{
    BlockNumber, GroupNumber, InodeNumber, SECTOR_SIZE, SUPERBLOCK_SECTOR, SectorNumber,
};
use std::path::PathBuf;

/// Session configuration. There are no config files; this plus the
/// backend descriptor string is the whole surface.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Sector the superblock is read from. The default is the primary
    /// copy; point it at a backup copy when the primary is gone.
    pub superblock_sector: SectorNumber,
    /// Sidecar imported at open and exported at close. Import failures
    /// are non-fatal; the session starts with an empty overlay instead.
    pub overlay_path: Option<PathBuf>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            superblock_sector: SectorNumber(SUPERBLOCK_SECTOR),
            overlay_path: None,
        }
    }
}

/// An opened volume session.
pub struct Volume {
    disk: DiskAddressSpace,
    model: SuperblockModel,
    options: OpenOptions,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("backend", &self.disk.backend_name())
            .field("block_size", &self.model.block_size)
            .field("groups", &self.model.groups_count)
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Open the backend named by `descriptor` with default options.
    pub fn open(descriptor: &str) -> Result<Self> {
        Self::open_with_options(descriptor, &OpenOptions::default())
    }

    /// Open the backend named by `descriptor`.
    pub fn open_with_options(descriptor: &str, options: &OpenOptions) -> Result<Self> {
        let backend = open_backend(descriptor)?;
        Self::from_backend(backend, options)
    }

    /// Build a session over an already-opened backend.
    pub fn from_backend(backend: Box<dyn DiskBackend>, options: &OpenOptions) -> Result<Self> {
        let mut disk = DiskAddressSpace::new(backend);

        if let Some(path) = &options.overlay_path {
            match disk.overlay_mut().import_from(path) {
                Ok(summary) => tracing::info!(
                    target: "sfs::core",
                    path = %path.display(),
                    sectors = summary.sectors,
                    "session_sidecar_imported"
                ),
                Err(err) => tracing::warn!(
                    target: "sfs::core",
                    path = %path.display(),
                    error = %err,
                    "session_sidecar_import_failed"
                ),
            }
        }

        let mut sector = [0_u8; SECTOR_SIZE];
        disk.read_sector(options.superblock_sector, &mut sector)?;
        let superblock = Ext2Superblock::parse_sector_region(&sector).map_err(|err| {
            SfsError::Format(format!(
                "superblock at sector {}: {err}",
                options.superblock_sector
            ))
        })?;
        if !superblock.magic_matches() {
            tracing::warn!(
                target: "sfs::core",
                magic = superblock.magic,
                sector = options.superblock_sector.0,
                "superblock_magic_mismatch"
            );
        }

        let model = SuperblockModel::from_superblock(superblock)?;
        tracing::info!(
            target: "sfs::core",
            backend = disk.backend_name(),
            block_size = model.block_size.get(),
            groups = model.groups_count,
            degraded = model.degraded_geometry,
            "volume_opened"
        );

        Ok(Self {
            disk,
            model,
            options: options.clone(),
        })
    }

    #[must_use]
    pub fn model(&self) -> &SuperblockModel {
        &self.model
    }

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.model.superblock
    }

    #[must_use]
    pub fn disk(&self) -> &DiskAddressSpace {
        &self.disk
    }

    #[must_use]
    pub fn disk_mut(&mut self) -> &mut DiskAddressSpace {
        &mut self.disk
    }

    #[must_use]
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    #[must_use]
    pub fn resolver(&self) -> InodeResolver<'_> {
        InodeResolver::new(self)
    }

    /// Read and decode one inode record.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Ext2Inode> {
        self.resolver().find(ino)
    }

    /// Read one filesystem block; `buf` must be one block long.
    pub fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        self.disk.read_block(block, buf)
    }

    /// A zeroed buffer of exactly one block.
    #[must_use]
    pub fn block_buffer(&self) -> Vec<u8> {
        vec![0_u8; self.model.block_size.as_usize()]
    }

    /// Load `group`'s descriptor through the session address space, so
    /// staged repairs are what later loads observe.
    pub fn load_group_desc(&self, group: GroupNumber) -> Result<Ext2GroupDesc> {
        if group.0 >= self.model.groups_count {
            return Err(SfsError::NotFound(format!(
                "group {group} beyond the volume's {} groups",
                self.model.groups_count
            )));
        }
        let (sector, index) = self.model.descriptor_location(group)?;
        let mut buf = [0_u8; SECTOR_SIZE];
        self.disk.read_sector(sector, &mut buf)?;
        Ext2GroupDesc::parse_at(&buf, index).map_err(|err| SfsError::Parse(err.to_string()))
    }

    /// Close the session: log what was staged and export the sidecar when
    /// one was configured. Unexported changes die with the session, which
    /// is exactly the contract; dropping a `Volume` exports nothing.
    pub fn close(self) -> Result<()> {
        let summary = self.disk.overlay().summary();
        if summary.sectors > 0 {
            tracing::info!(
                target: "sfs::core",
                sectors = summary.sectors,
                staged_bytes = summary.payload_bytes,
                "session_overlay_summary"
            );
        }
        if let Some(path) = &self.options.overlay_path {
            let exported = self.disk.overlay().export_to(path)?;
            tracing::info!(
                target: "sfs::core",
                path = %path.display(),
                sectors = exported.sectors,
                "session_sidecar_exported"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::TestImage;

    #[test]
    fn open_reads_the_superblock_and_derives_geometry() {
        let volume = TestImage::new(64).into_volume();

        assert_eq!(volume.model().block_size.get(), 4096);
        assert_eq!(volume.model().groups_count, 1);
        assert!(!volume.model().degraded_geometry);
        assert!(volume.superblock().magic_matches());
        assert_eq!(volume.superblock().inodes_per_group, 64);
    }

    #[test]
    fn open_survives_a_bad_magic() {
        let mut image = TestImage::new(64);
        image.patch(1024 + 0x38, &0xBEEF_u16.to_le_bytes());
        let volume = image.into_volume();
        assert!(!volume.superblock().magic_matches());
    }

    #[test]
    fn superblock_sector_override_is_honored() {
        // Plant the only valid superblock at sector 4 instead of 2.
        let mut image = TestImage::new(64);
        let copy: Vec<u8> = image.data[1024..1536].to_vec();
        image.patch(1024, &[0_u8; 512]);
        image.patch(4 * 512, &copy);

        let options = OpenOptions {
            superblock_sector: SectorNumber(4),
            overlay_path: None,
        };
        let volume = image.into_volume_with(&options);
        assert!(volume.superblock().magic_matches());
    }

    #[test]
    fn missing_sidecar_is_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = OpenOptions {
            superblock_sector: SectorNumber(SUPERBLOCK_SECTOR),
            overlay_path: Some(dir.path().join("absent.cow")),
        };
        let volume = TestImage::new(64).into_volume_with(&options);
        assert!(volume.disk().overlay().is_empty());
    }

    #[test]
    fn close_exports_the_configured_sidecar() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sidecar = dir.path().join("session.cow");
        let options = OpenOptions {
            superblock_sector: SectorNumber(SUPERBLOCK_SECTOR),
            overlay_path: Some(sidecar.clone()),
        };

        let mut volume = TestImage::new(64).into_volume_with(&options);
        let staged = [0x5C_u8; SECTOR_SIZE];
        volume.disk_mut().write_sector(SectorNumber(77), &staged);
        volume.close().expect("close");

        let bytes = std::fs::read(&sidecar).expect("sidecar");
        assert_eq!(bytes.len(), 8 + SECTOR_SIZE);
        assert_eq!(&bytes[..8], &77_u64.to_le_bytes());
        assert_eq!(&bytes[8..], &staged[..]);
    }

    #[test]
    fn sidecar_round_trips_across_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sidecar = dir.path().join("session.cow");
        let options = OpenOptions {
            superblock_sector: SectorNumber(SUPERBLOCK_SECTOR),
            overlay_path: Some(sidecar),
        };

        let mut first = TestImage::new(64).into_volume_with(&options);
        let staged = [0xA1_u8; SECTOR_SIZE];
        first.disk_mut().write_sector(SectorNumber(9), &staged);
        first.close().expect("close");

        let second = TestImage::new(64).into_volume_with(&options);
        let mut buf = [0_u8; SECTOR_SIZE];
        second
            .disk()
            .read_sector(SectorNumber(9), &mut buf)
            .expect("read");
        assert_eq!(buf, staged, "staged sector survives into the next session");
    }

    #[test]
    fn group_descriptor_load_and_range_check() {
        let volume = TestImage::new(64).into_volume();

        let desc = volume.load_group_desc(GroupNumber(0)).expect("desc");
        assert_eq!(desc.block_bitmap, 3);
        assert_eq!(desc.inode_bitmap, 4);
        assert_eq!(desc.inode_table, 5);

        let err = volume.load_group_desc(GroupNumber(1)).expect_err("range");
        assert!(matches!(err, SfsError::NotFound(_)));
    }

    #[test]
    fn descriptor_load_observes_staged_repairs() {
        let mut volume = TestImage::new(64).into_volume();
        let (sector, index) = volume
            .model()
            .descriptor_location(GroupNumber(0))
            .expect("location");
        assert_eq!(index, 0);

        let mut buf = [0_u8; SECTOR_SIZE];
        volume.disk().read_sector(sector, &mut buf).expect("read");
        buf[0x08..0x0C].copy_from_slice(&9_u32.to_le_bytes());
        volume.disk_mut().write_sector(sector, &buf);

        let desc = volume.load_group_desc(GroupNumber(0)).expect("desc");
        assert_eq!(desc.inode_table, 9, "load sees the overlay copy");
    }
}
