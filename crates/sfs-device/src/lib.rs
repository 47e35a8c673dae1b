#![forbid(unsafe_code)]
//! Physical-access backends.
//!
//! A backend turns filesystem-logical sector numbers into reads against one
//! or more image files. Every backend is strictly read-only on the physical
//! media; staged repairs live in the copy-on-write overlay, a layer above
//! this crate.
//!
//! Backends form a closed set behind the [`DiskBackend`] trait and are
//! selected by descriptor string through [`open_backend`]: each registered
//! kind gets to inspect the descriptor in a fixed order and the first one
//! whose matcher accepts it wins. A descriptor no kind accepts is a fatal
//! open error.
//!
//! | Descriptor | Backend | Media |
//! |------------|---------|-------|
//! | `simple:<path>` | [`SimpleBackend`] | one image file |
//! | `raid:` | [`RaidBackend`](crate::raid::RaidBackend) | three striped members, RAID5 left-symmetric |

pub mod raid;

use sfs_error::{Result, SfsError};
use sfs_types::{SECTOR_SIZE, SectorNumber};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

pub use raid::{
    CHUNK_SECTORS, DATA_DISKS, DEFAULT_MEMBER_PATHS, LVM_OFFSET_SECTORS, RAID_DISKS, RaidBackend,
    RaidLocation, locate_sector,
};

/// One sector's worth of bytes.
pub type SectorBuf = [u8; SECTOR_SIZE];

/// Sector-granular read access to possibly-damaged media.
///
/// Image handles are owned by the backend and closed on drop.
/// `mark_unreadable` is the one alternate-path mechanism in the whole
/// stack: a chunk marked lame stays excluded from its primary disk for the
/// life of the handle, and nothing ever retries beyond that.
pub trait DiskBackend: fmt::Debug + Send {
    /// Backend kind, for diagnostics and logs.
    fn name(&self) -> &'static str;

    /// Read one 512-byte sector into `buf`.
    fn read_sector(&self, sector: SectorNumber, buf: &mut SectorBuf) -> Result<()>;

    /// Permanently exclude the chunk serving `sector` from its primary
    /// disk. Fails on backends with no redundancy to exploit.
    fn mark_unreadable(&mut self, sector: SectorNumber) -> Result<()>;
}

/// One backend kind's descriptor matcher.
///
/// `None` means "not my descriptor, try the next kind"; `Some(result)`
/// claims the descriptor, so an open failure inside is final rather than a
/// fall-through.
type OpenFn = fn(&str) -> Option<Result<Box<dyn DiskBackend>>>;

/// Backend kinds in match order.
const MECHANISMS: &[OpenFn] = &[SimpleBackend::match_open, RaidBackend::match_open];

/// Open the backend selected by `descriptor`.
pub fn open_backend(descriptor: &str) -> Result<Box<dyn DiskBackend>> {
    for mechanism in MECHANISMS {
        if let Some(opened) = mechanism(descriptor) {
            return opened;
        }
    }
    Err(SfsError::UnknownBackend(descriptor.to_owned()))
}

/// Single image file; sector reads are positioned reads at `sector * 512`.
pub struct SimpleBackend {
    file: File,
    path: PathBuf,
}

impl SimpleBackend {
    /// Open `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path)?;
        tracing::debug!(
            target: "sfs::device",
            path = %path.display(),
            "simple_backend_open"
        );
        Ok(Self { file, path })
    }

    fn match_open(descriptor: &str) -> Option<Result<Box<dyn DiskBackend>>> {
        let path = descriptor.strip_prefix("simple:")?;
        Some(Self::open(path).map(|backend| Box::new(backend) as Box<dyn DiskBackend>))
    }
}

impl fmt::Debug for SimpleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DiskBackend for SimpleBackend {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn read_sector(&self, sector: SectorNumber, buf: &mut SectorBuf) -> Result<()> {
        let offset = sector.to_byte_offset().ok_or_else(|| {
            SfsError::Format(format!("sector {sector} overflows byte addressing"))
        })?;
        self.file.read_exact_at(buf, offset.0)?;
        Ok(())
    }

    fn mark_unreadable(&mut self, sector: SectorNumber) -> Result<()> {
        Err(SfsError::MarkUnsupported(format!(
            "simple backend has no redundant copy of sector {sector}"
        )))
    }
}
