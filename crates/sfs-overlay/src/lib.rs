//! Copy-on-write sector overlay.
//!
//! Repairs produced by this toolkit never touch the damaged array. Every
//! written sector lands in an in-memory shadow keyed by logical sector
//! number; reads consult the shadow before the backend, so a session sees
//! its own repairs immediately while the underlying media stays pristine.
//!
//! The shadow survives between sessions through a sidecar file. Export
//! writes every dirty sector; import replaces the whole shadow with the
//! sidecar's contents. Importing is best-effort at session open (a missing
//! or mangled sidecar just means starting with a clean shadow), which is
//! why import failures are surfaced as ordinary errors for the caller to
//! downgrade rather than handled here.

#![forbid(unsafe_code)]

use sfs_error::{Result, SfsError};
use sfs_types::{SECTOR_SIZE, SectorNumber};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

// ── Sidecar format ────────────────────────────────────────────────────────────
//
// A sidecar is a flat sequence of fixed-size records with no header:
//
// ```text
// Record (520 bytes, repeated):
// +------------------+-----------+
// | sector           |   8 bytes | logical sector number, little-endian
// | payload          | 512 bytes | sector contents
// +------------------+-----------+
// ```
//
// Export emits records in ascending sector order; import accepts them in any
// order and keeps the last record for a repeated sector. A file whose length
// is not a multiple of 520 has a truncated tail and is rejected whole.

/// Bytes per sidecar record: a sector number plus one sector of payload.
pub const SIDECAR_RECORD_SIZE: usize = 8 + SECTOR_SIZE;

/// One sector's worth of overlay payload.
pub type SectorPayload = [u8; SECTOR_SIZE];

/// What an export or import moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SidecarSummary {
    /// Distinct dirty sectors.
    pub sectors: u64,
    /// Total payload bytes (excludes the 8-byte record keys).
    pub payload_bytes: u64,
}

/// In-memory shadow of every sector the session has written.
///
/// Writes replace in place, so the shadow holds at most one payload per
/// sector no matter how many times it is rewritten.
#[derive(Debug, Default)]
pub struct CowOverlay {
    sectors: BTreeMap<SectorNumber, SectorPayload>,
}

impl CowOverlay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shadowed payload for `sector`, if the session has written it.
    #[must_use]
    pub fn get(&self, sector: SectorNumber) -> Option<&SectorPayload> {
        self.sectors.get(&sector)
    }

    /// Record a write. A repeated sector replaces the earlier payload.
    pub fn record(&mut self, sector: SectorNumber, payload: &SectorPayload) {
        let replaced = self.sectors.insert(sector, *payload).is_some();
        tracing::trace!(
            target: "sfs::overlay",
            sector = sector.0,
            replaced,
            "overlay_sector_recorded"
        );
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Distinct dirty sectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    /// What a full export would move.
    #[must_use]
    pub fn summary(&self) -> SidecarSummary {
        let sectors = self.sectors.len() as u64;
        SidecarSummary {
            sectors,
            payload_bytes: sectors * SECTOR_SIZE as u64,
        }
    }

    /// Dirty sectors in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (SectorNumber, &SectorPayload)> {
        self.sectors.iter().map(|(sector, payload)| (*sector, payload))
    }

    /// Write every dirty sector to `path`, replacing any existing sidecar.
    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<SidecarSummary> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        for (sector, payload) in &self.sectors {
            writer.write_all(&sector.0.to_le_bytes())?;
            writer.write_all(payload)?;
        }
        writer.flush()?;

        let summary = self.summary();
        tracing::info!(
            target: "sfs::overlay",
            path = %path.display(),
            sectors = summary.sectors,
            payload_bytes = summary.payload_bytes,
            "overlay_exported"
        );
        Ok(summary)
    }

    /// Replace the whole shadow with the contents of `path`.
    ///
    /// The current shadow is untouched unless the entire sidecar parses, so
    /// a truncated file cannot half-apply.
    pub fn import_from(&mut self, path: impl AsRef<Path>) -> Result<SidecarSummary> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let mut incoming: BTreeMap<SectorNumber, SectorPayload> = BTreeMap::new();

        loop {
            let mut key = [0_u8; 8];
            let first = reader.read(&mut key)?;
            if first == 0 {
                break;
            }
            let mid_record = |err: std::io::Error| {
                if err.kind() == ErrorKind::UnexpectedEof {
                    SfsError::Format(format!(
                        "sidecar {} ends mid-record after {} whole records",
                        path.display(),
                        incoming.len()
                    ))
                } else {
                    SfsError::Io(err)
                }
            };
            reader.read_exact(&mut key[first..]).map_err(mid_record)?;
            let mut payload = [0_u8; SECTOR_SIZE];
            reader.read_exact(&mut payload).map_err(mid_record)?;
            incoming.insert(SectorNumber(u64::from_le_bytes(key)), payload);
        }

        self.sectors = incoming;
        let summary = self.summary();
        tracing::info!(
            target: "sfs::overlay",
            path = %path.display(),
            sectors = summary.sectors,
            payload_bytes = summary.payload_bytes,
            "overlay_imported"
        );
        Ok(summary)
    }
}
