#![forbid(unsafe_code)]
//! Error types for salvagefs.
//!
//! # Error Taxonomy
//!
//! salvagefs uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `sfs-types` | On-disk format violations detected during byte decoding |
//! | Runtime | `SfsError` | `sfs-error` (this crate) | User-facing errors for the CLI and API consumers |
//!
//! ## Mapping Policy: ParseError → SfsError
//!
//! `sfs-error` is intentionally independent of `sfs-types` and `sfs-ondisk`
//! so no dependency cycles form. The conversion from `ParseError` happens at
//! the consuming crate's boundary:
//!
//! | ParseError Variant | SfsError Variant | Rationale |
//! |--------------------|------------------|-----------|
//! | `InsufficientData` | `Corruption { block, detail }` | Truncated metadata on a damaged volume |
//! | `InvalidMagic` | `Format(detail)` | Wrong magic means wrong structure, not damage |
//! | `InvalidField` | `Format` / `InvalidGeometry` | Caller adds context from field+reason |
//! | `IntegerConversion` | `Corruption { block, detail }` | Overflowing parsed values suggest damage |
//!
//! When the failing block number is known (live metadata reads), prefer
//! `Corruption` so the operator can triage. During session open, before any
//! geometry is trusted, prefer `Format`.
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`SfsError::to_errno`].
//! The match is exhaustive, so adding a variant without assigning an errno is
//! a compile error.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | `EIO` (or the wrapped raw errno) |
//! | `Corruption` | `EIO` |
//! | `Format` | `EINVAL` |
//! | `Parse` | `EINVAL` |
//! | `InvalidGeometry` | `EINVAL` |
//! | `UnknownBackend` | `ENODEV` |
//! | `MarkUnsupported` | `EOPNOTSUPP` |
//! | `ChunkAlreadyLame` | `EEXIST` |
//! | `NotFound` | `ENOENT` |
//!
//! ## Design Constraints
//!
//! - `sfs-error` MUST NOT depend on `sfs-types` or `sfs-ondisk`.
//! - String payloads are owned (`String`) so errors can outlive the borrowed
//!   buffers they were raised from.
//! - I/O failures are never retried internally; the RAID lame-chunk mark is
//!   the one explicit alternate-path mechanism, and it surfaces its own
//!   variants here.

use thiserror::Error;

/// Unified error type for all salvagefs operations.
///
/// Returned by CLI commands and the public session API. Crate-internal
/// errors (`ParseError` from `sfs-types`) convert into `SfsError` at their
/// crate boundaries.
#[derive(Debug, Error)]
pub enum SfsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    ///
    /// Backend open/read failures land here and propagate unchanged; a
    /// hung or absent device is the operator's signal, not ours to mask.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural inconsistency attributed to a known block.
    ///
    /// Raised when live metadata reads produce impossible values
    /// (out-of-range logical index, zero-length directory record). The
    /// block number enables repair triage.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// The volume's structure is fundamentally not what was expected
    /// (bad magic at session open, unknown revision).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Parse-layer failure surfaced without a block attribution.
    ///
    /// Carries the string form of a `ParseError`. Prefer `Corruption` when
    /// the failing block is known.
    #[error("parse error: {0}")]
    Parse(String),

    /// On-disk geometry is numerically unusable (zero blocks per group,
    /// zero inode size).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// No registered backend accepted the descriptor string.
    #[error("no backend accepts descriptor {0:?}")]
    UnknownBackend(String),

    /// `mark_unreadable` has nothing to swap to on this backend or chunk.
    #[error("cannot mark unreadable: {0}")]
    MarkUnsupported(String),

    /// The chunk was already marked lame. Warning-level; the mark stands.
    #[error("chunk {chunk} is already marked lame")]
    ChunkAlreadyLame { chunk: u64 },

    /// A named object (inode, group) does not exist on this volume.
    #[error("not found: {0}")]
    NotFound(String),
}

impl SfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// Policy notes:
    /// - `Io` passes through the wrapped raw errno when one exists.
    /// - `ChunkAlreadyLame` → `EEXIST`: the mark is already present;
    ///   callers treating the re-mark as idempotent can match on it.
    /// - `MarkUnsupported` → `EOPNOTSUPP`: distinguishes "this backend has
    ///   no redundancy" from an actual I/O failure.
    /// - `UnknownBackend` → `ENODEV`: the descriptor names no usable
    ///   device path.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Format(_) | Self::Parse(_) | Self::InvalidGeometry(_) => libc::EINVAL,
            Self::UnknownBackend(_) => libc::ENODEV,
            Self::MarkUnsupported(_) => libc::EOPNOTSUPP,
            Self::ChunkAlreadyLame { .. } => libc::EEXIST,
            Self::NotFound(_) => libc::ENOENT,
        }
    }

    /// True for conditions an operator may acknowledge and continue past.
    ///
    /// Only the idempotent re-mark qualifies today; everything else either
    /// aborted an operation or reported damage.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ChunkAlreadyLame { .. })
    }
}

/// Result alias using `SfsError`.
pub type Result<T> = std::result::Result<T, SfsError>;
