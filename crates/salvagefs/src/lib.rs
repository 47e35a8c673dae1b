#![forbid(unsafe_code)]
//! salvagefs public API facade.
//!
//! Re-exports the session layer through one stable interface. The CLI
//! and the test harness depend on this crate rather than the internals;
//! the decode, device, and repair layers are reachable as modules.

pub use sfs_core::*;
pub use sfs_error::{Result, SfsError};

pub use sfs_device as device;
pub use sfs_ondisk as ondisk;
pub use sfs_repair as repair;
pub use sfs_types as types;
