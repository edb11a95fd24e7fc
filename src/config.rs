//! Per-vnode configuration for the manifest subsystem.
//!
//! There is no on-disk config file format here: the vnode's lifecycle owner
//! constructs one `TsdbFsConfig` and hands it to [`crate::open::open`].
//! There is no process-wide singleton — one manifest per vnode, owned by
//! the vnode's lifecycle.

use std::path::{Path, PathBuf};

/// Tells the path resolver and the open/repair pass where this vnode's files
/// live and how to interpret the sizes recorded in descriptors.
///
/// There is no runtime-configurable stt cap here: `descriptor::MAX_STT` is
/// the one cap every enforcement point (`FileSet::new`/`set_stt`,
/// the codec's decode) actually checks against, and a per-vnode field that
/// no code path consulted would just be a second, disconnected knob.
#[derive(Debug, Clone)]
pub struct TsdbFsConfig {
    /// Tiered-storage root. When no tiered-storage handle is supplied
    /// (tests, dev), this is just a plain directory on the primary tier.
    pub root: PathBuf,

    /// Path of this vnode's data directory, relative to `root`.
    pub tsdb_path: PathBuf,

    /// Page size in bytes used to convert a descriptor's logical `size`
    /// into an expected on-disk byte count for `Head`, `Stt`, and `Del`
    /// files.
    pub page_size: u32,
}

impl TsdbFsConfig {
    pub fn new(root: impl Into<PathBuf>, tsdb_path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tsdb_path: tsdb_path.into(),
            page_size: 4096,
        }
    }

    /// Absolute directory this vnode's files live under.
    pub fn vnode_dir(&self) -> PathBuf {
        self.root.join(&self.tsdb_path)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}
