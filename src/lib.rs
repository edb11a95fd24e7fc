//! File-set manifest manager for a per-vnode time-series storage engine.
//!
//! This crate is the authoritative in-memory and on-disk record of which
//! immutable data files belong to a vnode at any instant: it commits new
//! file sets atomically (crash-safe), reference-counts every physical
//! file so concurrent readers never observe a deleted one, and validates
//! the on-disk state against the manifest at open time. Query execution,
//! the memtable, write-ahead logging, replication, schema management, and
//! the encoding of the data files themselves are all out of scope — this
//! crate only tracks their descriptors.
//!
//! ## Layout
//! - [`descriptor`] / [`fileset`] / [`manifest`] — the value types: one
//!   physical file, a time-partition's bundle of files, and the top-level
//!   manifest.
//! - [`path`] — deterministic on-disk paths for every descriptor.
//! - [`codec`] — the manifest's self-describing binary encoding.
//! - [`store`] — atomic write-then-rename persistence of `CURRENT`.
//! - [`open`] — startup load, crash rollback/roll-forward, size
//!   reconciliation.
//! - [`upsert`] — build a proposed manifest one file set at a time.
//! - [`commit`] — two-phase commit of a proposed manifest into the live
//!   one.
//! - [`snapshot`] — cheap point-in-time views for readers.
//! - [`ManifestHandle`] — the per-vnode façade gluing the above into the
//!   operation set collaborators actually call.

pub mod checksum;
pub mod codec;
pub mod commit;
pub mod config;
pub mod descriptor;
mod error;
pub mod fileset;
pub mod manifest;
pub mod open;
pub mod path;
pub mod snapshot;
pub mod store;
pub mod upsert;

pub use config::TsdbFsConfig;
pub use descriptor::{FileDescriptor, FileId, FileKind, MAX_STT};
pub use error::{ManifestError, Result};
pub use fileset::FileSet;
pub use manifest::Manifest;

use parking_lot::RwLock;
use tracing::instrument;

/// The per-vnode façade: no process-wide singleton, one manifest per
/// vnode, owned by the vnode's lifecycle. Wraps the live manifest in a
/// lock so the single writer (flush/compaction committer) and arbitrary
/// parallel readers (via [`ManifestHandle::snapshot`]) can share it
/// safely, and threads `cfg` through to every operation that needs to
/// resolve a path.
pub struct ManifestHandle {
    cfg: TsdbFsConfig,
    live: RwLock<Manifest>,
}

impl ManifestHandle {
    /// Open the manifest for a vnode, resolving any interrupted commit.
    #[instrument(skip_all)]
    pub fn open(cfg: TsdbFsConfig, rollback: bool) -> Result<Self> {
        let live = open::open(&cfg, rollback)?;
        Ok(Self {
            cfg,
            live: RwLock::new(live),
        })
    }

    pub fn config(&self) -> &TsdbFsConfig {
        &self.cfg
    }

    /// Take a point-in-time view of the live manifest, sharing refs on
    /// every descriptor it reaches. For readers (compaction inputs, query
    /// scans) that must keep using a file set even if the commit engine
    /// concurrently replaces it in `live` — not for building a `proposed`
    /// manifest; use [`ManifestHandle::begin_proposal`] for that.
    pub fn snapshot(&self) -> Manifest {
        snapshot::snapshot(&self.live.read())
    }

    /// Release a snapshot taken with [`ManifestHandle::snapshot`].
    pub fn unref(&self, snap: &Manifest) {
        snapshot::unref(&self.cfg, snap)
    }

    /// Start building a `proposed` manifest by deep-copying every file set
    /// currently in the live manifest: each carried-over descriptor is a
    /// fresh allocation with its own `ref = 1`, independent of `live`'s
    /// reference counts. This is the correct starting point for a
    /// `proposed` manifest — [`ManifestHandle::snapshot`] shares `live`'s
    /// actual descriptors (incrementing their refs for a reader), and
    /// seeding a commit from it would double-count every unchanged
    /// descriptor the commit carries through unmodified.
    pub fn begin_proposal(&self) -> Manifest {
        self.live.read().deep_copy()
    }

    /// Upsert `s` into a proposed manifest the caller is assembling
    /// before a commit. `proposed` is typically started from
    /// [`ManifestHandle::begin_proposal`].
    pub fn upsert_fset(&self, proposed: &mut Manifest, s: &FileSet) -> Result<()> {
        upsert::upsert_fset(proposed, s)
    }

    pub fn upsert_del_file(&self, proposed: &mut Manifest, d: &FileDescriptor) {
        upsert::upsert_del_file(proposed, d)
    }

    /// Phase 1 of a commit: durably publish `proposed` to disk. Does not
    /// touch the live manifest; safe to call without holding the write lock.
    #[instrument(skip_all)]
    pub fn commit1(&self, proposed: &Manifest) -> Result<()> {
        commit::commit1(&self.cfg, proposed)
    }

    /// Phase 2 of a commit: merge `proposed` into the live manifest and
    /// unlink superseded files. Must only be called after the matching
    /// [`ManifestHandle::commit1`] returned `Ok`.
    #[instrument(skip_all)]
    pub fn commit2(&self, proposed: &Manifest) -> Result<()> {
        let mut live = self.live.write();
        commit::commit2(&self.cfg, &mut live, proposed)
    }

    /// A no-op: the live manifest's descriptors are dropped with the
    /// handle itself, and dropping is never what triggers an unlink (only
    /// an explicit [`ManifestHandle::unref`] or a commit's diff does).
    /// Exists so collaborators have an explicit lifecycle bookend to call.
    pub fn close(self) {}
}
