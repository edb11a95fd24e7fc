//! Cheap point-in-time manifest views for readers.
//!
//! Readers (compaction inputs, query scans — out of scope here, but the
//! collaborators this crate serves) call [`snapshot`] to get a `Manifest`
//! they can keep using even if the commit engine concurrently replaces
//! descriptors in the live manifest. A snapshot is released with
//! [`unref`], which may unlink files whose last reference it held.
//!
//! This is a reader's view, not a builder's: a snapshot shares `live`'s
//! actual descriptors (incremented refs), so it is the wrong starting
//! point for a `proposed` manifest — that would double-count every
//! unchanged descriptor the commit engine later carries through
//! unmodified. Callers assembling a commit should start from
//! [`crate::Manifest::deep_copy`] (exposed as `ManifestHandle::begin_proposal`)
//! instead.

use std::fs;
use std::path::Path;

use tracing::{trace, warn};

use crate::config::TsdbFsConfig;
use crate::manifest::Manifest;
use crate::path;

/// Produce a manifest value that shares descriptors with `live`: every
/// reachable descriptor's ref is incremented first, then `live` is
/// cloned. Cloning duplicates the `file_sets`/`del` *array*, but each
/// `FileDescriptor` inside it is the same shared handle `live` holds —
/// only the ref count changed, not the identity — so mutations the commit
/// engine makes to `live` afterward (replacing a slot, migrating a disk)
/// are invisible to this snapshot.
pub fn snapshot(live: &Manifest) -> Manifest {
    if let Some(del) = &live.del {
        del.ref_incr();
    }
    for fs in live.file_sets() {
        for (_, fd) in fs.descriptors() {
            fd.ref_incr();
        }
    }
    live.clone()
}

/// Release every ref `snap` holds. A descriptor whose ref reaches zero is
/// unlinked, using the disk/fid the *snapshot* captured — which is
/// correct even if `live` has since migrated that file set to a
/// different disk, because the snapshot's copy is frozen at the moment
/// [`snapshot`] was called.
pub fn unref(cfg: &TsdbFsConfig, snap: &Manifest) {
    if let Some(del) = &snap.del {
        if del.ref_decr() == 0 {
            unlink(&path::del_file_path(cfg, del.commit_id()));
        }
    }
    for fs in snap.file_sets() {
        for (kind, fd) in fs.descriptors() {
            if fd.ref_decr() == 0 {
                unlink(&path::data_file_path(cfg, kind, fs.disk, fs.fid, fd.commit_id()));
            }
        }
    }
}

fn unlink(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => trace!(path = %path.display(), "unlinked file released by snapshot unref"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to unlink file with ref==0"),
    }
}
