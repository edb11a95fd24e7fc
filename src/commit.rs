//! Two-phase commit of a *proposed* manifest into the *live* one — the
//! most intricate algorithm in this crate.
//!
//! Phase 1 ([`commit1`]) durably publishes `proposed` to disk via
//! [`crate::store::store`]; once it returns `Ok`, a crash is recoverable
//! by reloading `CURRENT` — `live` has not been touched yet. Phase 2
//! ([`commit2`]) applies the diff between `live` and `proposed` in memory:
//! superseded descriptors are ref-dropped, and any that reach zero are
//! unlinked. Unlink errors are logged, not propagated — a failing
//! `unlink` never leaves `live` half-updated. A broken caller contract
//! (an illegal stt transition, a head that changed size/offset under the
//! same commit_id) is different: it is reported as
//! [`crate::error::ManifestError::InvariantViolation`], same as
//! [`crate::upsert`] does for the identical contracts, instead of
//! silently corrupting `live`.

use std::fs;
use std::path::Path;

use tracing::{instrument, warn};

use crate::config::TsdbFsConfig;
use crate::descriptor::{FileDescriptor, FileId, FileKind};
use crate::error::{ManifestError, Result};
use crate::fileset::FileSet;
use crate::manifest::Manifest;
use crate::path;
use crate::store;

/// Phase 1: encode `proposed`, write it to `CURRENT.t`, fsync, and rename
/// it over `CURRENT`. Does not touch `live`.
#[instrument(skip_all)]
pub fn commit1(cfg: &TsdbFsConfig, proposed: &Manifest) -> Result<()> {
    store::store(path::current_path(cfg), proposed)
}

/// Phase 2: merge `proposed` into `live`, unlinking every descriptor that
/// loses its last reference. Must only be called after the matching
/// [`commit1`] has returned `Ok`.
#[instrument(skip_all)]
pub fn commit2(cfg: &TsdbFsConfig, live: &mut Manifest, proposed: &Manifest) -> Result<()> {
    merge_del(cfg, live, proposed)?;
    merge_file_sets(cfg, live, proposed)?;
    Ok(())
}

fn merge_del(cfg: &TsdbFsConfig, live: &mut Manifest, proposed: &Manifest) -> Result<()> {
    match (&live.del, &proposed.del) {
        (_, None) => {
            if live.del.is_some() {
                return Err(ManifestError::invariant(
                    "commit2: proposed.del is None but live.del is Some (del is monotonic)",
                ));
            }
            Ok(())
        }
        (None, Some(new)) => {
            live.del = Some(new.deep_copy());
            Ok(())
        }
        (Some(old), Some(new)) => {
            if old.commit_id() != new.commit_id() {
                let old = std::mem::replace(live.del.as_mut().unwrap(), new.deep_copy());
                release(cfg, &old, FileKind::Del, FileId::new(0, 0), 0);
            }
            Ok(())
        }
    }
}

fn merge_file_sets(cfg: &TsdbFsConfig, live: &mut Manifest, proposed: &Manifest) -> Result<()> {
    let mut i_old = 0usize;
    let mut i_new = 0usize;

    while i_old < live.file_sets().len() || i_new < proposed.file_sets().len() {
        let old_fid = live.file_sets().get(i_old).map(|fs| fs.fid);
        let new_fid = proposed.file_sets().get(i_new).map(|fs| fs.fid);

        match (old_fid, new_fid) {
            (Some(o), Some(n)) if o == n => {
                merge_one(cfg, &mut live.file_sets_mut()[i_old], &proposed.file_sets()[i_new])?;
                i_old += 1;
                i_new += 1;
            }
            (Some(o), Some(n)) if o < n => {
                remove_old(cfg, live, i_old);
            }
            (Some(_), Some(_)) => {
                add_new(live, proposed, &mut i_old, &mut i_new);
            }
            (Some(_), None) => {
                remove_old(cfg, live, i_old);
            }
            (None, Some(_)) => {
                add_new(live, proposed, &mut i_old, &mut i_new);
            }
            (None, None) => unreachable!("loop condition guarantees at least one cursor valid"),
        }
    }
    Ok(())
}

fn add_new(live: &mut Manifest, proposed: &Manifest, i_old: &mut usize, i_new: &mut usize) {
    let new_fs = proposed.file_sets()[*i_new].deep_copy();
    live.file_sets_mut().insert(*i_old, new_fs);
    *i_old += 1;
    *i_new += 1;
}

fn remove_old(cfg: &TsdbFsConfig, live: &mut Manifest, i_old: usize) {
    let removed = live.file_sets_mut().remove(i_old);
    for (kind, fd) in removed.descriptors() {
        release(cfg, fd, kind, removed.disk, removed.fid);
    }
}

/// MERGE: `live[i_old]` and `proposed[i_new]` share a `fid`. Reconcile
/// head/data/sma field-by-field, then the stt array, then adopt the new
/// disk if it migrated.
fn merge_one(cfg: &TsdbFsConfig, old: &mut FileSet, new: &FileSet) -> Result<()> {
    let same_disk = old.disk.same_disk(&new.disk);

    merge_descriptor(cfg, old, FileKind::Head, same_disk, |fs| &mut fs.head, &new.head)?;
    merge_descriptor(cfg, old, FileKind::Data, same_disk, |fs| &mut fs.data, &new.data)?;
    merge_descriptor(cfg, old, FileKind::Sma, same_disk, |fs| &mut fs.sma, &new.sma)?;

    merge_stt(cfg, old, new, same_disk)?;

    if !same_disk {
        old.disk = new.disk;
    }
    Ok(())
}

fn merge_descriptor(
    cfg: &TsdbFsConfig,
    old_fs: &mut FileSet,
    kind: FileKind,
    same_disk: bool,
    slot: impl FnOnce(&mut FileSet) -> &mut FileDescriptor,
    new: &FileDescriptor,
) -> Result<()> {
    let disk = old_fs.disk;
    let fid = old_fs.fid;
    let old = slot(old_fs);

    if !same_disk || !old.same_commit(new) {
        let previous = std::mem::replace(old, new.deep_copy());
        release(cfg, &previous, kind, disk, fid);
        return Ok(());
    }

    match kind {
        FileKind::Head => {
            if old.size() != new.size() || old.offset() != new.offset() {
                return Err(ManifestError::invariant(format!(
                    "commit2: head size/offset changed under the same commit_id for fid={fid} \
                     (old size={}, offset={}; new size={}, offset={})",
                    old.size(),
                    old.offset(),
                    new.size(),
                    new.offset()
                )));
            }
        }
        FileKind::Data | FileKind::Sma => {
            if new.size() < old.size() {
                return Err(ManifestError::invariant(format!(
                    "commit2: {kind:?} for fid={fid} shrank under the same commit_id (old size={}, new size={})",
                    old.size(),
                    new.size()
                )));
            }
            old.set_size(new.size());
        }
        _ => unreachable!("merge_descriptor is only called for head/data/sma"),
    }
    Ok(())
}

fn merge_stt(cfg: &TsdbFsConfig, old_fs: &mut FileSet, new_fs: &FileSet, same_disk: bool) -> Result<()> {
    let disk = old_fs.disk;
    let fid = old_fs.fid;
    let n_old = old_fs.n_stt();
    let n_new = new_fs.n_stt();

    if !same_disk {
        if n_new != n_old {
            return Err(ManifestError::invariant(format!(
                "commit2: disk migration must preserve stt count for fid={fid} (n_old={n_old}, n_new={n_new})"
            )));
        }
        let fresh: Vec<FileDescriptor> = new_fs.stt().iter().map(FileDescriptor::deep_copy).collect();
        let old_stt = std::mem::replace(old_fs.stt_mut(), fresh);
        for (level, fd) in old_stt.into_iter().enumerate() {
            release(cfg, &fd, FileKind::Stt(level as u8), disk, fid);
        }
        return Ok(());
    }

    // A genuine collapse (more than one old level folding into one) always
    // installs a fresh descriptor, even if `new_fs.stt()[0]`'s commit_id
    // happens to match `old_fs.stt()[0]`'s: compaction always mints a new
    // commit_id, and "free the extra slots" only makes sense when there
    // were extra slots to free. When `n_old == n_new == 1` this condition
    // is also true, but the per-level loop below already handles that
    // trivial case correctly (and cheaper, via the same-commit no-op), so
    // we only take this branch when there's an actual collapse to do.
    if n_new == 1 && n_old > 1 {
        let fresh = vec![new_fs.stt()[0].deep_copy()];
        let old_stt = std::mem::replace(old_fs.stt_mut(), fresh);
        for (level, fd) in old_stt.into_iter().enumerate() {
            release(cfg, &fd, FileKind::Stt(level as u8), disk, fid);
        }
        return Ok(());
    }

    if !(n_new == n_old || n_new == n_old + 1) {
        return Err(ManifestError::invariant(format!(
            "commit2: illegal stt transition n_old={n_old} -> n_new={n_new} for fid={fid}"
        )));
    }
    for level in 0..n_new {
        match old_fs.stt().get(level) {
            Some(existing) if existing.same_commit(&new_fs.stt()[level]) => {}
            Some(_) => {
                let fresh = new_fs.stt()[level].deep_copy();
                let previous = std::mem::replace(&mut old_fs.stt_mut()[level], fresh);
                release(cfg, &previous, FileKind::Stt(level as u8), disk, fid);
            }
            None => {
                old_fs.stt_mut().push(new_fs.stt()[level].deep_copy());
            }
        }
    }
    Ok(())
}

/// Drop a logical reference; if it was the last one, resolve the path
/// this descriptor occupied and unlink it. Unlink failures are logged,
/// never propagated — phase 2 completes unconditionally.
fn release(cfg: &TsdbFsConfig, fd: &FileDescriptor, kind: FileKind, disk: FileId, fid: i32) {
    if fd.ref_decr() != 0 {
        return;
    }
    let path = match kind {
        FileKind::Del => path::del_file_path(cfg, fd.commit_id()),
        _ => path::data_file_path(cfg, kind, disk, fid, fd.commit_id()),
    };
    unlink(&path);
}

fn unlink(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to unlink superseded file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FileId;

    fn cfg(dir: &std::path::Path) -> TsdbFsConfig {
        TsdbFsConfig::new(dir, "")
    }

    fn fset(disk: FileId, fid: i32, commit_id: u64, n_stt: usize) -> FileSet {
        FileSet::new(
            disk,
            fid,
            FileDescriptor::new(commit_id, 100, 0),
            FileDescriptor::new(commit_id, 1000, 0),
            FileDescriptor::new(commit_id, 50, 0),
            (0..n_stt).map(|_| FileDescriptor::new(commit_id, 10, 0)).collect(),
        )
        .unwrap()
    }

    fn touch(cfg: &TsdbFsConfig, fs: &FileSet) {
        for (kind, fd) in fs.descriptors() {
            let p = path::data_file_path(cfg, kind, fs.disk, fs.fid, fd.commit_id());
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, b"x").unwrap();
        }
    }

    #[test]
    fn growing_data_file_updates_size_without_unlink_or_new_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);

        let old_fs = fset(disk, 100, 1, 1);
        touch(&cfg, &old_fs);
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let mut new_fs = fset(disk, 100, 1, 1);
        new_fs.data.set_size(4096);
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert_eq!(live.file_sets()[0].data.size(), 4096);
        assert_eq!(live.file_sets()[0].head.ref_count(), 1);
        let data_path = path::data_file_path(&cfg, FileKind::Data, disk, 100, 1);
        assert!(data_path.exists());
    }

    #[test]
    fn stt_append_adds_a_fresh_level_and_keeps_the_old_one() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);

        let old_fs = fset(disk, 200, 1, 1);
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let mut new_fs = fset(disk, 200, 1, 1);
        new_fs.set_stt(vec![FileDescriptor::new(1, 10, 0), FileDescriptor::new(2, 10, 0)]).unwrap();
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert_eq!(live.file_sets()[0].n_stt(), 2);
        assert_eq!(live.file_sets()[0].stt()[0].commit_id(), 1);
        assert_eq!(live.file_sets()[0].stt()[1].commit_id(), 2);
    }

    #[test]
    fn stt_collapse_unlinks_all_old_levels() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);

        let old_fs = fset(disk, 300, 1, 4);
        touch(&cfg, &old_fs);
        let old_paths: Vec<_> = old_fs
            .stt()
            .iter()
            .enumerate()
            .map(|(lvl, fd)| path::data_file_path(&cfg, FileKind::Stt(lvl as u8), disk, 300, fd.commit_id()))
            .collect();
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let mut new_fs = fset(disk, 300, 1, 1);
        new_fs.set_stt(vec![FileDescriptor::new(99, 10, 0)]).unwrap();
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert_eq!(live.file_sets()[0].n_stt(), 1);
        assert_eq!(live.file_sets()[0].stt()[0].commit_id(), 99);
        for p in old_paths {
            assert!(!p.exists());
        }
    }

    #[test]
    fn disk_migration_replaces_every_descriptor_and_updates_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let old_disk = FileId::new(0, 0);
        let new_disk = FileId::new(1, 0);

        let old_fs = fset(old_disk, 400, 1, 1);
        touch(&cfg, &old_fs);
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let new_fs = fset(new_disk, 400, 2, 1);
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert_eq!(live.file_sets()[0].disk, new_disk);
        assert_eq!(live.file_sets()[0].head.commit_id(), 2);
        let old_head_path = path::data_file_path(&cfg, FileKind::Head, old_disk, 400, 1);
        assert!(!old_head_path.exists());
    }

    #[test]
    fn fid_absent_from_proposed_is_removed_and_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);
        let old_fs = fset(disk, 500, 1, 1);
        touch(&cfg, &old_fs);
        let head_path = path::data_file_path(&cfg, FileKind::Head, disk, 500, 1);

        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);
        let proposed = Manifest::empty();

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert!(live.file_sets().is_empty());
        assert!(!head_path.exists());
    }

    #[test]
    fn fid_absent_from_live_is_added() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);
        let mut live = Manifest::empty();
        let new_fs = fset(disk, 600, 1, 1);
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert_eq!(live.file_sets().len(), 1);
        assert_eq!(live.file_sets()[0].head.ref_count(), 1);
    }

    #[test]
    fn idempotent_commit_of_the_same_manifest_unlinks_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);
        let fs = fset(disk, 700, 1, 2);
        touch(&cfg, &fs);
        let mut live = Manifest::from_sorted_file_sets(None, vec![fs.clone()]);
        let proposed = Manifest::from_sorted_file_sets(None, vec![fs]);

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert_eq!(live.file_sets()[0].head.ref_count(), 1);
        assert_eq!(live.file_sets()[0].n_stt(), 2);
    }

    #[test]
    fn del_cannot_go_from_some_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let mut live = Manifest::from_sorted_file_sets(Some(FileDescriptor::new(1, 0, 0)), vec![]);
        let proposed = Manifest::empty();

        let err = commit2(&cfg, &mut live, &proposed).unwrap_err();
        assert!(matches!(err, ManifestError::InvariantViolation(_)));
    }

    #[test]
    fn new_del_unlinks_the_superseded_del_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let old_del_path = path::del_file_path(&cfg, 1);
        std::fs::write(&old_del_path, b"x").unwrap();

        let mut live = Manifest::from_sorted_file_sets(Some(FileDescriptor::new(1, 0, 0)), vec![]);
        let proposed = Manifest::from_sorted_file_sets(Some(FileDescriptor::new(2, 0, 0)), vec![]);

        commit2(&cfg, &mut live, &proposed).unwrap();

        assert_eq!(live.del.as_ref().unwrap().commit_id(), 2);
        assert!(!old_del_path.exists());
    }

    #[test]
    fn illegal_stt_transition_in_commit2_is_rejected_not_silently_applied() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);

        let old_fs = fset(disk, 800, 1, 5);
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let new_fs = fset(disk, 800, 2, 3);
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        let err = commit2(&cfg, &mut live, &proposed).unwrap_err();
        assert!(matches!(err, ManifestError::InvariantViolation(_)));
    }

    #[test]
    fn head_size_change_under_the_same_commit_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);

        let old_fs = fset(disk, 900, 1, 1);
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let mut new_fs = fset(disk, 900, 1, 1);
        new_fs.head.set_size(999);
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        let err = commit2(&cfg, &mut live, &proposed).unwrap_err();
        assert!(matches!(err, ManifestError::InvariantViolation(_)));
    }

    #[test]
    fn data_shrinking_under_the_same_commit_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);

        let old_fs = fset(disk, 1000, 1, 1);
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let mut new_fs = fset(disk, 1000, 1, 1);
        new_fs.data.set_size(1);
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        let err = commit2(&cfg, &mut live, &proposed).unwrap_err();
        assert!(matches!(err, ManifestError::InvariantViolation(_)));
    }

    #[test]
    fn disk_migration_with_mismatched_stt_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let old_disk = FileId::new(0, 0);
        let new_disk = FileId::new(1, 0);

        let old_fs = fset(old_disk, 1100, 1, 1);
        let mut live = Manifest::from_sorted_file_sets(None, vec![old_fs]);

        let new_fs = fset(new_disk, 1100, 2, 2);
        let proposed = Manifest::from_sorted_file_sets(None, vec![new_fs]);

        let err = commit2(&cfg, &mut live, &proposed).unwrap_err();
        assert!(matches!(err, ManifestError::InvariantViolation(_)));
    }
}
