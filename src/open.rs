//! Startup: load the manifest, resolve a crashed commit, and reconcile it
//! against what's actually on disk.

use std::fs;

use tracing::{info, instrument, warn};

use crate::config::TsdbFsConfig;
use crate::descriptor::FileKind;
use crate::error::{ManifestError, Result};
use crate::fileset::FileSet;
use crate::manifest::Manifest;
use crate::path;
use crate::store;

/// Open the manifest at `cfg.vnode_dir()`. `rollback` decides what happens
/// if a `CURRENT.t` is found: `true` deletes it (discard the interrupted
/// commit), `false` promotes it by rename (the interrupted commit's
/// rename durability is assumed to have reached far enough to trust the
/// newer manifest). Either way, the manifest reconciliation in step 6 runs
/// against whichever `CURRENT` results.
#[instrument(skip(cfg), fields(vnode_dir = %cfg.vnode_dir().display()))]
pub fn open(cfg: &TsdbFsConfig, rollback: bool) -> Result<Manifest> {
    let current = path::current_path(cfg);
    let staging = path::staging_path(cfg);

    if !store::exists(&current) {
        info!("no CURRENT found, treating as a fresh vnode");
        let empty = Manifest::empty();
        store::store(&current, &empty)?;
        return Ok(empty);
    }

    if store::exists(&staging) {
        if rollback {
            warn!("found CURRENT.t at open with rollback=true, discarding interrupted commit");
            fs::remove_file(&staging).map_err(|e| ManifestError::io("remove stale CURRENT.t", e))?;
        } else {
            warn!("found CURRENT.t at open with rollback=false, promoting interrupted commit");
            fs::rename(&staging, &current).map_err(|e| ManifestError::io("promote CURRENT.t", e))?;
        }
    }

    let manifest = store::load(&current)?;
    reconcile(cfg, &manifest)?;
    Ok(manifest)
}

/// Validate every descriptor's logical size against its on-disk size,
/// truncating the legitimate-tail case and erroring on anything else.
fn reconcile(cfg: &TsdbFsConfig, manifest: &Manifest) -> Result<()> {
    if let Some(del) = &manifest.del {
        let p = path::del_file_path(cfg, del.commit_id());
        reconcile_one(cfg, &p, FileKind::Del, del.size())?;
    }
    for fs in manifest.file_sets() {
        reconcile_file_set(cfg, fs)?;
    }
    Ok(())
}

fn reconcile_file_set(cfg: &TsdbFsConfig, fs: &FileSet) -> Result<()> {
    for (kind, fd) in fs.descriptors() {
        let p = path::data_file_path(cfg, kind, fs.disk, fs.fid, fd.commit_id());
        reconcile_one(cfg, &p, kind, fd.size())?;
    }
    Ok(())
}

/// `Head`/`Stt`/`Del` are immutable once written: their on-disk byte count
/// must equal the logical size converted through the page size exactly.
/// `Data`/`Sma` may have an unapplied tail past the logical size (the
/// write that would have extended `size` never got durably recorded);
/// that tail is truncated. Anything short of the logical size is
/// corruption in every kind.
fn reconcile_one(cfg: &TsdbFsConfig, path: &std::path::Path, kind: FileKind, logical_size: u64) -> Result<()> {
    let on_disk = fs::metadata(path)
        .map_err(|e| ManifestError::io("stat data file during open reconciliation", e))?
        .len();

    match kind {
        FileKind::Head | FileKind::Stt(_) | FileKind::Del => {
            let expected = logical_size * u64::from(cfg.page_size);
            if on_disk != expected {
                return Err(ManifestError::corrupted(
                    path,
                    format!("{} on-disk size {on_disk} does not equal logical size {expected}", kind.tag()),
                ));
            }
        }
        FileKind::Data | FileKind::Sma => {
            if on_disk < logical_size {
                return Err(ManifestError::corrupted(
                    path,
                    format!("{} on-disk size {on_disk} is smaller than logical size {logical_size}", kind.tag()),
                ));
            }
            if on_disk > logical_size {
                let file = fs::OpenOptions::new()
                    .write(true)
                    .open(path)
                    .map_err(|e| ManifestError::io("open data file to truncate tail", e))?;
                file.set_len(logical_size)
                    .map_err(|e| ManifestError::io("truncate unapplied tail", e))?;
                warn!(path = %path.display(), from = on_disk, to = logical_size, "truncated unapplied tail");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FileDescriptor, FileId};

    fn cfg(dir: &std::path::Path) -> TsdbFsConfig {
        TsdbFsConfig::new(dir, "").with_page_size(1)
    }

    #[test]
    fn fresh_open_creates_an_empty_current_and_reopen_matches() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());

        let m1 = open(&cfg, false).unwrap();
        assert!(m1.file_sets().is_empty());
        assert!(store::exists(path::current_path(&cfg)));

        let m2 = open(&cfg, false).unwrap();
        assert_eq!(m2.file_sets().len(), m1.file_sets().len());
    }

    #[test]
    fn rollback_true_discards_staging_and_loads_current() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        store::store(path::current_path(&cfg), &Manifest::empty()).unwrap();
        fs::write(path::staging_path(&cfg), b"garbage").unwrap();

        let m = open(&cfg, true).unwrap();
        assert!(m.file_sets().is_empty());
        assert!(!store::exists(path::staging_path(&cfg)));
    }

    #[test]
    fn rollback_false_promotes_staging_over_current() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        store::store(path::current_path(&cfg), &Manifest::empty()).unwrap();

        let fset = FileSet::new(
            FileId::new(0, 0),
            1,
            FileDescriptor::new(1, 0, 0),
            FileDescriptor::new(1, 0, 0),
            FileDescriptor::new(1, 0, 0),
            vec![FileDescriptor::new(1, 0, 0)],
        )
        .unwrap();
        let proposed = Manifest::from_sorted_file_sets(None, vec![fset]);
        let bytes = crate::codec::encode(&proposed);
        fs::write(path::staging_path(&cfg), &bytes).unwrap();

        let m = open(&cfg, false).unwrap();
        assert_eq!(m.file_sets().len(), 1);
        assert!(!store::exists(path::staging_path(&cfg)));
    }

    #[test]
    fn corrupted_current_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        fs::write(path::current_path(&cfg), b"not a manifest").unwrap();

        let err = open(&cfg, false).unwrap_err();
        assert!(matches!(err, ManifestError::Corrupted { .. }));
    }

    #[test]
    fn oversized_data_file_is_truncated_to_logical_size() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);
        let fset = FileSet::new(
            disk,
            1,
            FileDescriptor::new(1, 0, 0),
            FileDescriptor::new(1, 10, 0),
            FileDescriptor::new(1, 0, 0),
            vec![FileDescriptor::new(1, 0, 0)],
        )
        .unwrap();
        let data_path = path::data_file_path(&cfg, FileKind::Data, disk, 1, 1);
        fs::create_dir_all(data_path.parent().unwrap()).unwrap();
        fs::write(&data_path, vec![0u8; 20]).unwrap();

        let manifest = Manifest::from_sorted_file_sets(None, vec![fset]);
        store::store(path::current_path(&cfg), &manifest).unwrap();

        open(&cfg, false).unwrap();
        assert_eq!(fs::metadata(&data_path).unwrap().len(), 10);
    }

    #[test]
    fn undersized_head_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(dir.path());
        let disk = FileId::new(0, 0);
        let fset = FileSet::new(
            disk,
            1,
            FileDescriptor::new(1, 100, 0),
            FileDescriptor::new(1, 0, 0),
            FileDescriptor::new(1, 0, 0),
            vec![FileDescriptor::new(1, 0, 0)],
        )
        .unwrap();
        let head_path = path::data_file_path(&cfg, FileKind::Head, disk, 1, 1);
        fs::create_dir_all(head_path.parent().unwrap()).unwrap();
        fs::write(&head_path, vec![0u8; 5]).unwrap();

        let manifest = Manifest::from_sorted_file_sets(None, vec![fset]);
        store::store(path::current_path(&cfg), &manifest).unwrap();

        let err = open(&cfg, false).unwrap_err();
        assert!(matches!(err, ManifestError::Corrupted { .. }));
    }
}
