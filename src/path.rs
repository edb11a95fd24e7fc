//! Deterministic filesystem paths for manifest and data files. Every
//! function here is a pure function of its inputs — no I/O, no fallible
//! syscalls — so the commit and open/repair code can resolve a path for
//! logging or unlinking without touching the filesystem twice.

use std::path::PathBuf;

use crate::config::TsdbFsConfig;
use crate::descriptor::{FileId, FileKind};

/// The committed manifest: `<root>/<tsdb-path>/CURRENT`.
pub fn current_path(cfg: &TsdbFsConfig) -> PathBuf {
    cfg.vnode_dir().join("CURRENT")
}

/// The staging twin written by phase 1 before the atomic rename: `CURRENT.t`.
pub fn staging_path(cfg: &TsdbFsConfig) -> PathBuf {
    cfg.vnode_dir().join("CURRENT.t")
}

/// Path for a file-set-scoped descriptor (head, data, sma, or one stt
/// level). Embeds the disk's `(level, id)` as a subdirectory and `fid` /
/// `commit_id` in the file name.
pub fn data_file_path(
    cfg: &TsdbFsConfig,
    kind: FileKind,
    disk: FileId,
    fid: i32,
    commit_id: u64,
) -> PathBuf {
    debug_assert!(!matches!(kind, FileKind::Del), "del has no disk/fid; use del_file_path");
    cfg.vnode_dir()
        .join(format!("disk-{}-{}", disk.level, disk.id))
        .join(file_name(kind, fid, commit_id))
}

/// Path for the manifest-global tombstone file. `del` is singleton-per-
/// manifest, not per-file-set, so it carries no `fid`/`disk`.
pub fn del_file_path(cfg: &TsdbFsConfig, commit_id: u64) -> PathBuf {
    cfg.vnode_dir().join(format!("manifest.c{commit_id}.del"))
}

fn file_name(kind: FileKind, fid: i32, commit_id: u64) -> String {
    match kind {
        FileKind::Stt(level) => format!("v{fid}.c{commit_id}.stt{level}"),
        other => format!("v{fid}.c{commit_id}.{}", other.tag()),
    }
}
