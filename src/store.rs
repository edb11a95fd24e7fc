//! Durable persistence of a [`Manifest`] to a single file, `CURRENT`.
//!
//! `motedb`'s own manifest (`storage/manifest/manifest.rs`) wrote a new
//! `MANIFEST-NNNNNN` log file and pointed `CURRENT` at it with a plain
//! `File::create` + `sync_all` — durable for the manifest file itself, but
//! the pointer update is not atomic with respect to a crash between
//! `create` and `write`. This module instead uses a fixed staging sibling,
//! `CURRENT.t`, whose very existence at open time is the crash signal
//! [`crate::open`] keys its rollback/roll-forward policy on — so the
//! staging name has to be deterministic, not a randomly-named
//! `tempfile::NamedTempFile` as `fjall`'s `value-log` manifest uses for its
//! own atomic rewrite. This follows the same write/fsync/rename shape with
//! `path.t` spelled out explicitly instead.
//!
//! A commit is durable only once [`store`] returns `Ok`; nothing here
//! mutates the in-memory manifest — that's [`crate::commit`]'s job.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::codec;
use crate::error::{ManifestError, Result};
use crate::manifest::Manifest;

/// Read and decode the manifest at `path`. Any I/O failure is
/// [`ManifestError::Io`]; any structural or checksum problem in the bytes
/// becomes [`ManifestError::Corrupted`], tagged with `path` for diagnostics.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load(path: impl AsRef<Path>) -> Result<Manifest> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| ManifestError::io("read manifest", e))?;
    let manifest = codec::decode(&bytes).map_err(|e| ManifestError::corrupted(path, e.to_string()))?;
    debug!(bytes = bytes.len(), file_sets = manifest.file_sets().len(), "manifest loaded");
    Ok(manifest)
}

pub fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// The deterministic staging sibling of `path`, e.g. `CURRENT` → `CURRENT.t`.
pub fn staging_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".t");
    PathBuf::from(name)
}

/// Durably publish `manifest` at `path`: encode, write the full buffer to
/// `path.t`, fsync, close, rename `path.t → path`. On any failure before
/// the rename, `path` is left
/// untouched — the previous manifest (if any) is still what a crash would
/// recover, and a stale `path.t` is resolved by the next [`crate::open`].
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn store(path: impl AsRef<Path>, manifest: &Manifest) -> Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .ok_or_else(|| ManifestError::invariant("manifest path has no parent directory"))?;
    fs::create_dir_all(dir).map_err(|e| ManifestError::io("create vnode directory", e))?;

    let bytes = codec::encode(manifest);
    let staging = staging_sibling(path);

    let mut file = File::create(&staging).map_err(|e| ManifestError::io("create staging file", e))?;
    file.write_all(&bytes)
        .map_err(|e| ManifestError::io("write staging file", e))?;
    file.sync_all()
        .map_err(|e| ManifestError::io("fsync staging file", e))?;
    drop(file);

    fs::rename(&staging, path).map_err(|e| ManifestError::io("rename staging file over final", e))?;
    sync_dir(dir)?;

    debug!(
        bytes = bytes.len(),
        file_sets = manifest.file_sets().len(),
        "manifest committed to disk"
    );
    Ok(())
}

/// fsync the directory entry itself, so the rename survives a crash.
/// Windows has no directory handles to fsync; the rename there is already
/// metadata-journaled by NTFS, so this is a no-op.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    let d = fs::File::open(dir).map_err(|e| ManifestError::io("open directory for fsync", e))?;
    d.sync_all().map_err(|e| ManifestError::io("fsync directory", e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
