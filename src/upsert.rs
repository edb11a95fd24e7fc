//! Build a *proposed* manifest one file set at a time. Pure in-memory
//! bookkeeping; nothing here touches disk or the live
//! manifest directly — the result is handed to [`crate::commit::commit1`]
//! and [`crate::commit::commit2`].

use crate::descriptor::FileDescriptor;
use crate::error::{ManifestError, Result};
use crate::fileset::FileSet;
use crate::manifest::Manifest;

/// Insert `s` into `m`, or merge it into the file set `m` already has at
/// `s.fid`. Ordering is maintained via [`Manifest::lower_bound`]'s binary
/// search. Inserted/merged descriptors are deep copies with `ref = 1`;
/// `s` itself is left untouched.
pub fn upsert_fset(m: &mut Manifest, s: &FileSet) -> Result<()> {
    let i = m.lower_bound(s.fid);
    match m.file_sets().get(i).map(|fs| fs.fid) {
        Some(fid) if fid == s.fid => merge_into(&mut m.file_sets_mut()[i], s),
        _ => {
            m.file_sets_mut().insert(i, s.deep_copy());
            Ok(())
        }
    }
}

fn merge_into(existing: &mut FileSet, s: &FileSet) -> Result<()> {
    let n_old = existing.n_stt();
    let n_new = s.n_stt();
    let overwrite_all = n_new == n_old;
    let append_one = n_new == n_old + 1;
    let collapse = n_new == 1 && n_old >= 1;
    if !(overwrite_all || append_one || collapse) {
        return Err(ManifestError::invariant(format!(
            "upsert_fset: illegal stt transition n_old={n_old} -> n_new={n_new} for fid={}",
            s.fid
        )));
    }

    existing.head = s.head.deep_copy();
    existing.data = s.data.deep_copy();
    existing.sma = s.sma.deep_copy();

    // `existing` is itself a deep copy built earlier in this same proposed
    // manifest, not a live descriptor any reader or commit has seen yet —
    // so there is nothing to ref-decrement here; replacing its stt array
    // wholesale is enough regardless of which of the three transitions
    // this is ((a)/(b) copy everything, (c) `s.stt()` already has len 1).
    let new_stt: Vec<FileDescriptor> = s.stt().iter().map(FileDescriptor::deep_copy).collect();
    existing.set_stt(new_stt)
}

/// Replace or install the manifest-global `del` descriptor by value.
pub fn upsert_del_file(m: &mut Manifest, d: &FileDescriptor) {
    m.del = Some(d.deep_copy());
}
