//! The top-level manifest state.

use crate::descriptor::FileDescriptor;
use crate::fileset::FileSet;

/// The authoritative record of which files constitute the engine's current
/// state: a global tombstone descriptor plus the file sets, sorted
/// strict-ascending by `fid` with no duplicates.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub del: Option<FileDescriptor>,
    file_sets: Vec<FileSet>,
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            del: None,
            file_sets: Vec::new(),
        }
    }

    pub fn file_sets(&self) -> &[FileSet] {
        &self.file_sets
    }

    pub fn file_sets_mut(&mut self) -> &mut Vec<FileSet> {
        &mut self.file_sets
    }

    /// A deep, independent copy: every descriptor is reallocated with
    /// `ref = 1`, sharing no identity with `self`'s descriptors. This is
    /// the right starting point for a `proposed` manifest a caller is
    /// about to hand to `upsert_fset`/`commit1`/`commit2` — unlike
    /// [`crate::snapshot::snapshot`], which shares `self`'s actual
    /// descriptors (incrementing their refs) for readers that need to
    /// outlive concurrent mutation of the live manifest.
    pub fn deep_copy(&self) -> Manifest {
        Manifest {
            del: self.del.as_ref().map(FileDescriptor::deep_copy),
            file_sets: self.file_sets.iter().map(FileSet::deep_copy).collect(),
        }
    }

    /// Construct directly from an already-sorted, already fid-unique list
    /// (used by the codec when loading from disk).
    pub fn from_sorted_file_sets(del: Option<FileDescriptor>, file_sets: Vec<FileSet>) -> Self {
        debug_assert!(is_sorted_unique(&file_sets));
        Self { del, file_sets }
    }

    /// Binary search for the first index `i` with `file_sets[i].fid >= fid`,
    /// the position the upsert algorithm pivots on.
    pub fn lower_bound(&self, fid: i32) -> usize {
        self.file_sets.partition_point(|fs| fs.fid < fid)
    }

    pub fn find(&self, fid: i32) -> Option<&FileSet> {
        let i = self.lower_bound(fid);
        self.file_sets.get(i).filter(|fs| fs.fid == fid)
    }

    #[cfg(test)]
    pub fn is_sorted_unique(&self) -> bool {
        is_sorted_unique(&self.file_sets)
    }
}

fn is_sorted_unique(file_sets: &[FileSet]) -> bool {
    file_sets.windows(2).all(|w| w[0].fid < w[1].fid)
}
