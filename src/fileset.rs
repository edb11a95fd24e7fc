//! One time-partition's bundle of files.

use crate::descriptor::{FileDescriptor, FileId, FileKind, MAX_STT};
use crate::error::{ManifestError, Result};

/// A bundle of files belonging to one time-partition (`fid`). `head`,
/// `data`, and `sma` are singleton-per-file-set; `stt` is a bounded,
/// ordered array with a runtime count in `1 ..= MAX_STT`.
///
/// `motedb`'s `Version` kept files in a `HashMap<FileType, Vec<FileMetadata>>`
/// grouped by kind across the whole manifest; here each file set owns its
/// own descriptors directly; the manifest is what groups `FileSet`s, sorted
/// by `fid`.
#[derive(Debug, Clone)]
pub struct FileSet {
    pub disk: FileId,
    pub fid: i32,
    pub head: FileDescriptor,
    pub data: FileDescriptor,
    pub sma: FileDescriptor,
    stt: Vec<FileDescriptor>,
}

impl FileSet {
    pub fn new(
        disk: FileId,
        fid: i32,
        head: FileDescriptor,
        data: FileDescriptor,
        sma: FileDescriptor,
        stt: Vec<FileDescriptor>,
    ) -> Result<Self> {
        if stt.is_empty() || stt.len() > MAX_STT {
            return Err(ManifestError::invariant(format!(
                "n_stt must be in 1..={MAX_STT}, got {}",
                stt.len()
            )));
        }
        Ok(Self {
            disk,
            fid,
            head,
            data,
            sma,
            stt,
        })
    }

    pub fn stt(&self) -> &[FileDescriptor] {
        &self.stt
    }

    pub fn n_stt(&self) -> usize {
        self.stt.len()
    }

    /// Direct mutable access to the stt array, for the commit engine's
    /// level-by-level merge. Unlike [`FileSet::set_stt`], this does not
    /// validate the resulting count — the commit engine enforces the
    /// transition legality itself before calling this.
    pub(crate) fn stt_mut(&mut self) -> &mut Vec<FileDescriptor> {
        &mut self.stt
    }

    /// Replace the stt array wholesale. Callers (upsert, commit) are
    /// responsible for enforcing the allowed transitions.
    pub fn set_stt(&mut self, stt: Vec<FileDescriptor>) -> Result<()> {
        if stt.is_empty() || stt.len() > MAX_STT {
            return Err(ManifestError::invariant(format!(
                "n_stt must be in 1..={MAX_STT}, got {}",
                stt.len()
            )));
        }
        self.stt = stt;
        Ok(())
    }

    /// All five-ish descriptor slots (head, data, sma, each stt level),
    /// tagged with the `FileKind` they occupy. Used by REMOVE_OLD and by
    /// the unlink-on-zero path to resolve a per-slot path.
    pub fn descriptors(&self) -> Vec<(FileKind, &FileDescriptor)> {
        let mut v = vec![
            (FileKind::Head, &self.head),
            (FileKind::Data, &self.data),
            (FileKind::Sma, &self.sma),
        ];
        for (i, fd) in self.stt.iter().enumerate() {
            v.push((FileKind::Stt(i as u8), fd));
        }
        v
    }

    /// A deep, independent copy: every descriptor is reallocated with
    /// `ref = 1`. Used to build `proposed` manifests via the upsert engine.
    pub fn deep_copy(&self) -> FileSet {
        FileSet {
            disk: self.disk,
            fid: self.fid,
            head: self.head.deep_copy(),
            data: self.data.deep_copy(),
            sma: self.sma.deep_copy(),
            stt: self.stt.iter().map(FileDescriptor::deep_copy).collect(),
        }
    }
}
