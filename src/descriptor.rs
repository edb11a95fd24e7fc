//! The file descriptor model and its reference counter.
//!
//! `motedb`'s `storage::file_manager::FileRefManager` keyed reference counts
//! by path and tore down a `HashMap` entry on last release; here the count
//! lives directly on the descriptor it protects, since a descriptor (not a
//! path) is the thing multiple manifests point at. We still get the same
//! "last holder frees/unlinks" shape, just attached to the value instead of
//! a registry.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Small compile-time cap on stt levels per file set. `motedb`'s LSM level
/// bookkeeping used a plain `Vec`; a fixed-capacity array with a length
/// prefix is used instead, both for cache locality and so the codec has a
/// size-bounded encoding.
pub const MAX_STT: usize = 8;

/// A storage tier and a disk within that tier. Two `FileId`s are the "same
/// disk" iff both fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub level: u8,
    pub id: u32,
}

impl FileId {
    pub fn new(level: u8, id: u32) -> Self {
        Self { level, id }
    }

    pub fn same_disk(&self, other: &FileId) -> bool {
        self == other
    }
}

/// Which logical file within a file set (or the manifest-global tombstone)
/// a descriptor stands for. `Stt` carries its level index: stt is a bounded
/// array, not a singleton, so the index disambiguates which slot a
/// descriptor occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Head,
    Data,
    Sma,
    Stt(u8),
    Del,
}

impl FileKind {
    /// Short tag used by the path resolver and the codec.
    pub fn tag(&self) -> &'static str {
        match self {
            FileKind::Head => "head",
            FileKind::Data => "data",
            FileKind::Sma => "sma",
            FileKind::Stt(_) => "stt",
            FileKind::Del => "del",
        }
    }
}

#[derive(Debug)]
struct Inner {
    commit_id: u64,
    size: AtomicU64,
    offset: u64,
    ref_count: AtomicU32,
}

/// The persistable identity of one physical file, plus the in-memory
/// reference count that governs its unlink.
///
/// Cloning a `FileDescriptor` is cheap (it's an `Arc` handle) but is *not*
/// by itself a logical reference: the live manifest, a snapshot, and a
/// proposed manifest all point at descriptors, and each such "holder" must
/// call [`FileDescriptor::ref_incr`] when it starts holding and
/// [`FileDescriptor::ref_decr`] when it stops. Plain
/// `clone()` is for code that needs a second handle to the same counter
/// (e.g. to read `size()` concurrently) without becoming a new holder.
#[derive(Debug, Clone)]
pub struct FileDescriptor(Arc<Inner>);

impl FileDescriptor {
    /// A freshly allocated descriptor starts with a ref count of 1.
    pub fn new(commit_id: u64, size: u64, offset: u64) -> Self {
        FileDescriptor(Arc::new(Inner {
            commit_id,
            size: AtomicU64::new(size),
            offset,
            ref_count: AtomicU32::new(1),
        }))
    }

    pub fn commit_id(&self) -> u64 {
        self.0.commit_id
    }

    pub fn size(&self) -> u64 {
        self.0.size.load(Ordering::Acquire)
    }

    /// Grow (or otherwise update) the logical size of a descriptor that is
    /// being extended in place; new size must be `>=` the old one. The
    /// descriptor identity (commit_id) does not change.
    pub fn set_size(&self, new_size: u64) {
        self.0.size.store(new_size, Ordering::Release);
    }

    pub fn offset(&self) -> u64 {
        self.0.offset
    }

    pub fn ref_count(&self) -> u32 {
        self.0.ref_count.load(Ordering::Acquire)
    }

    /// Register a new logical holder. Must observe a pre-existing `ref ≥ 1`;
    /// calling this on a descriptor nobody else holds is a use-after-free
    /// bug in the caller, so we only `debug_assert` it.
    pub fn ref_incr(&self) {
        let prev = self.0.ref_count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "ref_incr observed ref == 0 (use-after-free)");
    }

    /// Release a logical holder. Returns the post-decrement count; `0`
    /// means this was the last holder and the caller must resolve the
    /// descriptor's path and unlink the file.
    #[must_use = "a return of 0 means the caller must unlink the file"]
    pub fn ref_decr(&self) -> u32 {
        let prev = self.0.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "ref_decr underflow");
        prev - 1
    }

    /// Deep copy: a brand new descriptor with the same contents but its own
    /// reference count reset to 1. Used by the upsert and commit engines
    /// whenever a descriptor needs to be allocated fresh by value-copy.
    pub fn deep_copy(&self) -> FileDescriptor {
        FileDescriptor::new(self.commit_id(), self.size(), self.offset())
    }

    /// Two descriptors are logically equal iff `commit_id` matches;
    /// `kind` and `disk` are supplied by the caller's context (the
    /// slot a descriptor occupies and the file set's `disk`), not stored on
    /// the descriptor itself.
    pub fn same_commit(&self, other: &FileDescriptor) -> bool {
        self.commit_id() == other.commit_id()
    }
}
