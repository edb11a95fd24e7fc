//! CRC32 integrity checking for the manifest codec, adapted from `motedb`'s
//! `storage::checksum` module. That module supported a pluggable
//! `ChecksumType` (including a `None` no-op, for data blocks that didn't
//! need it); the manifest always checksums, so this is trimmed to the one
//! algorithm actually in use here.

use crc32fast::Hasher;

/// Checksum of a single buffer.
pub fn compute(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
