//! Self-delimiting binary encoding of the manifest, plus its trailing
//! checksum.
//!
//! `motedb`'s two manifest prototypes each rolled their own little framing
//! (`len: u32` + `bincode::serialize(record)` in `storage/manifest/manifest.rs`,
//! and a running `u64` hash in `manifest.rs`). Neither is self-describing —
//! a single whole-structure layout with one trailing checksum, decodable
//! without side information — so this module is hand-rolled rather than
//! threaded through `serde`/`bincode`: fixed fields are written as
//! little-endian integers and `n_sets` is a varint, matching the style
//! (and the `integer-encoding` crate) that `anchored-leveldb`'s
//! `version_edit.rs` uses for its own on-disk records.
//!
//! This module knows nothing about paths or the filesystem: it is a pure
//! function of bytes in, `Manifest` out (or vice versa). [`crate::store`]
//! is what attaches a path and turns a [`CodecError`] into the crate's
//! [`crate::error::ManifestError::Corrupted`].

use integer_encoding::{VarInt, VarIntWriter};
use thiserror::Error;

use crate::descriptor::{FileDescriptor, MAX_STT};
use crate::fileset::FileSet;
use crate::manifest::Manifest;
use crate::{checksum, descriptor::FileId};

const VERSION: u8 = 0;
const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("input truncated while decoding {0}")]
    Truncated(&'static str),
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid has_del byte {0}")]
    InvalidHasDel(u8),
    #[error("invalid n_stt {0} (must be 1..={MAX_STT})")]
    InvalidNStt(u8),
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("{0} trailing bytes after the last file set, before the checksum")]
    TrailingBytes(usize),
}

/// Encode a manifest: `encode(decode(b)) == b` for any `b` that decoded
/// successfully.
pub fn encode(m: &Manifest) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(VERSION);

    match &m.del {
        Some(d) => {
            buf.push(1);
            encode_descriptor(&mut buf, d);
        }
        None => buf.push(0),
    }

    buf.write_varint(m.file_sets().len() as u32)
        .expect("writing to a Vec<u8> does not fail");
    for fs in m.file_sets() {
        encode_file_set(&mut buf, fs);
    }

    let checksum = checksum::compute(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// Decode a manifest previously produced by [`encode`]. Fails with
/// [`CodecError::ChecksumMismatch`] if the trailing checksum doesn't match,
/// or with a structural error if the length accounting doesn't land
/// exactly on the checksum boundary.
pub fn decode(bytes: &[u8]) -> Result<Manifest, CodecError> {
    if bytes.len() < CHECKSUM_LEN {
        return Err(CodecError::Truncated("checksum"));
    }
    let (body, checksum_bytes) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
    let actual = checksum::compute(body);
    if actual != expected {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    let mut input = body;

    let version = read_u8(&mut input, "version")?;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let has_del = read_u8(&mut input, "has_del")?;
    let del = match has_del {
        0 => None,
        1 => Some(decode_descriptor(&mut input)?),
        other => return Err(CodecError::InvalidHasDel(other)),
    };

    let (n_sets, used) = u32::decode_var(input).ok_or(CodecError::Truncated("n_sets"))?;
    input = &input[used..];

    let mut file_sets = Vec::with_capacity(n_sets as usize);
    for _ in 0..n_sets {
        file_sets.push(decode_file_set(&mut input)?);
    }

    if !input.is_empty() {
        return Err(CodecError::TrailingBytes(input.len()));
    }

    Ok(Manifest::from_sorted_file_sets(del, file_sets))
}

fn encode_descriptor(buf: &mut Vec<u8>, fd: &FileDescriptor) {
    buf.extend_from_slice(&fd.commit_id().to_le_bytes());
    buf.extend_from_slice(&fd.size().to_le_bytes());
    buf.extend_from_slice(&fd.offset().to_le_bytes());
}

fn decode_descriptor(input: &mut &[u8]) -> Result<FileDescriptor, CodecError> {
    let commit_id = read_u64(input, "descriptor.commit_id")?;
    let size = read_u64(input, "descriptor.size")?;
    let offset = read_u64(input, "descriptor.offset")?;
    // ref is never serialized; every loaded descriptor starts at ref = 1.
    Ok(FileDescriptor::new(commit_id, size, offset))
}

fn encode_file_set(buf: &mut Vec<u8>, fs: &FileSet) {
    buf.push(fs.disk.level);
    buf.extend_from_slice(&fs.disk.id.to_le_bytes());
    buf.extend_from_slice(&fs.fid.to_le_bytes());
    encode_descriptor(buf, &fs.head);
    encode_descriptor(buf, &fs.data);
    encode_descriptor(buf, &fs.sma);
    buf.push(fs.n_stt() as u8);
    for stt in fs.stt() {
        encode_descriptor(buf, stt);
    }
}

fn decode_file_set(input: &mut &[u8]) -> Result<FileSet, CodecError> {
    let level = read_u8(input, "fileset.disk.level")?;
    let id = read_u32(input, "fileset.disk.id")?;
    let fid = read_i32(input, "fileset.fid")?;
    let head = decode_descriptor(input)?;
    let data = decode_descriptor(input)?;
    let sma = decode_descriptor(input)?;
    let n_stt = read_u8(input, "fileset.n_stt")?;
    if n_stt == 0 || n_stt as usize > MAX_STT {
        return Err(CodecError::InvalidNStt(n_stt));
    }
    let mut stt = Vec::with_capacity(n_stt as usize);
    for _ in 0..n_stt {
        stt.push(decode_descriptor(input)?);
    }
    FileSet::new(FileId::new(level, id), fid, head, data, sma, stt)
        .map_err(|_| CodecError::InvalidNStt(n_stt))
}

fn read_u8(input: &mut &[u8], what: &'static str) -> Result<u8, CodecError> {
    if input.is_empty() {
        return Err(CodecError::Truncated(what));
    }
    let v = input[0];
    *input = &input[1..];
    Ok(v)
}

fn read_u32(input: &mut &[u8], what: &'static str) -> Result<u32, CodecError> {
    if input.len() < 4 {
        return Err(CodecError::Truncated(what));
    }
    let (bytes, rest) = input.split_at(4);
    *input = rest;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_i32(input: &mut &[u8], what: &'static str) -> Result<i32, CodecError> {
    read_u32(input, what).map(|v| v as i32)
}

fn read_u64(input: &mut &[u8], what: &'static str) -> Result<u64, CodecError> {
    if input.len() < 8 {
        return Err(CodecError::Truncated(what));
    }
    let (bytes, rest) = input.split_at(8);
    *input = rest;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}
