//! Little-endian read/write primitives over a growable byte buffer
//!
//! Writes take an explicit offset and grow the buffer when needed, which lets
//! the compiler patch operands (jump targets, slot counts) in place after the
//! fact. Reads are bounds-checked and report the failing offset.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use super::{BytecodeError, Result};

/// Size of one storage entry header: u64 hash + u16 length.
pub const STORAGE_ENTRY_HEADER: usize = 8 + 2;

fn ensure_len(bin: &mut Vec<u8>, end: usize) {
    if bin.len() < end {
        bin.resize(end, 0);
    }
}

fn write_bytes(bin: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    ensure_len(bin, offset + bytes.len());
    bin[offset..offset + bytes.len()].copy_from_slice(bytes);
}

pub fn write_u16(bin: &mut Vec<u8>, offset: usize, value: u16) {
    write_bytes(bin, offset, &value.to_le_bytes());
}

pub fn write_u32(bin: &mut Vec<u8>, offset: usize, value: u32) {
    write_bytes(bin, offset, &value.to_le_bytes());
}

pub fn write_i32(bin: &mut Vec<u8>, offset: usize, value: i32) {
    write_bytes(bin, offset, &value.to_le_bytes());
}

pub fn write_u64(bin: &mut Vec<u8>, offset: usize, value: u64) {
    write_bytes(bin, offset, &value.to_le_bytes());
}

pub fn push_u16(bin: &mut Vec<u8>, value: u16) {
    bin.extend_from_slice(&value.to_le_bytes());
}

pub fn push_u32(bin: &mut Vec<u8>, value: u32) {
    bin.extend_from_slice(&value.to_le_bytes());
}

pub fn push_i32(bin: &mut Vec<u8>, value: i32) {
    bin.extend_from_slice(&value.to_le_bytes());
}

pub fn push_u64(bin: &mut Vec<u8>, value: u64) {
    bin.extend_from_slice(&value.to_le_bytes());
}

fn read_array<const N: usize>(bin: &[u8], offset: usize) -> Result<[u8; N]> {
    bin.get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(BytecodeError::UnexpectedEnd { offset })
}

pub fn read_u8(bin: &[u8], offset: usize) -> Result<u8> {
    bin.get(offset).copied().ok_or(BytecodeError::UnexpectedEnd { offset })
}

pub fn read_u16(bin: &[u8], offset: usize) -> Result<u16> {
    read_array(bin, offset).map(u16::from_le_bytes)
}

pub fn read_u32(bin: &[u8], offset: usize) -> Result<u32> {
    read_array(bin, offset).map(u32::from_le_bytes)
}

pub fn read_i32(bin: &[u8], offset: usize) -> Result<i32> {
    read_array(bin, offset).map(i32::from_le_bytes)
}

pub fn read_u64(bin: &[u8], offset: usize) -> Result<u64> {
    read_array(bin, offset).map(u64::from_le_bytes)
}

/// Structural hash of a byte string. Stable across runs.
pub fn runtime_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// One entry of the storage pool as laid out in the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEntry<'a> {
    pub hash: u64,
    pub bytes: &'a [u8],
}

impl StorageEntry<'_> {
    /// Storage text; invalid UTF-8 is replaced rather than rejected.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.bytes)
    }
}

/// Size of a storage entry holding `text`.
pub fn storage_entry_size(text: &str) -> usize {
    STORAGE_ENTRY_HEADER + text.len()
}

/// Append a storage entry (`u64 hash + u16 length + bytes`).
pub fn push_storage_entry(bin: &mut Vec<u8>, text: &str) -> Result<()> {
    let len = u16::try_from(text.len()).map_err(|_| BytecodeError::StorageTooLarge { len: text.len() })?;
    push_u64(bin, runtime_hash(text.as_bytes()));
    push_u16(bin, len);
    bin.extend_from_slice(text.as_bytes());
    Ok(())
}

/// Read the storage entry starting at `address`.
pub fn read_storage(bin: &[u8], address: usize) -> Result<StorageEntry<'_>> {
    let hash = read_u64(bin, address)?;
    let len = read_u16(bin, address + 8)? as usize;
    let start = address + STORAGE_ENTRY_HEADER;
    let bytes = bin
        .get(start..start + len)
        .ok_or(BytecodeError::UnexpectedEnd { offset: start })?;
    Ok(StorageEntry { hash, bytes })
}
