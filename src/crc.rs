//! CRC32 content primitives.
//!
//! BiReUS verifies every file transition by CRC32, not by the stronger
//! BLAKE3 hash the binary-diff block matcher uses internally — CRC32 is the
//! wire contract (`base_crc`/`target_crc` in `.bireus` manifests) and must
//! match what the original implementation computed, byte for byte.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Sentinel rendered for zero-length files instead of a real CRC32 value.
pub const EMPTY_SENTINEL: &str = "#EMPTY";

/// Sentinel rendered for a file whose contents are described recursively
/// (a zipdelta) instead of checksummed directly.
pub const ZIPFILE_SENTINEL: &str = "#ZIPFILE";

/// Lowercase `0x`-prefixed hex CRC32 of a file's full contents, or
/// [`EMPTY_SENTINEL`] for a zero-length file.
pub fn crc32_hex(path: &Path) -> Result<String> {
    let data = fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(crc32_hex_bytes(&data))
}

/// Lowercase `0x`-prefixed hex CRC32 of an in-memory buffer, or
/// [`EMPTY_SENTINEL`] for an empty buffer.
pub fn crc32_hex_bytes(data: &[u8]) -> String {
    if data.is_empty() {
        return EMPTY_SENTINEL.to_string();
    }
    format!("{:#010x}", crc32fast::hash(data))
}

/// Byte-wise comparison of two files. Does not stat-compare (size/mtime);
/// reads both in full.
pub fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let a_data = fs::read(a).with_context(|| format!("Failed to read file: {}", a.display()))?;
    let b_data = fs::read(b).with_context(|| format!("Failed to read file: {}", b.display()))?;
    Ok(a_data == b_data)
}
