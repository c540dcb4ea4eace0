#![forbid(unsafe_code)]
//! Shared scalar types and parse primitives for the nxprobe crates.
//!
//! Everything here is format-level: unit-carrying newtypes for on-disk
//! identifiers, the container geometry constants, and the little-endian
//! read helpers the parsers are built from. No I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Container superblock magic, 'NXSB' little-endian.
pub const NX_MAGIC: u32 = 0x4253_584E;
/// Volume superblock magic, 'APSB' little-endian.
pub const APFS_MAGIC: u32 = 0x4253_5041;

/// Default and minimum container block size.
pub const NX_MINIMUM_BLOCK_SIZE: u32 = 4096;
pub const NX_DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const NX_MAXIMUM_BLOCK_SIZE: u32 = 65536;

/// Maximum number of volumes in a container (`nx_fs_oid` slots).
pub const NX_MAX_FILE_SYSTEMS: usize = 100;
/// Number of container counters (`nx_counters`).
pub const NX_NUM_COUNTERS: usize = 32;
/// Number of ephemeral-info slots (`nx_ephemeral_info`).
pub const NX_EPH_INFO_COUNT: usize = 4;

/// Object checksum width (`o_cksum`).
pub const MAX_CKSUM_SIZE: usize = 8;
/// On-disk size of the common object header (`obj_phys`).
pub const OBJECT_HEADER_SIZE: usize = 32;

/// Modified-by identifier width (`apfs_modified_by.id`).
pub const APFS_MODIFIED_NAMELEN: usize = 32;
/// Modified-by history depth (`apfs_modified_by` slots).
pub const APFS_MAX_HIST: usize = 8;
/// Volume name width (`apfs_volname`).
pub const APFS_VOLNAME_LEN: usize = 256;

// ── Object types (low 16 bits of o_type) ────────────────────────────────────

pub const OBJECT_TYPE_NX_SUPERBLOCK: u32 = 0x0001;
pub const OBJECT_TYPE_BTREE: u32 = 0x0002;
pub const OBJECT_TYPE_BTREE_NODE: u32 = 0x0003;
pub const OBJECT_TYPE_SPACEMAN: u32 = 0x0005;
pub const OBJECT_TYPE_OMAP: u32 = 0x000B;
pub const OBJECT_TYPE_CHECKPOINT_MAP: u32 = 0x000C;
pub const OBJECT_TYPE_FS: u32 = 0x000D;

/// Mask selecting the object type from `o_type`.
pub const OBJECT_TYPE_MASK: u32 = 0x0000_FFFF;
/// Mask selecting the storage class from `o_type`.
pub const OBJ_STORAGE_TYPE_MASK: u32 = 0xC000_0000;
pub const OBJ_VIRTUAL: u32 = 0x0000_0000;
pub const OBJ_EPHEMERAL: u32 = 0x8000_0000;
pub const OBJ_PHYSICAL: u32 = 0x4000_0000;

/// Object identifier. Virtual OIDs resolve through the object map;
/// physical OIDs are block addresses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Oid(pub u64);

impl Oid {
    /// An all-zero OID marks an empty slot.
    pub const INVALID: Self = Self(0);
    /// Fixed OID of the container superblock.
    pub const NX_SUPERBLOCK: Self = Self(1);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Transaction identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Xid(pub u64);

/// Physical block address. Signed on disk; negative values never occur in
/// the structures this crate reads, so conversion to a block index is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Paddr(pub i64);

impl Paddr {
    /// Convert to an unsigned block index, rejecting negative addresses.
    pub fn to_block_index(self) -> Result<u64, ParseError> {
        u64::try_from(self.0).map_err(|_| ParseError::InvalidField {
            field: "paddr",
            reason: "negative physical address",
        })
    }
}

/// Validated container block size (power of two in 4096..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [4096, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(NX_MINIMUM_BLOCK_SIZE..=NX_MAXIMUM_BLOCK_SIZE).contains(&value)
        {
            return Err(ParseError::InvalidField {
                field: "nx_block_size",
                reason: "must be power of two in 4096..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of bits to shift to convert between bytes and blocks.
    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Byte offset of a block index, `None` on overflow.
    #[must_use]
    pub fn block_to_byte(self, block: u64) -> Option<u64> {
        block.checked_mul(u64::from(self.0))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
    #[error("object checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { stored: u64, computed: u64 },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_le_i64(data: &[u8], offset: usize) -> Result<i64, ParseError> {
    read_le_u64(data, offset).map(|raw| i64::from_le_bytes(raw.to_le_bytes()))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Decode a NUL-padded byte field into a trimmed string.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

/// Format a 16-byte UUID field in hyphenated form.
#[must_use]
pub fn format_uuid(bytes: [u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Paddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
