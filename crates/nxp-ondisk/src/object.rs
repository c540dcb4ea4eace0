#![forbid(unsafe_code)]
//! The common object header and the Fletcher-64 object checksum.

use nxp_types::{
    OBJ_STORAGE_TYPE_MASK, OBJECT_HEADER_SIZE, OBJECT_TYPE_MASK, Oid, ParseError, Xid,
    read_le_u32, read_le_u64,
};
use serde::{Deserialize, Serialize};

/// 32-byte header prefixing every on-disk object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub checksum: u64,
    pub oid: Oid,
    pub xid: Xid,
    /// Raw `o_type`: object type in the low 16 bits, storage flags in the
    /// high bits.
    pub object_type: u32,
    pub subtype: u32,
}

impl ObjectHeader {
    pub const SIZE: usize = OBJECT_HEADER_SIZE;

    /// Parse the header from the first 32 bytes of an object block.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < Self::SIZE {
            return Err(ParseError::InsufficientData {
                needed: Self::SIZE,
                offset: 0,
                actual: data.len(),
            });
        }
        Ok(Self {
            checksum: read_le_u64(data, 0)?,
            oid: Oid(read_le_u64(data, 8)?),
            xid: Xid(read_le_u64(data, 16)?),
            object_type: read_le_u32(data, 24)?,
            subtype: read_le_u32(data, 28)?,
        })
    }

    /// The object type code (low 16 bits of `o_type`).
    #[must_use]
    pub fn type_code(&self) -> u32 {
        self.object_type & OBJECT_TYPE_MASK
    }

    /// The storage-class bits of `o_type`.
    #[must_use]
    pub fn storage_class(&self) -> u32 {
        self.object_type & OBJ_STORAGE_TYPE_MASK
    }
}

/// APFS Fletcher-64 checksum over `data`.
///
/// Operates on little-endian 32-bit words with modulus `2^32 - 1`. The
/// input is the object block starting at byte 8 (past the checksum field);
/// block sizes keep the length a multiple of four.
#[must_use]
pub fn fletcher64(data: &[u8]) -> u64 {
    const MOD: u64 = 0xFFFF_FFFF;

    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;
    for chunk in data.chunks_exact(4) {
        let word = u64::from(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        sum1 = (sum1 + word) % MOD;
        sum2 = (sum2 + sum1) % MOD;
    }

    let check1 = MOD - ((sum1 + sum2) % MOD);
    let check2 = MOD - ((sum1 + check1) % MOD);
    (check2 << 32) | check1
}

/// Verify the checksum stored in the first 8 bytes of an object block.
pub fn verify_block_checksum(block: &[u8]) -> Result<(), ParseError> {
    let stored = read_le_u64(block, 0)?;
    let computed = fletcher64(&block[8..]);
    if stored != computed {
        return Err(ParseError::ChecksumMismatch { stored, computed });
    }
    Ok(())
}
