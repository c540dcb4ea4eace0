#![forbid(unsafe_code)]
//! Container-level structures: `nx_superblock` and the object map header.

use crate::object::ObjectHeader;
use crate::{describe_flags, format_flags};
use nxp_types::{
    BlockSize, NX_MAGIC, NX_MAX_FILE_SYSTEMS, NX_NUM_COUNTERS, Oid, Paddr, ParseError, Xid,
    read_fixed, read_le_i64, read_le_u32, read_le_u64,
};
use serde::{Deserialize, Serialize};

/// On-disk size of `nx_superblock`.
pub const NX_SUPERBLOCK_SIZE: usize = 1408;
/// On-disk size of `omap_phys`.
pub const OMAP_PHYS_SIZE: usize = 88;

/// Container feature flags (`nx_features`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NxFeatures(pub u64);

impl NxFeatures {
    pub const DEFRAG: Self = Self(0x0000_0000_0000_0001);
    pub const LCFD: Self = Self(0x0000_0000_0000_0002);

    const KNOWN: &[(u64, &'static str)] = &[(0x1, "DEFRAG"), (0x2, "LCFD")];

    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }
}

impl std::fmt::Display for NxFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Container incompatible feature flags (`nx_incompatible_features`).
///
/// Unknown bits mean the container format is newer than this reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NxIncompatFeatures(pub u64);

impl NxIncompatFeatures {
    pub const VERSION1: Self = Self(0x0000_0000_0000_0001);
    pub const VERSION2: Self = Self(0x0000_0000_0000_0002);
    pub const FUSION: Self = Self(0x0000_0000_0000_0100);

    const KNOWN: &[(u64, &'static str)] =
        &[(0x1, "VERSION1"), (0x2, "VERSION2"), (0x100, "FUSION")];

    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    /// Bits not covered by any named constant.
    #[must_use]
    pub fn unknown_bits(self) -> u64 {
        let known_mask: u64 = Self::KNOWN.iter().map(|(bit, _)| bit).fold(0, |a, b| a | b);
        self.0 & !known_mask
    }
}

impl std::fmt::Display for NxIncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Physical block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prange {
    pub start_paddr: Paddr,
    pub block_count: u64,
}

impl Prange {
    pub(crate) fn parse_at(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        Ok(Self {
            start_paddr: Paddr(read_le_i64(data, offset)?),
            block_count: read_le_u64(data, offset + 8)?,
        })
    }
}

/// Container superblock (NXSB).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NxSuperblock {
    pub header: ObjectHeader,
    pub magic: u32,
    pub block_size: BlockSize,
    pub block_count: u64,

    // ── Features ─────────────────────────────────────────────────────────
    pub features: NxFeatures,
    pub readonly_compatible_features: u64,
    pub incompatible_features: NxIncompatFeatures,

    // ── Identity ─────────────────────────────────────────────────────────
    pub uuid: [u8; 16],
    pub next_oid: Oid,
    pub next_xid: Xid,

    // ── Checkpoint areas ─────────────────────────────────────────────────
    pub xp_desc_blocks: u32,
    pub xp_data_blocks: u32,
    pub xp_desc_base: Paddr,
    pub xp_data_base: Paddr,
    pub xp_desc_next: u32,
    pub xp_data_next: u32,
    pub xp_desc_index: u32,
    pub xp_desc_len: u32,
    pub xp_data_index: u32,
    pub xp_data_len: u32,

    // ── Top-level object ids ─────────────────────────────────────────────
    pub spaceman_oid: Oid,
    pub omap_oid: Oid,
    pub reaper_oid: Oid,
    pub max_file_systems: u32,
    /// Non-zero volume superblock OIDs, declaration order preserved.
    pub fs_oids: Vec<Oid>,

    // ── Counters & ranges ────────────────────────────────────────────────
    pub counters: [u64; NX_NUM_COUNTERS],
    pub blocked_out_prange: Prange,
    pub evict_mapping_tree_oid: Oid,
    pub flags: u64,
    pub efi_jumpstart: Paddr,

    // ── Fusion & keybag ──────────────────────────────────────────────────
    pub fusion_uuid: [u8; 16],
    pub keylocker: Prange,
    pub ephemeral_info: [u64; 4],
    pub fusion_mt_oid: Oid,
    pub fusion_wbc_oid: Oid,
    pub fusion_wbc: Prange,
    pub newest_mounted_version: u64,
    pub mkb_locker: Prange,
}

impl NxSuperblock {
    /// Parse a container superblock from the start of an object block.
    #[allow(clippy::too_many_lines)]
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < NX_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: NX_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u32(region, 32)?;
        if magic != NX_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(NX_MAGIC),
                actual: u64::from(magic),
            });
        }

        let block_size = BlockSize::new(read_le_u32(region, 36)?)?;

        let max_file_systems = read_le_u32(region, 180)?;
        if max_file_systems as usize > NX_MAX_FILE_SYSTEMS {
            return Err(ParseError::InvalidField {
                field: "nx_max_file_systems",
                reason: "exceeds the 100-slot fs table",
            });
        }

        let mut fs_oids = Vec::new();
        for slot in 0..NX_MAX_FILE_SYSTEMS {
            let oid = Oid(read_le_u64(region, 184 + 8 * slot)?);
            if oid.is_valid() {
                fs_oids.push(oid);
            }
        }

        let mut counters = [0_u64; NX_NUM_COUNTERS];
        for (slot, counter) in counters.iter_mut().enumerate() {
            *counter = read_le_u64(region, 984 + 8 * slot)?;
        }

        let mut ephemeral_info = [0_u64; 4];
        for (slot, info) in ephemeral_info.iter_mut().enumerate() {
            *info = read_le_u64(region, 1312 + 8 * slot)?;
        }

        Ok(Self {
            header: ObjectHeader::parse(region)?,
            magic,
            block_size,
            block_count: read_le_u64(region, 40)?,

            features: NxFeatures(read_le_u64(region, 48)?),
            readonly_compatible_features: read_le_u64(region, 56)?,
            incompatible_features: NxIncompatFeatures(read_le_u64(region, 64)?),

            uuid: read_fixed::<16>(region, 72)?,
            next_oid: Oid(read_le_u64(region, 88)?),
            next_xid: Xid(read_le_u64(region, 96)?),

            xp_desc_blocks: read_le_u32(region, 104)?,
            xp_data_blocks: read_le_u32(region, 108)?,
            xp_desc_base: Paddr(read_le_i64(region, 112)?),
            xp_data_base: Paddr(read_le_i64(region, 120)?),
            xp_desc_next: read_le_u32(region, 128)?,
            xp_data_next: read_le_u32(region, 132)?,
            xp_desc_index: read_le_u32(region, 136)?,
            xp_desc_len: read_le_u32(region, 140)?,
            xp_data_index: read_le_u32(region, 144)?,
            xp_data_len: read_le_u32(region, 148)?,

            spaceman_oid: Oid(read_le_u64(region, 152)?),
            omap_oid: Oid(read_le_u64(region, 160)?),
            reaper_oid: Oid(read_le_u64(region, 168)?),
            max_file_systems,
            fs_oids,

            counters,
            blocked_out_prange: Prange::parse_at(region, 1240)?,
            evict_mapping_tree_oid: Oid(read_le_u64(region, 1256)?),
            flags: read_le_u64(region, 1264)?,
            efi_jumpstart: Paddr(read_le_i64(region, 1272)?),

            fusion_uuid: read_fixed::<16>(region, 1280)?,
            keylocker: Prange::parse_at(region, 1296)?,
            ephemeral_info,
            fusion_mt_oid: Oid(read_le_u64(region, 1344)?),
            fusion_wbc_oid: Oid(read_le_u64(region, 1352)?),
            fusion_wbc: Prange::parse_at(region, 1368)?,
            newest_mounted_version: read_le_u64(region, 1384)?,
            mkb_locker: Prange::parse_at(region, 1392)?,
        })
    }
}

/// Object map header (`omap_phys`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmapPhys {
    pub header: ObjectHeader,
    pub flags: u32,
    pub snap_count: u32,
    pub tree_type: u32,
    pub snapshot_tree_type: u32,
    pub tree_oid: Oid,
    pub snapshot_tree_oid: Oid,
    pub most_recent_snap: Xid,
    pub pending_revert_min: Xid,
    pub pending_revert_max: Xid,
}

impl OmapPhys {
    pub const SIZE: usize = OMAP_PHYS_SIZE;

    /// Parse an object map header from the start of an object block.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < Self::SIZE {
            return Err(ParseError::InsufficientData {
                needed: Self::SIZE,
                offset: 0,
                actual: region.len(),
            });
        }
        Ok(Self {
            header: ObjectHeader::parse(region)?,
            flags: read_le_u32(region, 32)?,
            snap_count: read_le_u32(region, 36)?,
            tree_type: read_le_u32(region, 40)?,
            snapshot_tree_type: read_le_u32(region, 44)?,
            tree_oid: Oid(read_le_u64(region, 48)?),
            snapshot_tree_oid: Oid(read_le_u64(region, 56)?),
            most_recent_snap: Xid(read_le_u64(region, 64)?),
            pending_revert_min: Xid(read_le_u64(region, 72)?),
            pending_revert_max: Xid(read_le_u64(region, 80)?),
        })
    }
}
