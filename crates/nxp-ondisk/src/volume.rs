#![forbid(unsafe_code)]
//! Volume-level structures: `apfs_superblock` and its embedded records.

use crate::object::ObjectHeader;
use crate::{describe_flags, format_flags};
use nxp_types::{
    APFS_MAGIC, APFS_MAX_HIST, APFS_MODIFIED_NAMELEN, Oid, ParseError, Xid, read_fixed,
    read_le_u16, read_le_u32, read_le_u64, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

/// On-disk size of `apfs_superblock`.
pub const APFS_SUPERBLOCK_SIZE: usize = 1056;
/// On-disk size of one `apfs_modified_by` record.
pub const APFS_MODIFIED_BY_SIZE: usize = 48;
/// On-disk size of `wrapped_meta_crypto_state` (packed, zero padding).
pub const META_CRYPTO_STATE_SIZE: usize = 20;

const FORMATTED_BY_OFFSET: usize = 272;
const MODIFIED_BY_OFFSET: usize = 320;
const VOLNAME_OFFSET: usize = 704;

/// Volume feature flags (`apfs_features`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApfsFeatures(pub u64);

impl ApfsFeatures {
    pub const DEFRAG_PRERELEASE: Self = Self(0x0000_0000_0000_0001);
    pub const HARDLINK_MAP_RECORDS: Self = Self(0x0000_0000_0000_0002);
    pub const DEFRAG: Self = Self(0x0000_0000_0000_0004);
    pub const STRICTATIME: Self = Self(0x0000_0000_0000_0008);
    pub const VOLGRP_SYSTEM_INO_SPACE: Self = Self(0x0000_0000_0000_0010);

    const KNOWN: &[(u64, &'static str)] = &[
        (0x01, "DEFRAG_PRERELEASE"),
        (0x02, "HARDLINK_MAP_RECORDS"),
        (0x04, "DEFRAG"),
        (0x08, "STRICTATIME"),
        (0x10, "VOLGRP_SYSTEM_INO_SPACE"),
    ];

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

impl std::fmt::Display for ApfsFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Volume incompatible feature flags (`apfs_incompatible_features`).
///
/// Unknown bits mean the volume format is newer than this reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApfsIncompatFeatures(pub u64);

impl ApfsIncompatFeatures {
    pub const CASE_INSENSITIVE: Self = Self(0x0000_0000_0000_0001);
    pub const DATALESS_SNAPS: Self = Self(0x0000_0000_0000_0002);
    pub const ENC_ROLLED: Self = Self(0x0000_0000_0000_0004);
    pub const NORMALIZATION_INSENSITIVE: Self = Self(0x0000_0000_0000_0008);
    pub const INCOMPLETE_RESTORE: Self = Self(0x0000_0000_0000_0010);
    pub const SEALED_VOLUME: Self = Self(0x0000_0000_0000_0020);

    const KNOWN: &[(u64, &'static str)] = &[
        (0x01, "CASE_INSENSITIVE"),
        (0x02, "DATALESS_SNAPS"),
        (0x04, "ENC_ROLLED"),
        (0x08, "NORMALIZATION_INSENSITIVE"),
        (0x10, "INCOMPLETE_RESTORE"),
        (0x20, "SEALED_VOLUME"),
    ];

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

impl std::fmt::Display for ApfsIncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Volume state flags (`apfs_fs_flags`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApfsFsFlags(pub u64);

impl ApfsFsFlags {
    pub const UNENCRYPTED: Self = Self(0x0000_0000_0000_0001);
    pub const ONEKEY: Self = Self(0x0000_0000_0000_0008);
    pub const SPILLEDOVER: Self = Self(0x0000_0000_0000_0010);
    pub const RUN_SPILLOVER_CLEANER: Self = Self(0x0000_0000_0000_0020);
    pub const ALWAYS_CHECK_EXTENTREF: Self = Self(0x0000_0000_0000_0040);

    const KNOWN: &[(u64, &'static str)] = &[
        (0x01, "UNENCRYPTED"),
        (0x08, "ONEKEY"),
        (0x10, "SPILLEDOVER"),
        (0x20, "RUN_SPILLOVER_CLEANER"),
        (0x40, "ALWAYS_CHECK_EXTENTREF"),
    ];

    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Whether the volume's metadata is stored unencrypted.
    #[must_use]
    pub fn is_unencrypted(self) -> bool {
        self.contains(Self::UNENCRYPTED)
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }
}

impl std::fmt::Display for ApfsFsFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Volume role bits (`apfs_role`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRole(pub u16);

impl VolumeRole {
    pub const NONE: Self = Self(0x0000);
    pub const SYSTEM: Self = Self(0x0001);
    pub const USER: Self = Self(0x0002);
    pub const RECOVERY: Self = Self(0x0004);
    pub const VM: Self = Self(0x0008);
    pub const PREBOOT: Self = Self(0x0010);
    pub const INSTALLER: Self = Self(0x0020);
    pub const DATA: Self = Self(0x0040);
    pub const BASEBAND: Self = Self(0x0080);

    const KNOWN: &[(u64, &'static str)] = &[
        (0x01, "SYSTEM"),
        (0x02, "USER"),
        (0x04, "RECOVERY"),
        (0x08, "VM"),
        (0x10, "PREBOOT"),
        (0x20, "INSTALLER"),
        (0x40, "DATA"),
        (0x80, "BASEBAND"),
    ];

    #[must_use]
    pub fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn contains(self, role: Self) -> bool {
        (self.0 & role.0) != 0
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(u64::from(self.0), Self::KNOWN)
    }
}

impl std::fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, u64::from(self.0), Self::KNOWN)
    }
}

/// Per-volume encryption metadata (`wrapped_meta_crypto_state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedMetaCryptoState {
    pub major_version: u16,
    pub minor_version: u16,
    pub cpflags: u32,
    pub persistent_class: u32,
    pub key_os_version: u32,
    pub key_revision: u16,
}

impl WrappedMetaCryptoState {
    /// Parse the packed 20-byte record at `offset`. The layout has no
    /// inter-field padding; every later superblock field depends on that.
    pub(crate) fn parse_at(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        Ok(Self {
            major_version: read_le_u16(data, offset)?,
            minor_version: read_le_u16(data, offset + 2)?,
            cpflags: read_le_u32(data, offset + 4)?,
            persistent_class: read_le_u32(data, offset + 8)?,
            key_os_version: read_le_u32(data, offset + 12)?,
            key_revision: read_le_u16(data, offset + 16)?,
        })
    }
}

/// Audit record of a modifying agent (`apfs_modified_by`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApfsModifiedBy {
    pub id: String,
    pub timestamp: u64,
    pub last_xid: Xid,
}

impl ApfsModifiedBy {
    /// Parse one 48-byte record; all-zero slots yield `None`.
    pub(crate) fn parse_at(data: &[u8], offset: usize) -> Result<Option<Self>, ParseError> {
        let raw_id = read_fixed::<APFS_MODIFIED_NAMELEN>(data, offset)?;
        let timestamp = read_le_u64(data, offset + 32)?;
        let last_xid = read_le_u64(data, offset + 40)?;
        if raw_id.iter().all(|b| *b == 0) && timestamp == 0 && last_xid == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            id: trim_nul_padded(&raw_id),
            timestamp,
            last_xid: Xid(last_xid),
        }))
    }
}

/// Volume superblock (APSB).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApfsSuperblock {
    pub header: ObjectHeader,
    pub magic: u32,
    pub fs_index: u32,

    // ── Features ─────────────────────────────────────────────────────────
    pub features: ApfsFeatures,
    pub readonly_compatible_features: u64,
    pub incompatible_features: ApfsIncompatFeatures,

    // ── Space accounting ─────────────────────────────────────────────────
    pub unmount_time: u64,
    pub fs_reserve_block_count: u64,
    pub fs_quota_block_count: u64,
    pub fs_alloc_count: u64,

    // ── Encryption ───────────────────────────────────────────────────────
    pub meta_crypto: WrappedMetaCryptoState,

    // ── Trees ────────────────────────────────────────────────────────────
    pub root_tree_type: u32,
    pub extentref_tree_type: u32,
    pub snap_meta_tree_type: u32,
    pub omap_oid: Oid,
    pub root_tree_oid: Oid,
    pub extentref_tree_oid: Oid,
    pub snap_meta_tree_oid: Oid,

    // ── Revert state ─────────────────────────────────────────────────────
    pub revert_to_xid: Xid,
    pub revert_to_sblock_oid: Oid,

    // ── Object counts ────────────────────────────────────────────────────
    pub next_obj_id: u64,
    pub num_files: u64,
    pub num_directories: u64,
    pub num_symlinks: u64,
    pub num_other_fsobjects: u64,
    pub num_snapshots: u64,
    pub total_blocks_alloced: u64,
    pub total_blocks_freed: u64,

    // ── Identity ─────────────────────────────────────────────────────────
    pub vol_uuid: [u8; 16],
    pub last_mod_time: u64,
    pub fs_flags: ApfsFsFlags,
    pub formatted_by: Option<ApfsModifiedBy>,
    pub modified_by: Vec<ApfsModifiedBy>,
    pub volname: String,
    pub next_doc_id: u32,
    pub role: VolumeRole,

    // ── Extended state ───────────────────────────────────────────────────
    pub root_to_xid: Xid,
    pub er_state_oid: Oid,
    pub cloneinfo_id_epoch: u64,
    pub cloneinfo_xid: u64,
    pub snap_meta_ext_oid: Oid,
    pub volume_group_id: [u8; 16],
    pub integrity_meta_oid: Oid,
    pub fext_tree_oid: Oid,
    pub fext_tree_type: u32,
}

impl ApfsSuperblock {
    /// Parse a volume superblock from the start of an object block.
    #[allow(clippy::too_many_lines)]
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < APFS_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: APFS_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u32(region, 32)?;
        if magic != APFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(APFS_MAGIC),
                actual: u64::from(magic),
            });
        }

        let mut modified_by = Vec::new();
        for slot in 0..APFS_MAX_HIST {
            let offset = MODIFIED_BY_OFFSET + slot * APFS_MODIFIED_BY_SIZE;
            if let Some(entry) = ApfsModifiedBy::parse_at(region, offset)? {
                modified_by.push(entry);
            }
        }

        Ok(Self {
            header: ObjectHeader::parse(region)?,
            magic,
            fs_index: read_le_u32(region, 36)?,

            features: ApfsFeatures(read_le_u64(region, 40)?),
            readonly_compatible_features: read_le_u64(region, 48)?,
            incompatible_features: ApfsIncompatFeatures(read_le_u64(region, 56)?),

            unmount_time: read_le_u64(region, 64)?,
            fs_reserve_block_count: read_le_u64(region, 72)?,
            fs_quota_block_count: read_le_u64(region, 80)?,
            fs_alloc_count: read_le_u64(region, 88)?,

            meta_crypto: WrappedMetaCryptoState::parse_at(region, 96)?,

            root_tree_type: read_le_u32(region, 116)?,
            extentref_tree_type: read_le_u32(region, 120)?,
            snap_meta_tree_type: read_le_u32(region, 124)?,
            omap_oid: Oid(read_le_u64(region, 128)?),
            root_tree_oid: Oid(read_le_u64(region, 136)?),
            extentref_tree_oid: Oid(read_le_u64(region, 144)?),
            snap_meta_tree_oid: Oid(read_le_u64(region, 152)?),

            revert_to_xid: Xid(read_le_u64(region, 160)?),
            revert_to_sblock_oid: Oid(read_le_u64(region, 168)?),

            next_obj_id: read_le_u64(region, 176)?,
            num_files: read_le_u64(region, 184)?,
            num_directories: read_le_u64(region, 192)?,
            num_symlinks: read_le_u64(region, 200)?,
            num_other_fsobjects: read_le_u64(region, 208)?,
            num_snapshots: read_le_u64(region, 216)?,
            total_blocks_alloced: read_le_u64(region, 224)?,
            total_blocks_freed: read_le_u64(region, 232)?,

            vol_uuid: read_fixed::<16>(region, 240)?,
            last_mod_time: read_le_u64(region, 256)?,
            fs_flags: ApfsFsFlags(read_le_u64(region, 264)?),
            formatted_by: ApfsModifiedBy::parse_at(region, FORMATTED_BY_OFFSET)?,
            modified_by,
            volname: trim_nul_padded(&read_fixed::<256>(region, VOLNAME_OFFSET)?),
            next_doc_id: read_le_u32(region, 960)?,
            role: VolumeRole(read_le_u16(region, 964)?),

            root_to_xid: Xid(read_le_u64(region, 968)?),
            er_state_oid: Oid(read_le_u64(region, 976)?),
            cloneinfo_id_epoch: read_le_u64(region, 984)?,
            cloneinfo_xid: read_le_u64(region, 992)?,
            snap_meta_ext_oid: Oid(read_le_u64(region, 1000)?),
            volume_group_id: read_fixed::<16>(region, 1008)?,
            integrity_meta_oid: Oid(read_le_u64(region, 1024)?),
            fext_tree_oid: Oid(read_le_u64(region, 1032)?),
            fext_tree_type: read_le_u32(region, 1040)?,
        })
    }

    /// Whether the volume belongs to a volume group.
    #[must_use]
    pub fn has_volume_group(&self) -> bool {
        self.volume_group_id.iter().any(|b| *b != 0)
    }
}
