#![forbid(unsafe_code)]
//! Whole-image container inspection.
//!
//! Works on a container image held in memory: block 0 names the checkpoint
//! descriptor area, the newest valid superblock copy in that area wins,
//! and its object map resolves each volume OID to the block holding the
//! volume superblock.

use crate::btree::{BtreeNodePhys, omap_lookup};
use crate::container::{NxSuperblock, OmapPhys};
use crate::object::verify_block_checksum;
use crate::volume::{ApfsSuperblock, VolumeRole};
use nxp_types::{
    BlockSize, NX_MAGIC, Oid, ParseError, Xid, format_uuid, read_le_u32, u64_to_usize,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One volume found in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub fs_oid: Oid,
    pub name: String,
    pub uuid: String,
    pub volume_group_id: Option<String>,
    pub role: VolumeRole,
    pub num_files: u64,
    pub num_directories: u64,
    pub num_snapshots: u64,
    pub last_mod_time: u64,
    pub unencrypted: bool,
}

impl VolumeSummary {
    fn from_superblock(fs_oid: Oid, sb: &ApfsSuperblock) -> Self {
        Self {
            fs_oid,
            name: sb.volname.clone(),
            uuid: format_uuid(sb.vol_uuid),
            volume_group_id: sb
                .has_volume_group()
                .then(|| format_uuid(sb.volume_group_id)),
            role: sb.role,
            num_files: sb.num_files,
            num_directories: sb.num_directories,
            num_snapshots: sb.num_snapshots,
            last_mod_time: sb.last_mod_time,
            unencrypted: sb.fs_flags.is_unencrypted(),
        }
    }
}

/// Container-level inspection result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerReport {
    pub uuid: String,
    pub block_size: u32,
    pub block_count: u64,
    pub checkpoint_xid: Xid,
    pub volumes: Vec<VolumeSummary>,
}

/// Slice one block out of the image.
fn block(image: &[u8], block_size: BlockSize, index: u64) -> Result<&[u8], ParseError> {
    let offset = block_size
        .block_to_byte(index)
        .ok_or(ParseError::IntegerConversion {
            field: "block_offset",
        })?;
    let offset = u64_to_usize(offset, "block_offset")?;
    nxp_types::ensure_slice(image, offset, block_size.get() as usize)
}

/// Parse and checksum-verify the block-0 container superblock.
pub fn load_container_superblock(image: &[u8]) -> Result<NxSuperblock, ParseError> {
    let sb = NxSuperblock::parse(image)?;
    let block0 = block(image, sb.block_size, 0)?;
    verify_block_checksum(block0)?;
    Ok(sb)
}

/// Scan the checkpoint descriptor area for the newest superblock copy.
///
/// Blocks without the NXSB magic are checkpoint maps; copies that fail
/// their checksum are stale writes. Both are skipped. Falls back to the
/// block-0 copy when the area holds nothing newer.
pub fn select_newest_checkpoint(
    image: &[u8],
    base: &NxSuperblock,
) -> Result<NxSuperblock, ParseError> {
    let block_size = base.block_size;
    let desc_base = base.xp_desc_base.to_block_index()?;

    let mut best = base.clone();
    for index in 0..u64::from(base.xp_desc_blocks) {
        let block_index =
            desc_base
                .checked_add(index)
                .ok_or(ParseError::IntegerConversion {
                    field: "xp_desc_base",
                })?;
        let candidate_block = block(image, block_size, block_index)?;

        if read_le_u32(candidate_block, 32)? != NX_MAGIC {
            continue;
        }
        if let Err(err) = verify_block_checksum(candidate_block) {
            debug!(block_index, %err, "skipping checkpoint copy");
            continue;
        }

        let candidate = NxSuperblock::parse(candidate_block)?;
        if candidate.header.xid > best.header.xid {
            best = candidate;
        }
    }

    debug!(xid = best.header.xid.0, "selected checkpoint superblock");
    Ok(best)
}

/// Enumerate the volumes of a container image.
///
/// Resolves each non-zero `nx_fs_oid` through the container object map.
/// Volumes missing from the map are skipped; structurally invalid blocks
/// abort the scan with the parse error.
pub fn scan_volumes(image: &[u8]) -> Result<ContainerReport, ParseError> {
    let base = load_container_superblock(image)?;
    let sb = select_newest_checkpoint(image, &base)?;
    let block_size = sb.block_size;

    let omap_block = block(image, block_size, sb.omap_oid.0)?;
    verify_block_checksum(omap_block)?;
    let omap = OmapPhys::parse(omap_block)?;

    let root_block = block(image, block_size, omap.tree_oid.0)?;
    verify_block_checksum(root_block)?;
    let root = BtreeNodePhys::parse(root_block)?;

    let mut volumes = Vec::with_capacity(sb.fs_oids.len());
    for fs_oid in &sb.fs_oids {
        let Some(mapping) = omap_lookup(root_block, &root, *fs_oid)? else {
            debug!(fs_oid = fs_oid.0, "volume oid not present in object map");
            continue;
        };

        let volume_block = block(image, block_size, mapping.paddr.to_block_index()?)?;
        verify_block_checksum(volume_block)?;
        let volume = ApfsSuperblock::parse(volume_block)?;
        volumes.push(VolumeSummary::from_superblock(*fs_oid, &volume));
    }

    Ok(ContainerReport {
        uuid: format_uuid(sb.uuid),
        block_size: block_size.get(),
        block_count: sb.block_count,
        checkpoint_xid: sb.header.xid,
        volumes,
    })
}
