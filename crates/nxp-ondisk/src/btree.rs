#![forbid(unsafe_code)]
//! B-tree node headers and the object-map leaf lookup.
//!
//! The object map's B-tree stores fixed-size keys and values: the table of
//! contents lives at `btn_table_space.off` past the node header, key data
//! grows forward from the end of the TOC, and value data grows backward
//! from the end of the node (minus the `btree_info` trailer on root
//! nodes).

use crate::object::ObjectHeader;
use nxp_types::{Oid, Paddr, ParseError, Xid, read_le_i64, read_le_u16, read_le_u32, read_le_u64};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// On-disk size of `btree_node_phys` up to the variable data region.
pub const BTREE_NODE_HEADER_SIZE: usize = 56;
/// On-disk size of the `btree_info` trailer on root nodes.
pub const BTREE_INFO_SIZE: usize = 40;

/// `btn_flags`: node is the tree root (and carries the info trailer).
pub const BTNODE_ROOT: u16 = 0x0001;
/// `btn_flags`: node is a leaf.
pub const BTNODE_LEAF: u16 = 0x0002;
/// `btn_flags`: keys and values have fixed sizes; TOC entries are `kvoff`.
pub const BTNODE_FIXED_KV_SIZE: u16 = 0x0004;

const KVOFF_SIZE: usize = 4;
const OMAP_VAL_SIZE: usize = 16;

/// Offset+length pair inside a B-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nloc {
    pub off: u16,
    pub len: u16,
}

impl Nloc {
    pub(crate) fn parse_at(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        Ok(Self {
            off: read_le_u16(data, offset)?,
            len: read_le_u16(data, offset + 2)?,
        })
    }
}

/// Fixed-size table-of-contents entry: key and value offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvOff {
    pub k: u16,
    pub v: u16,
}

/// Generic B-tree node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtreeNodePhys {
    pub header: ObjectHeader,
    pub flags: u16,
    pub level: u16,
    pub nkeys: u32,
    pub table_space: Nloc,
    pub free_space: Nloc,
    pub key_free_list: Nloc,
    pub val_free_list: Nloc,
}

impl BtreeNodePhys {
    /// Parse the node header from the start of an object block.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < BTREE_NODE_HEADER_SIZE {
            return Err(ParseError::InsufficientData {
                needed: BTREE_NODE_HEADER_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }
        Ok(Self {
            header: ObjectHeader::parse(region)?,
            flags: read_le_u16(region, 32)?,
            level: read_le_u16(region, 34)?,
            nkeys: read_le_u32(region, 36)?,
            table_space: Nloc::parse_at(region, 40)?,
            free_space: Nloc::parse_at(region, 44)?,
            key_free_list: Nloc::parse_at(region, 48)?,
            val_free_list: Nloc::parse_at(region, 52)?,
        })
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.flags & BTNODE_ROOT != 0
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    #[must_use]
    pub fn has_fixed_kv_size(&self) -> bool {
        self.flags & BTNODE_FIXED_KV_SIZE != 0
    }
}

/// Fixed-size portion of the B-tree metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtreeInfoFixed {
    pub flags: u32,
    pub node_size: u32,
    pub key_size: u32,
    pub val_size: u32,
}

/// B-tree metadata stored in the last 40 bytes of a root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtreeInfo {
    pub fixed: BtreeInfoFixed,
    pub longest_key: u32,
    pub longest_val: u32,
    pub key_count: u64,
    pub node_count: u64,
}

impl BtreeInfo {
    /// Parse the info trailer from the tail of a root node block.
    pub fn parse_trailer(node_block: &[u8]) -> Result<Self, ParseError> {
        let Some(base) = node_block.len().checked_sub(BTREE_INFO_SIZE) else {
            return Err(ParseError::InsufficientData {
                needed: BTREE_INFO_SIZE,
                offset: 0,
                actual: node_block.len(),
            });
        };
        Ok(Self {
            fixed: BtreeInfoFixed {
                flags: read_le_u32(node_block, base)?,
                node_size: read_le_u32(node_block, base + 4)?,
                key_size: read_le_u32(node_block, base + 8)?,
                val_size: read_le_u32(node_block, base + 12)?,
            },
            longest_key: read_le_u32(node_block, base + 16)?,
            longest_val: read_le_u32(node_block, base + 20)?,
            key_count: read_le_u64(node_block, base + 24)?,
            node_count: read_le_u64(node_block, base + 32)?,
        })
    }
}

/// Object-map B-tree key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmapKey {
    pub oid: Oid,
    pub xid: Xid,
}

/// Object-map B-tree value: the mapped physical location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmapVal {
    pub flags: u32,
    pub size: u32,
    pub paddr: Paddr,
}

/// Look up an OID in a fixed-KV object-map leaf node.
///
/// Only what the container scan needs: level-0 nodes with the
/// FIXED_KV_SIZE flag. Interior nodes and variable-size layouts are
/// rejected as invalid input rather than traversed.
pub fn omap_lookup(
    node_block: &[u8],
    node: &BtreeNodePhys,
    oid: Oid,
) -> Result<Option<OmapVal>, ParseError> {
    if !node.is_leaf() {
        return Err(ParseError::InvalidField {
            field: "btn_level",
            reason: "only leaf object-map nodes are supported",
        });
    }
    if !node.has_fixed_kv_size() {
        return Err(ParseError::InvalidField {
            field: "btn_flags",
            reason: "only fixed-size key/value nodes are supported",
        });
    }

    let nkeys = node.nkeys as usize;
    let toc_len = node.table_space.len as usize;
    if nkeys.saturating_mul(KVOFF_SIZE) > toc_len {
        return Err(ParseError::InvalidField {
            field: "btn_nkeys",
            reason: "key count exceeds the table space",
        });
    }

    let toc_off = BTREE_NODE_HEADER_SIZE + node.table_space.off as usize;
    let key_start = toc_off + toc_len;
    let trailer = if node.is_root() { BTREE_INFO_SIZE } else { 0 };
    let Some(val_end) = node_block.len().checked_sub(trailer) else {
        return Err(ParseError::InsufficientData {
            needed: trailer,
            offset: 0,
            actual: node_block.len(),
        });
    };

    debug!(oid = oid.0, nkeys, toc_off, "omap leaf lookup");

    for index in 0..nkeys {
        let entry_off = toc_off + index * KVOFF_SIZE;
        let entry = KvOff {
            k: read_le_u16(node_block, entry_off)?,
            v: read_le_u16(node_block, entry_off + 2)?,
        };

        let key_off = key_start + entry.k as usize;
        let key = OmapKey {
            oid: Oid(read_le_u64(node_block, key_off)?),
            xid: Xid(read_le_u64(node_block, key_off + 8)?),
        };
        trace!(index, key_oid = key.oid.0, key_xid = key.xid.0, "toc entry");

        if key.oid == oid {
            if (entry.v as usize) < OMAP_VAL_SIZE {
                return Err(ParseError::InvalidField {
                    field: "kvoff.v",
                    reason: "value offset too small for an omap value",
                });
            }
            let Some(val_off) = val_end.checked_sub(entry.v as usize) else {
                return Err(ParseError::InvalidField {
                    field: "kvoff.v",
                    reason: "value offset reaches past the node start",
                });
            };
            return Ok(Some(OmapVal {
                flags: read_le_u32(node_block, val_off)?,
                size: read_le_u32(node_block, val_off + 4)?,
                paddr: Paddr(read_le_i64(node_block, val_off + 8)?),
            }));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
        buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// One-entry fixed-KV root leaf mapping `oid` -> `paddr`.
    fn leaf_node(block_size: usize, oid: u64, paddr: u64) -> Vec<u8> {
        let mut block = vec![0_u8; block_size];
        put_u16(&mut block, 32, BTNODE_ROOT | BTNODE_LEAF | BTNODE_FIXED_KV_SIZE);
        put_u16(&mut block, 34, 0); // level
        put_u32(&mut block, 36, 1); // nkeys
        put_u16(&mut block, 40, 0); // table_space.off
        put_u16(&mut block, 42, 64); // table_space.len

        // TOC entry 0: key offset 0, value offset 16 back from the end.
        put_u16(&mut block, 56, 0);
        put_u16(&mut block, 58, 16);

        // Key data starts after the TOC.
        let key_off = 56 + 64;
        put_u64(&mut block, key_off, oid);
        put_u64(&mut block, key_off + 8, 4); // xid

        // Value grows back from the info trailer.
        let val_off = block_size - BTREE_INFO_SIZE - 16;
        put_u32(&mut block, val_off, 0); // flags
        put_u32(&mut block, val_off + 4, 4096); // size
        put_u64(&mut block, val_off + 8, paddr);

        block
    }

    #[test]
    fn node_header_parse() {
        let block = leaf_node(4096, 1026, 77);
        let node = BtreeNodePhys::parse(&block).expect("node");
        assert!(node.is_root());
        assert!(node.is_leaf());
        assert!(node.has_fixed_kv_size());
        assert_eq!(node.nkeys, 1);
        assert_eq!(node.table_space, Nloc { off: 0, len: 64 });
    }

    #[test]
    fn lookup_finds_mapped_oid() {
        let block = leaf_node(4096, 1026, 77);
        let node = BtreeNodePhys::parse(&block).expect("node");
        let val = omap_lookup(&block, &node, Oid(1026)).expect("lookup");
        assert_eq!(
            val,
            Some(OmapVal {
                flags: 0,
                size: 4096,
                paddr: Paddr(77),
            })
        );
    }

    #[test]
    fn lookup_misses_unmapped_oid() {
        let block = leaf_node(4096, 1026, 77);
        let node = BtreeNodePhys::parse(&block).expect("node");
        assert_eq!(omap_lookup(&block, &node, Oid(9)).expect("lookup"), None);
    }

    #[test]
    fn lookup_rejects_interior_node() {
        let mut block = leaf_node(4096, 1026, 77);
        put_u16(&mut block, 34, 1); // level
        let node = BtreeNodePhys::parse(&block).expect("node");
        assert!(matches!(
            omap_lookup(&block, &node, Oid(1026)),
            Err(ParseError::InvalidField {
                field: "btn_level",
                ..
            })
        ));
    }

    #[test]
    fn lookup_rejects_variable_kv_node() {
        let mut block = leaf_node(4096, 1026, 77);
        put_u16(&mut block, 32, BTNODE_ROOT | BTNODE_LEAF); // no FIXED_KV_SIZE
        let node = BtreeNodePhys::parse(&block).expect("node");
        assert!(matches!(
            omap_lookup(&block, &node, Oid(1026)),
            Err(ParseError::InvalidField {
                field: "btn_flags",
                ..
            })
        ));
    }

    #[test]
    fn lookup_rejects_nkeys_beyond_table_space() {
        let mut block = leaf_node(4096, 1026, 77);
        put_u32(&mut block, 36, 1000); // nkeys far beyond 64 bytes of TOC
        let node = BtreeNodePhys::parse(&block).expect("node");
        assert!(matches!(
            omap_lookup(&block, &node, Oid(1026)),
            Err(ParseError::InvalidField {
                field: "btn_nkeys",
                ..
            })
        ));
    }

    #[test]
    fn non_root_leaf_uses_the_full_tail() {
        let block_size = 4096;
        let mut block = leaf_node(block_size, 1026, 77);
        // Strip the root flag and move the value to the true end.
        put_u16(&mut block, 32, BTNODE_LEAF | BTNODE_FIXED_KV_SIZE);
        let val_off = block_size - 16;
        put_u32(&mut block, val_off, 0);
        put_u32(&mut block, val_off + 4, 4096);
        put_u64(&mut block, val_off + 8, 55);

        let node = BtreeNodePhys::parse(&block).expect("node");
        let val = omap_lookup(&block, &node, Oid(1026)).expect("lookup");
        assert_eq!(val.map(|v| v.paddr), Some(Paddr(55)));
    }

    #[test]
    fn info_trailer_parse() {
        let mut block = vec![0_u8; 4096];
        let base = 4096 - BTREE_INFO_SIZE;
        put_u32(&mut block, base + 4, 4096); // node_size
        put_u32(&mut block, base + 8, 16); // key_size
        put_u32(&mut block, base + 12, 16); // val_size
        put_u64(&mut block, base + 24, 12); // key_count
        put_u64(&mut block, base + 32, 1); // node_count

        let info = BtreeInfo::parse_trailer(&block).expect("info");
        assert_eq!(info.fixed.node_size, 4096);
        assert_eq!(info.key_count, 12);
        assert_eq!(info.node_count, 1);
    }

    #[test]
    fn info_trailer_requires_forty_bytes() {
        assert!(BtreeInfo::parse_trailer(&[0_u8; 39]).is_err());
    }
}
