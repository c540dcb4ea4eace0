//! The APFS on-disk structure schemas.
//!
//! Field lists follow the published container and volume superblock
//! layouts, in declaration order. All structures use natural C layout
//! except `wrapped_meta_crypto_state`, which is packed with a 2-byte
//! structure alignment; its size must come out to the sum of its field
//! widths or every later field of `apfs_superblock` shifts.

use crate::{FieldSpec, LayoutError, Packing, StructLayout};

/// Common object header prefixing every on-disk object.
#[must_use]
pub fn obj_phys() -> StructLayout {
    StructLayout::compute(
        "obj_phys",
        Packing::Natural,
        &[
            FieldSpec::bytes("o_cksum", 8),
            FieldSpec::u64("o_oid"),
            FieldSpec::u64("o_xid"),
            FieldSpec::u32("o_type"),
            FieldSpec::u32("o_subtype"),
        ],
    )
}

/// Physical block range.
#[must_use]
pub fn prange() -> StructLayout {
    StructLayout::compute(
        "prange",
        Packing::Natural,
        &[
            FieldSpec::i64("pr_start_paddr"),
            FieldSpec::u64("pr_block_count"),
        ],
    )
}

/// Container superblock.
#[must_use]
pub fn nx_superblock() -> StructLayout {
    let hdr = obj_phys();
    let range = prange();
    StructLayout::compute(
        "nx_superblock",
        Packing::Natural,
        &[
            FieldSpec::nested("nx_o", &hdr),
            FieldSpec::u32("nx_magic"),
            FieldSpec::u32("nx_block_size"),
            FieldSpec::u64("nx_block_count"),
            FieldSpec::u64("nx_features"),
            FieldSpec::u64("nx_readonly_compatible_features"),
            FieldSpec::u64("nx_incompatible_features"),
            FieldSpec::bytes("nx_uuid", 16),
            FieldSpec::u64("nx_next_oid"),
            FieldSpec::u64("nx_next_xid"),
            FieldSpec::u32("nx_xp_desc_blocks"),
            FieldSpec::u32("nx_xp_data_blocks"),
            FieldSpec::i64("nx_xp_desc_base"),
            FieldSpec::i64("nx_xp_data_base"),
            FieldSpec::u32("nx_xp_desc_next"),
            FieldSpec::u32("nx_xp_data_next"),
            FieldSpec::u32("nx_xp_desc_index"),
            FieldSpec::u32("nx_xp_desc_len"),
            FieldSpec::u32("nx_xp_data_index"),
            FieldSpec::u32("nx_xp_data_len"),
            FieldSpec::u64("nx_spaceman_oid"),
            FieldSpec::u64("nx_omap_oid"),
            FieldSpec::u64("nx_reaper_oid"),
            FieldSpec::u32("nx_test_type"),
            FieldSpec::u32("nx_max_file_systems"),
            FieldSpec::array_u64("nx_fs_oid", 100),
            FieldSpec::array_u64("nx_counters", 32),
            FieldSpec::nested("nx_blocked_out_prange", &range),
            FieldSpec::u64("nx_evict_mapping_tree_oid"),
            FieldSpec::u64("nx_flags"),
            FieldSpec::i64("nx_efi_jumpstart"),
            FieldSpec::bytes("nx_fusion_uuid", 16),
            FieldSpec::nested("nx_keylocker", &range),
            FieldSpec::array_u64("nx_ephemeral_info", 4),
            FieldSpec::u64("nx_test_oid"),
            FieldSpec::u64("nx_fusion_mt_oid"),
            FieldSpec::u64("nx_fusion_wbc_oid"),
            FieldSpec::nested("nx_fusion_wbc", &range),
            FieldSpec::u64("nx_newest_mounted_version"),
            FieldSpec::nested("nx_mkb_locker", &range),
        ],
    )
}

/// Object map header.
#[must_use]
pub fn omap_phys() -> StructLayout {
    let hdr = obj_phys();
    StructLayout::compute(
        "omap_phys",
        Packing::Natural,
        &[
            FieldSpec::nested("om_o", &hdr),
            FieldSpec::u32("om_flags"),
            FieldSpec::u32("om_snap_count"),
            FieldSpec::u32("om_tree_type"),
            FieldSpec::u32("om_snapshot_tree_type"),
            FieldSpec::u64("om_tree_oid"),
            FieldSpec::u64("om_snapshot_tree_oid"),
            FieldSpec::u64("om_most_recent_snap"),
            FieldSpec::u64("om_pending_revert_min"),
            FieldSpec::u64("om_pending_revert_max"),
        ],
    )
}

/// Offset+length pair used inside B-tree nodes.
#[must_use]
pub fn nloc() -> StructLayout {
    StructLayout::compute(
        "nloc",
        Packing::Natural,
        &[FieldSpec::u16("off"), FieldSpec::u16("len")],
    )
}

/// Generic B-tree node header, with a trailing variable-length data region.
#[must_use]
pub fn btree_node_phys() -> StructLayout {
    let hdr = obj_phys();
    let loc = nloc();
    StructLayout::compute(
        "btree_node_phys",
        Packing::Natural,
        &[
            FieldSpec::nested("btn_o", &hdr),
            FieldSpec::u16("btn_flags"),
            FieldSpec::u16("btn_level"),
            FieldSpec::u32("btn_nkeys"),
            FieldSpec::nested("btn_table_space", &loc),
            FieldSpec::nested("btn_free_space", &loc),
            FieldSpec::nested("btn_key_free_list", &loc),
            FieldSpec::nested("btn_val_free_list", &loc),
            FieldSpec::flexible_u64("btn_data"),
        ],
    )
}

/// Fixed-size portion of the B-tree metadata record.
#[must_use]
pub fn btree_info_fixed() -> StructLayout {
    StructLayout::compute(
        "btree_info_fixed",
        Packing::Natural,
        &[
            FieldSpec::u32("bt_flags"),
            FieldSpec::u32("bt_node_size"),
            FieldSpec::u32("bt_key_size"),
            FieldSpec::u32("bt_val_size"),
        ],
    )
}

/// B-tree metadata record stored at the tail of root nodes.
#[must_use]
pub fn btree_info() -> StructLayout {
    let fixed = btree_info_fixed();
    StructLayout::compute(
        "btree_info",
        Packing::Natural,
        &[
            FieldSpec::nested("bt_fixed", &fixed),
            FieldSpec::u32("bt_longest_key"),
            FieldSpec::u32("bt_longest_val"),
            FieldSpec::u64("bt_key_count"),
            FieldSpec::u64("bt_node_count"),
        ],
    )
}

/// Per-volume encryption metadata. Packed, 2-byte structure alignment.
#[must_use]
pub fn wrapped_meta_crypto_state() -> StructLayout {
    StructLayout::compute(
        "wrapped_meta_crypto_state",
        Packing::Packed { align: 2 },
        &[
            FieldSpec::u16("major_version"),
            FieldSpec::u16("minor_version"),
            FieldSpec::u32("cpflags"),
            FieldSpec::u32("persistent_class"),
            FieldSpec::u32("key_os_version"),
            FieldSpec::u16("key_revision"),
            FieldSpec::u16("unused"),
        ],
    )
}

/// Audit record of a modifying agent.
#[must_use]
pub fn apfs_modified_by() -> StructLayout {
    StructLayout::compute(
        "apfs_modified_by",
        Packing::Natural,
        &[
            FieldSpec::bytes("id", 32),
            FieldSpec::u64("timestamp"),
            FieldSpec::u64("last_xid"),
        ],
    )
}

/// Volume superblock.
#[must_use]
pub fn apfs_superblock() -> StructLayout {
    let hdr = obj_phys();
    let crypto = wrapped_meta_crypto_state();
    let modified = apfs_modified_by();
    StructLayout::compute(
        "apfs_superblock",
        Packing::Natural,
        &[
            FieldSpec::nested("apfs_o", &hdr),
            FieldSpec::u32("apfs_magic"),
            FieldSpec::u32("apfs_fs_index"),
            FieldSpec::u64("apfs_features"),
            FieldSpec::u64("apfs_readonly_compatible_features"),
            FieldSpec::u64("apfs_incompatible_features"),
            FieldSpec::u64("apfs_unmount_time"),
            FieldSpec::u64("apfs_fs_reserve_block_count"),
            FieldSpec::u64("apfs_fs_quota_block_count"),
            FieldSpec::u64("apfs_fs_alloc_count"),
            FieldSpec::nested("apfs_meta_crypto", &crypto),
            FieldSpec::u32("apfs_root_tree_type"),
            FieldSpec::u32("apfs_extentref_tree_type"),
            FieldSpec::u32("apfs_snap_meta_tree_type"),
            FieldSpec::u64("apfs_omap_oid"),
            FieldSpec::u64("apfs_root_tree_oid"),
            FieldSpec::u64("apfs_extentref_tree_oid"),
            FieldSpec::u64("apfs_snap_meta_tree_oid"),
            FieldSpec::u64("apfs_revert_to_xid"),
            FieldSpec::u64("apfs_revert_to_sblock_oid"),
            FieldSpec::u64("apfs_next_obj_id"),
            FieldSpec::u64("apfs_num_files"),
            FieldSpec::u64("apfs_num_directories"),
            FieldSpec::u64("apfs_num_symlinks"),
            FieldSpec::u64("apfs_num_other_fsobjects"),
            FieldSpec::u64("apfs_num_snapshots"),
            FieldSpec::u64("apfs_total_blocks_alloced"),
            FieldSpec::u64("apfs_total_blocks_freed"),
            FieldSpec::bytes("apfs_vol_uuid", 16),
            FieldSpec::u64("apfs_last_mod_time"),
            FieldSpec::u64("apfs_fs_flags"),
            FieldSpec::nested("apfs_formatted_by", &modified),
            FieldSpec::nested_array("apfs_modified_by", &modified, 8),
            FieldSpec::bytes("apfs_volname", 256),
            FieldSpec::u32("apfs_next_doc_id"),
            FieldSpec::u16("apfs_role"),
            FieldSpec::u16("reserved"),
            FieldSpec::u64("apfs_root_to_xid"),
            FieldSpec::u64("apfs_er_state_oid"),
            FieldSpec::u64("apfs_cloneinfo_id_epoch"),
            FieldSpec::u64("apfs_cloneinfo_xid"),
            FieldSpec::u64("apfs_snap_meta_ext_oid"),
            FieldSpec::bytes("apfs_volume_group_id", 16),
            FieldSpec::u64("apfs_integrity_meta_oid"),
            FieldSpec::u64("apfs_fext_tree_oid"),
            FieldSpec::u32("apfs_fext_tree_type"),
            FieldSpec::u32("reserved_type"),
            FieldSpec::u64("reserved_oid"),
        ],
    )
}

/// Every registered schema, in definition order.
#[must_use]
pub fn registry() -> Vec<StructLayout> {
    vec![
        obj_phys(),
        prange(),
        nx_superblock(),
        omap_phys(),
        nloc(),
        btree_node_phys(),
        btree_info_fixed(),
        btree_info(),
        wrapped_meta_crypto_state(),
        apfs_modified_by(),
        apfs_superblock(),
    ]
}

/// Look up a schema by structure name.
pub fn find(name: &str) -> Result<StructLayout, LayoutError> {
    registry()
        .into_iter()
        .find(|layout| layout.name() == name)
        .ok_or_else(|| LayoutError::UnknownStruct {
            name: name.to_owned(),
        })
}
