//! Synthetic container-image builder shared by the integration tests.

use nxp_ondisk::fletcher64;

pub const BLOCK_SIZE: usize = 4096;
pub const VOLUME_OID: u64 = 1026;

pub const NX_BLOCK: usize = 0;
pub const CHECKPOINT_BLOCK: usize = 2;
pub const OMAP_BLOCK: usize = 3;
pub const BTREE_BLOCK: usize = 4;
pub const VOLUME_BLOCK: usize = 5;

pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Write the Fletcher-64 checksum of `block[8..]` into its first 8 bytes.
pub fn seal(block: &mut [u8]) {
    let sum = fletcher64(&block[8..]);
    block[..8].copy_from_slice(&sum.to_le_bytes());
}

/// Re-seal one block of a full image.
pub fn seal_block(image: &mut [u8], index: usize) {
    let start = index * BLOCK_SIZE;
    seal(&mut image[start..start + BLOCK_SIZE]);
}

fn write_nx_superblock(block: &mut [u8], xid: u64) {
    put_u64(block, 8, 1); // oid
    put_u64(block, 16, xid);
    put_u32(block, 24, 0x0001); // NX_SUPERBLOCK
    put_u32(block, 32, 0x4253_584E); // 'NXSB'
    put_u32(block, 36, 4096);
    put_u64(block, 40, 6); // block count
    put_u64(block, 72, 0x11); // uuid first byte
    put_u32(block, 104, 2); // xp_desc_blocks
    put_u64(block, 112, 1); // xp_desc_base
    put_u64(block, 160, OMAP_BLOCK as u64); // omap_oid
    put_u32(block, 180, 100); // max_file_systems
    put_u64(block, 184, VOLUME_OID); // fs_oid[0]
    seal(block);
}

/// A minimal but internally consistent container image:
///
/// | block | content |
/// |---|---|
/// | 0 | NXSB, xid 10 |
/// | 1 | checkpoint map (skipped: no NXSB magic) |
/// | 2 | NXSB copy, xid 12, the newest checkpoint |
/// | 3 | `omap_phys`, tree at block 4 |
/// | 4 | fixed-KV root leaf mapping 1026 -> block 5 |
/// | 5 | APSB "Macintosh HD" |
#[must_use]
pub fn build_container_image() -> Vec<u8> {
    let mut image = vec![0_u8; 6 * BLOCK_SIZE];

    {
        let block = &mut image[..BLOCK_SIZE];
        write_nx_superblock(block, 10);
    }

    {
        let start = BLOCK_SIZE;
        let block = &mut image[start..start + BLOCK_SIZE];
        put_u64(block, 8, 2);
        put_u64(block, 16, 11);
        put_u32(block, 24, 0x000C); // CHECKPOINT_MAP
        seal(block);
    }

    {
        let start = CHECKPOINT_BLOCK * BLOCK_SIZE;
        let block = &mut image[start..start + BLOCK_SIZE];
        write_nx_superblock(block, 12);
    }

    {
        let start = OMAP_BLOCK * BLOCK_SIZE;
        let block = &mut image[start..start + BLOCK_SIZE];
        put_u64(block, 8, OMAP_BLOCK as u64);
        put_u64(block, 16, 12);
        put_u32(block, 24, 0x000B); // OMAP
        put_u64(block, 48, BTREE_BLOCK as u64); // tree_oid
        seal(block);
    }

    {
        let start = BTREE_BLOCK * BLOCK_SIZE;
        let block = &mut image[start..start + BLOCK_SIZE];
        put_u64(block, 8, BTREE_BLOCK as u64);
        put_u64(block, 16, 12);
        put_u32(block, 24, 0x0003); // BTREE_NODE
        put_u16(block, 32, 0x0007); // ROOT | LEAF | FIXED_KV_SIZE
        put_u32(block, 36, 1); // nkeys
        put_u16(block, 40, 0); // table_space.off
        put_u16(block, 42, 64); // table_space.len
        put_u16(block, 56, 0); // kvoff.k
        put_u16(block, 58, 16); // kvoff.v
        let key_off = 56 + 64;
        put_u64(block, key_off, VOLUME_OID);
        put_u64(block, key_off + 8, 12); // xid
        let val_off = BLOCK_SIZE - 40 - 16;
        put_u32(block, val_off + 4, 4096); // size
        put_u64(block, val_off + 8, VOLUME_BLOCK as u64); // paddr
        seal(block);
    }

    {
        let start = VOLUME_BLOCK * BLOCK_SIZE;
        let block = &mut image[start..start + BLOCK_SIZE];
        put_u64(block, 8, VOLUME_OID);
        put_u64(block, 16, 12);
        put_u32(block, 24, 0x000D); // FS
        put_u32(block, 32, 0x4253_5041); // 'APSB'
        put_u64(block, 184, 42); // num_files
        put_u64(block, 192, 7); // num_directories
        put_u64(block, 216, 2); // num_snapshots
        block[240] = 0xAA; // vol_uuid
        put_u64(block, 256, 1_234_567_890); // last_mod_time
        put_u64(block, 264, 0x1); // fs_flags: UNENCRYPTED
        block[272..272 + 5].copy_from_slice(b"newfs");
        put_u64(block, 272 + 40, 1);
        block[704..704 + 12].copy_from_slice(b"Macintosh HD");
        put_u16(block, 964, 0x0040); // role: DATA
        block[1008] = 0xBB; // volume_group_id
        seal(block);
    }

    image
}
