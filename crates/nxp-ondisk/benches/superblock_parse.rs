#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nxp_ondisk::{ApfsSuperblock, NxSuperblock, fletcher64};

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn nx_region() -> Vec<u8> {
    let mut region = vec![0_u8; 1408];
    put_u32(&mut region, 32, 0x4253_584E); // 'NXSB'
    put_u32(&mut region, 36, 4096);
    put_u32(&mut region, 180, 100);
    region
}

fn apfs_region() -> Vec<u8> {
    let mut region = vec![0_u8; 1056];
    put_u32(&mut region, 32, 0x4253_5041); // 'APSB'
    region[704..704 + 12].copy_from_slice(b"Macintosh HD");
    region
}

fn bench_nx_superblock_parse(c: &mut Criterion) {
    let region = nx_region();
    c.bench_function("nx_superblock_parse", |b| {
        b.iter(|| NxSuperblock::parse(black_box(&region)).expect("nx parse"));
    });
}

fn bench_apfs_superblock_parse(c: &mut Criterion) {
    let region = apfs_region();
    c.bench_function("apfs_superblock_parse", |b| {
        b.iter(|| ApfsSuperblock::parse(black_box(&region)).expect("apfs parse"));
    });
}

fn bench_fletcher64_block(c: &mut Criterion) {
    let block = vec![0x5A_u8; 4096];
    c.bench_function("fletcher64_4k_block", |b| {
        b.iter(|| fletcher64(black_box(&block[8..])));
    });
}

criterion_group!(
    benches,
    bench_nx_superblock_parse,
    bench_apfs_superblock_parse,
    bench_fletcher64_block
);
criterion_main!(benches);
