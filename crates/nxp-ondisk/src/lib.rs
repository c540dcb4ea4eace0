#![forbid(unsafe_code)]
//! On-disk format parsing for APFS container and volume metadata.
//!
//! Parsing only: no I/O, no side effects. Byte slices go in, typed
//! structures come out, for the container superblock, object map, B-tree
//! node headers, and volume superblocks. The `scan` module ties them
//! together to enumerate the volumes of a container image held in memory.

pub mod btree;
pub mod container;
pub mod object;
pub mod scan;
pub mod volume;

pub use btree::{
    BtreeInfo, BtreeInfoFixed, BtreeNodePhys, KvOff, Nloc, OmapKey, OmapVal, omap_lookup,
};
pub use container::{NxFeatures, NxIncompatFeatures, NxSuperblock, OmapPhys, Prange};
pub use object::{ObjectHeader, fletcher64, verify_block_checksum};
pub use scan::{
    ContainerReport, VolumeSummary, load_container_superblock, scan_volumes,
    select_newest_checkpoint,
};
pub use volume::{
    ApfsFeatures, ApfsFsFlags, ApfsIncompatFeatures, ApfsModifiedBy, ApfsSuperblock, VolumeRole,
    WrappedMetaCryptoState,
};

/// Return names of all set known flags.
pub(crate) fn describe_flags(bits: u64, known: &[(u64, &'static str)]) -> Vec<&'static str> {
    known
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Display form: known names joined by `|`, unknown bits appended as hex,
/// `none` when no bit is set.
pub(crate) fn format_flags(
    f: &mut std::fmt::Formatter<'_>,
    bits: u64,
    known: &[(u64, &'static str)],
) -> std::fmt::Result {
    let names = describe_flags(bits, known);
    let known_mask: u64 = known.iter().map(|(bit, _)| bit).fold(0, |a, b| a | b);
    let unknown = bits & !known_mask;

    if names.is_empty() && unknown == 0 {
        return write!(f, "none");
    }
    let mut first = true;
    for name in names {
        if !first {
            write!(f, "|")?;
        }
        write!(f, "{name}")?;
        first = false;
    }
    if unknown != 0 {
        if !first {
            write!(f, "|")?;
        }
        write!(f, "{unknown:#x}")?;
    }
    Ok(())
}
