#![forbid(unsafe_code)]
//! Structure-layout engine for on-disk metadata schemas.
//!
//! A [`StructLayout`] is computed from a declared field list under C layout
//! rules: fields in declaration order, each placed at the next multiple of
//! its alignment, structure size rounded up to the structure alignment.
//! [`Packing::Packed`] suppresses inter-field padding and pins the
//! structure alignment, matching a C `aligned(N), packed` attribute pair.
//!
//! Offsets are computed, never introspected from a Rust type: the schemas
//! describe a foreign on-disk format, and the registry must answer lookups
//! by structure and field *name*.

pub mod apfs;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("unknown structure: {name}")]
    UnknownStruct { name: String },
    #[error("unknown field: {structure}.{field}")]
    UnknownField { structure: String, field: String },
}

/// Layout discipline for a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Packing {
    /// Natural C layout: every field at its own alignment, structure
    /// alignment is the maximum field alignment.
    Natural,
    /// No inter-field padding; structure alignment fixed to `align`.
    Packed { align: usize },
}

/// A declared field: name plus the size and alignment its type would have
/// under natural layout. Arrays carry their total size and element
/// alignment; nested structures carry the nested layout's size/alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
}

impl FieldSpec {
    #[must_use]
    pub const fn u8(name: &'static str) -> Self {
        Self { name, size: 1, align: 1 }
    }

    #[must_use]
    pub const fn u16(name: &'static str) -> Self {
        Self { name, size: 2, align: 2 }
    }

    #[must_use]
    pub const fn u32(name: &'static str) -> Self {
        Self { name, size: 4, align: 4 }
    }

    #[must_use]
    pub const fn u64(name: &'static str) -> Self {
        Self { name, size: 8, align: 8 }
    }

    #[must_use]
    pub const fn i64(name: &'static str) -> Self {
        Self { name, size: 8, align: 8 }
    }

    /// A byte array (`uint8_t[len]`): alignment 1.
    #[must_use]
    pub const fn bytes(name: &'static str, len: usize) -> Self {
        Self { name, size: len, align: 1 }
    }

    /// A `uint64_t[count]` array.
    #[must_use]
    pub const fn array_u64(name: &'static str, count: usize) -> Self {
        Self { name, size: 8 * count, align: 8 }
    }

    /// A nested structure field.
    #[must_use]
    pub fn nested(name: &'static str, layout: &StructLayout) -> Self {
        Self { name, size: layout.size(), align: layout.align() }
    }

    /// An array of nested structures.
    #[must_use]
    pub fn nested_array(name: &'static str, layout: &StructLayout, count: usize) -> Self {
        Self { name, size: layout.size() * count, align: layout.align() }
    }

    /// A trailing flexible array member (`uint64_t name[]`): contributes
    /// alignment and an offset but no size.
    #[must_use]
    pub const fn flexible_u64(name: &'static str) -> Self {
        Self { name, size: 0, align: 8 }
    }
}

/// A resolved field: its computed byte offset within the structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldOffset {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// A structure schema with every field offset resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructLayout {
    name: &'static str,
    packing: Packing,
    size: usize,
    align: usize,
    fields: Vec<FieldOffset>,
}

impl StructLayout {
    /// Resolve a field list into offsets under the given packing rules.
    #[must_use]
    pub fn compute(name: &'static str, packing: Packing, specs: &[FieldSpec]) -> Self {
        let mut cursor = 0_usize;
        let mut max_field_align = 1_usize;
        let mut fields = Vec::with_capacity(specs.len());

        for spec in specs {
            let field_align = match packing {
                Packing::Natural => spec.align,
                Packing::Packed { .. } => 1,
            };
            let offset = align_up(cursor, field_align);
            fields.push(FieldOffset { name: spec.name, offset, size: spec.size });
            cursor = offset + spec.size;
            max_field_align = max_field_align.max(spec.align);
        }

        let align = match packing {
            Packing::Natural => max_field_align,
            Packing::Packed { align } => align,
        };
        let size = align_up(cursor, align);

        Self { name, packing, size, align, fields }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn packing(&self) -> Packing {
        self.packing
    }

    /// Structure size, including trailing padding up to the structure
    /// alignment (what C `sizeof` reports).
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn align(&self) -> usize {
        self.align
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldOffset] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, field: &str) -> Result<FieldOffset, LayoutError> {
        self.fields
            .iter()
            .copied()
            .find(|f| f.name == field)
            .ok_or_else(|| LayoutError::UnknownField {
                structure: self.name.to_owned(),
                field: field.to_owned(),
            })
    }

    /// Byte offset of a field from the start of the structure.
    pub fn offset_of(&self, field: &str) -> Result<usize, LayoutError> {
        self.field(field).map(|f| f.offset)
    }

    /// Total bytes of padding inserted between and after fields.
    #[must_use]
    pub fn padding(&self) -> usize {
        let occupied: usize = self.fields.iter().map(|f| f.size).sum();
        self.size - occupied
    }
}

/// Round `value` up to the nearest multiple of `align` (a power of two).
#[must_use]
fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn natural_layout_inserts_padding() {
        let layout = StructLayout::compute(
            "mixed",
            Packing::Natural,
            &[
                FieldSpec::u8("a"),
                FieldSpec::u64("b"),
                FieldSpec::u16("c"),
            ],
        );
        assert_eq!(layout.offset_of("a").unwrap(), 0);
        assert_eq!(layout.offset_of("b").unwrap(), 8);
        assert_eq!(layout.offset_of("c").unwrap(), 16);
        // 18 bytes of fields, rounded up to alignment 8
        assert_eq!(layout.size(), 24);
        assert_eq!(layout.align(), 8);
        assert_eq!(layout.padding(), 13);
    }

    #[test]
    fn packed_layout_suppresses_padding() {
        let layout = StructLayout::compute(
            "packed",
            Packing::Packed { align: 2 },
            &[
                FieldSpec::u8("a"),
                FieldSpec::u64("b"),
                FieldSpec::u16("c"),
            ],
        );
        assert_eq!(layout.offset_of("a").unwrap(), 0);
        assert_eq!(layout.offset_of("b").unwrap(), 1);
        assert_eq!(layout.offset_of("c").unwrap(), 9);
        // 11 bytes of fields, rounded up to the declared alignment 2
        assert_eq!(layout.size(), 12);
        assert_eq!(layout.align(), 2);
    }

    #[test]
    fn byte_arrays_do_not_force_alignment() {
        let layout = StructLayout::compute(
            "uuids",
            Packing::Natural,
            &[
                FieldSpec::u32("tag"),
                FieldSpec::bytes("uuid", 16),
                FieldSpec::u32("tail"),
            ],
        );
        assert_eq!(layout.offset_of("uuid").unwrap(), 4);
        assert_eq!(layout.offset_of("tail").unwrap(), 20);
        assert_eq!(layout.size(), 24);
        assert_eq!(layout.align(), 4);
    }

    #[test]
    fn nested_structures_carry_their_alignment() {
        let inner = StructLayout::compute(
            "inner",
            Packing::Natural,
            &[FieldSpec::u16("x"), FieldSpec::u64("y")],
        );
        assert_eq!(inner.size(), 16);

        let outer = StructLayout::compute(
            "outer",
            Packing::Natural,
            &[FieldSpec::u8("pre"), FieldSpec::nested("in", &inner)],
        );
        assert_eq!(outer.offset_of("in").unwrap(), 8);
        assert_eq!(outer.size(), 24);
    }

    #[test]
    fn flexible_array_has_offset_but_no_size() {
        let layout = StructLayout::compute(
            "node",
            Packing::Natural,
            &[FieldSpec::u32("head"), FieldSpec::flexible_u64("data")],
        );
        assert_eq!(layout.offset_of("data").unwrap(), 8);
        assert_eq!(layout.size(), 8);
    }

    #[test]
    fn unknown_field_is_an_error() {
        let layout = StructLayout::compute("s", Packing::Natural, &[FieldSpec::u32("a")]);
        assert_eq!(
            layout.offset_of("b"),
            Err(LayoutError::UnknownField {
                structure: "s".to_owned(),
                field: "b".to_owned(),
            })
        );
    }

    #[test]
    fn layout_is_deterministic() {
        let specs = [
            FieldSpec::u16("a"),
            FieldSpec::bytes("b", 7),
            FieldSpec::u64("c"),
        ];
        let first = StructLayout::compute("d", Packing::Natural, &specs);
        let second = StructLayout::compute("d", Packing::Natural, &specs);
        assert_eq!(first, second);
    }

    // Field-size generator: the widths that occur in the schemas.
    fn arb_spec() -> impl Strategy<Value = FieldSpec> {
        prop_oneof![
            Just(FieldSpec::u8("f")),
            Just(FieldSpec::u16("f")),
            Just(FieldSpec::u32("f")),
            Just(FieldSpec::u64("f")),
            (1_usize..64).prop_map(|len| FieldSpec::bytes("f", len)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn natural_offsets_are_aligned_and_disjoint(
            specs in proptest::collection::vec(arb_spec(), 1..24),
        ) {
            let layout = StructLayout::compute("prop", Packing::Natural, &specs);
            let mut prev_end = 0_usize;
            for (field, spec) in layout.fields().iter().zip(&specs) {
                prop_assert_eq!(field.offset % spec.align, 0);
                prop_assert!(field.offset >= prev_end);
                // Natural padding never exceeds align - 1
                prop_assert!(field.offset - prev_end < spec.align);
                prev_end = field.offset + field.size;
            }
            prop_assert!(layout.size() >= prev_end);
            prop_assert_eq!(layout.size() % layout.align(), 0);
        }

        #[test]
        fn packed_layout_has_zero_interior_padding(
            specs in proptest::collection::vec(arb_spec(), 1..24),
        ) {
            let layout = StructLayout::compute("prop", Packing::Packed { align: 2 }, &specs);
            let sum: usize = specs.iter().map(|s| s.size).sum();
            let last = layout.fields().last().copied().unwrap();
            prop_assert_eq!(last.offset + last.size, sum);
        }
    }
}
