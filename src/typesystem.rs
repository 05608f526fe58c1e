//! Primitive type tags and the pure offset/alignment math that every
//! entity layout is built from.
//!
//! Grounded on `vr.rs`'s closed `Vr` enum and its `Kind`/`Meta` table —
//! here the "kind" and the "tag" collapse into one small enum since
//! DLite's element types have no DICOM-style textual/binary VR encoding.

use snafu::Snafu;

/// The closed set of primitive element kinds a [`crate::Property`] or
/// [`crate::Dimension`]-indexed array can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeTag {
    /// Fixed-width opaque byte sequence; width is schema-chosen.
    Blob,
    /// Single byte, 0 or 1.
    Bool,
    /// Signed integer; width is schema-chosen (1, 2, 4 or 8 bytes).
    Int,
    /// Unsigned integer; width is schema-chosen (1, 2, 4 or 8 bytes).
    Uint,
    /// IEEE-754 float; width is schema-chosen (4 or 8 bytes).
    Float,
    /// Fixed-width, inline, NUL-terminated string.
    String,
    /// Owned, variable-length string stored by reference.
    StringPointer,
}

impl TypeTag {
    /// Stable, human-readable name. Used in persisted schemas and in
    /// diagnostics; never fails for the closed set of variants this enum
    /// defines, but `from_typename` below is the fallible direction for
    /// names read back from storage.
    pub fn typename(self) -> &'static str {
        match self {
            TypeTag::Blob => "blob",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Uint => "uint",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::StringPointer => "string-pointer",
        }
    }

    /// Parse a persisted-schema type string into a tag.
    pub fn from_typename(name: &str) -> Result<Self> {
        Ok(match name {
            "blob" => TypeTag::Blob,
            "bool" => TypeTag::Bool,
            "int" => TypeTag::Int,
            "uint" => TypeTag::Uint,
            "float" => TypeTag::Float,
            "string" => TypeTag::String,
            "string-pointer" => TypeTag::StringPointer,
            other => return UnknownTypeSnafu { name: other.to_owned() }.fail(),
        })
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.typename())
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unknown type tag {name:?}"))]
    UnknownType { name: String },
    #[snafu(display("size {size} is not a valid width for {tag}"))]
    InvalidSize { tag: TypeTag, size: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Natural alignment for a stored value of kind `tag` with element width
/// `size` bytes.
///
/// `int`/`uint`/`float` require `size` to already be the natural,
/// power-of-two width (1/2/4/8 for integers, 4/8 for floats); their
/// alignment equals their size. `bool` is always 1-aligned. `blob`/
/// `string` align to the largest power of two not exceeding `size`,
/// capped at 8, the widest native numeric width in play. `string-pointer`
/// aligns like a native pointer.
pub fn alignment(tag: TypeTag, size: usize) -> Result<usize> {
    match tag {
        TypeTag::Bool => Ok(1),
        TypeTag::Int | TypeTag::Uint => {
            if matches!(size, 1 | 2 | 4 | 8) {
                Ok(size)
            } else {
                InvalidSizeSnafu { tag, size }.fail()
            }
        }
        TypeTag::Float => {
            if matches!(size, 4 | 8) {
                Ok(size)
            } else {
                InvalidSizeSnafu { tag, size }.fail()
            }
        }
        TypeTag::Blob | TypeTag::String => {
            if size == 0 {
                Ok(1)
            } else {
                Ok(size.min(8).next_power_of_two().min(8))
            }
        }
        TypeTag::StringPointer => Ok(std::mem::align_of::<usize>()),
    }
}

/// Round `offset` up to the next multiple of `align` (`align` must be a
/// power of two).
pub fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Compute the offset of the next member after one of size `prev_size`
/// placed at `prev_off`, respecting the natural alignment of `(tag, size)`.
///
/// This, swept in declaration order, is the sole mechanism every
/// `dimoffset`, `propoffsets[]`, `reloffset` and entity `size` is
/// derived from.
pub fn member_offset(prev_off: usize, prev_size: usize, tag: TypeTag, size: usize) -> Result<usize> {
    let align = alignment(tag, size)?;
    Ok(align_up(prev_off + prev_size, align))
}

/// Storage form of a property value, as observable through
/// `get_property`/`set_property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageForm {
    /// `ndims == 0`: the value is stored inline at its offset.
    InlineScalar,
    /// `ndims > 0`: the offset holds an owning pointer to a heap array.
    PointerToHeap,
}

impl StorageForm {
    pub fn for_ndims(ndims: usize) -> Self {
        if ndims == 0 {
            StorageForm::InlineScalar
        } else {
            StorageForm::PointerToHeap
        }
    }

    /// Effective alignment/footprint of this storage form at the byte
    /// level: an inline scalar takes `(alignment, size)` of its element
    /// type, a pointer-to-heap slot always takes pointer width/alignment.
    pub fn effective(self, tag: TypeTag, size: usize) -> Result<(usize, usize)> {
        match self {
            StorageForm::InlineScalar => Ok((alignment(tag, size)?, size)),
            StorageForm::PointerToHeap => {
                let w = std::mem::size_of::<usize>();
                Ok((w, w))
            }
        }
    }
}
