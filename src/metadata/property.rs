use crate::typesystem::{StorageForm, TypeTag};
use crate::Vec;

/// A typed, possibly multi-dimensional field of an instance.
///
/// `dims[k]` indexes into the owning entity's dimension list: at runtime
/// the property's shape is `(instance.dim_size(dims[0]), ...)`. A scalar
/// property has `ndims == 0` and an empty `dims`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Property {
    pub name: String,
    pub type_tag: TypeTag,
    /// Element width in bytes (the schema-chosen width for `blob`/`string`,
    /// the natural width for numerics, pointer width for `string-pointer`).
    pub size: usize,
    pub dims: Vec<usize>,
    pub description: Option<String>,
    pub unit: Option<String>,
}

impl Property {
    pub fn scalar(name: impl Into<String>, type_tag: TypeTag, size: usize) -> Self {
        Property { name: name.into(), type_tag, size, dims: Vec::new(), description: None, unit: None }
    }

    pub fn array(name: impl Into<String>, type_tag: TypeTag, size: usize, dims: Vec<usize>) -> Self {
        Property { name: name.into(), type_tag, size, dims, description: None, unit: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Rank of this property: `0` for a scalar, `dims.len()` otherwise.
    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    pub fn storage_form(&self) -> StorageForm {
        StorageForm::for_ndims(self.ndims())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "serde")]
    fn with_serde() {
        use serde_test::{assert_tokens, Token};

        let prop = Property::scalar("alloy", TypeTag::StringPointer, 8);
        assert_tokens(
            &prop,
            &[
                Token::Struct { name: "Property", len: 6 },
                Token::Str("name"),
                Token::String("alloy"),
                Token::Str("type_tag"),
                Token::UnitVariant { name: "TypeTag", variant: "StringPointer" },
                Token::Str("size"),
                Token::U64(8),
                Token::Str("dims"),
                Token::Seq { len: Some(0) },
                Token::SeqEnd,
                Token::Str("description"),
                Token::None,
                Token::Str("unit"),
                Token::None,
                Token::StructEnd,
            ],
        );
    }
}
