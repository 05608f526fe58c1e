//! Instance allocation, typed access, and load/save.

use snafu::{ResultExt, Snafu};
use tracing::{debug, trace};

use crate::datamodel::{self, DataModel};
use crate::identity::{self, Uuid};
use crate::metadata::{Entity, Property};
use crate::storage::{self, PropertyData, Storage};
use crate::typesystem::TypeTag;
use crate::Vec;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("instance_create for entity {uri} got {given} dimension sizes, expected {expected}"))]
    DimensionCountMismatch { uri: String, given: usize, expected: usize },

    #[snafu(display(
        "property {name:?} expected {expected} values (entity {uri}) but was given {given}"
    ))]
    PropertyShapeMismatch { uri: String, name: String, expected: usize, given: usize },

    #[snafu(display("property {name:?} on entity {uri} has type {expected} but was given {given}"))]
    PropertyTypeMismatch { uri: String, name: String, expected: TypeTag, given: TypeTag },

    #[snafu(display(
        "instance_load: datamodel metadata uri {actual:?} does not match entity uri {expected:?}"
    ))]
    MetadataUriMismatch { expected: String, actual: String },

    #[snafu(display("datamodel error for instance of entity {uri}"))]
    DataModel { uri: String, source: datamodel::Error },

    #[snafu(display("entity error"))]
    Entity { source: crate::metadata::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<crate::metadata::Error> for Error {
    fn from(source: crate::metadata::Error) -> Self {
        Error::Entity { source }
    }
}

/// The value stored inline (`ndims == 0`) at a property's slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Blob(Vec<u8>),
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Fixed-width, NUL-terminated inline string storage.
    String(Vec<u8>),
    /// Owned, variable-length string.
    StringPointer(String),
}

/// The owning heap buffer stored at a property's slot when `ndims > 0`,
/// flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Blob(Vec<Vec<u8>>),
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Uint(Vec<u64>),
    Float(Vec<f64>),
    String(Vec<Vec<u8>>),
    StringPointer(Vec<String>),
}

/// A property's runtime value: either an inline scalar or an owning
/// pointer to a heap array.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(Scalar),
    Array(ArrayValue),
}

impl PropertyValue {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            PropertyValue::Scalar(s) => match s {
                Scalar::Blob(_) => TypeTag::Blob,
                Scalar::Bool(_) => TypeTag::Bool,
                Scalar::Int(_) => TypeTag::Int,
                Scalar::Uint(_) => TypeTag::Uint,
                Scalar::Float(_) => TypeTag::Float,
                Scalar::String(_) => TypeTag::String,
                Scalar::StringPointer(_) => TypeTag::StringPointer,
            },
            PropertyValue::Array(a) => match a {
                ArrayValue::Blob(_) => TypeTag::Blob,
                ArrayValue::Bool(_) => TypeTag::Bool,
                ArrayValue::Int(_) => TypeTag::Int,
                ArrayValue::Uint(_) => TypeTag::Uint,
                ArrayValue::Float(_) => TypeTag::Float,
                ArrayValue::String(_) => TypeTag::String,
                ArrayValue::StringPointer(_) => TypeTag::StringPointer,
            },
        }
    }

    /// Number of elements: `1` for a scalar, the array length otherwise.
    pub fn len(&self) -> usize {
        match self {
            PropertyValue::Scalar(_) => 1,
            PropertyValue::Array(a) => match a {
                ArrayValue::Blob(v) => v.len(),
                ArrayValue::Bool(v) => v.len(),
                ArrayValue::Int(v) => v.len(),
                ArrayValue::Uint(v) => v.len(),
                ArrayValue::Float(v) => v.len(),
                ArrayValue::String(v) => v.len(),
                ArrayValue::StringPointer(v) => v.len(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zeroed(prop: &Property, nmemb: usize) -> Self {
        if prop.ndims() == 0 {
            PropertyValue::Scalar(zeroed_scalar(prop.type_tag, prop.size))
        } else {
            PropertyValue::Array(zeroed_array(prop.type_tag, prop.size, nmemb))
        }
    }

    fn into_data(self) -> PropertyData {
        match self {
            PropertyValue::Scalar(s) => match s {
                Scalar::Blob(v) => PropertyData::Blob(v),
                Scalar::Bool(v) => PropertyData::Bool(v),
                Scalar::Int(v) => PropertyData::Int(v),
                Scalar::Uint(v) => PropertyData::Uint(v),
                Scalar::Float(v) => PropertyData::Float(v),
                Scalar::String(v) => PropertyData::String(v),
                Scalar::StringPointer(v) => PropertyData::StringPointer(v),
            },
            PropertyValue::Array(a) => match a {
                ArrayValue::Blob(v) => PropertyData::BlobArray(v),
                ArrayValue::Bool(v) => PropertyData::BoolArray(v),
                ArrayValue::Int(v) => PropertyData::IntArray(v),
                ArrayValue::Uint(v) => PropertyData::UintArray(v),
                ArrayValue::Float(v) => PropertyData::FloatArray(v),
                ArrayValue::String(v) => PropertyData::StringArray(v),
                ArrayValue::StringPointer(v) => PropertyData::StringPointerArray(v),
            },
        }
    }

    fn from_data(data: PropertyData) -> Self {
        match data {
            PropertyData::Blob(v) => PropertyValue::Scalar(Scalar::Blob(v)),
            PropertyData::Bool(v) => PropertyValue::Scalar(Scalar::Bool(v)),
            PropertyData::Int(v) => PropertyValue::Scalar(Scalar::Int(v)),
            PropertyData::Uint(v) => PropertyValue::Scalar(Scalar::Uint(v)),
            PropertyData::Float(v) => PropertyValue::Scalar(Scalar::Float(v)),
            PropertyData::String(v) => PropertyValue::Scalar(Scalar::String(v)),
            PropertyData::StringPointer(v) => PropertyValue::Scalar(Scalar::StringPointer(v)),
            PropertyData::BlobArray(v) => PropertyValue::Array(ArrayValue::Blob(v)),
            PropertyData::BoolArray(v) => PropertyValue::Array(ArrayValue::Bool(v)),
            PropertyData::IntArray(v) => PropertyValue::Array(ArrayValue::Int(v)),
            PropertyData::UintArray(v) => PropertyValue::Array(ArrayValue::Uint(v)),
            PropertyData::FloatArray(v) => PropertyValue::Array(ArrayValue::Float(v)),
            PropertyData::StringArray(v) => PropertyValue::Array(ArrayValue::String(v)),
            PropertyData::StringPointerArray(v) => PropertyValue::Array(ArrayValue::StringPointer(v)),
        }
    }
}

fn zeroed_scalar(tag: TypeTag, size: usize) -> Scalar {
    match tag {
        TypeTag::Blob => Scalar::Blob(vec![0u8; size]),
        TypeTag::Bool => Scalar::Bool(false),
        TypeTag::Int => Scalar::Int(0),
        TypeTag::Uint => Scalar::Uint(0),
        TypeTag::Float => Scalar::Float(0.0),
        TypeTag::String => Scalar::String(vec![0u8; size]),
        TypeTag::StringPointer => Scalar::StringPointer(String::new()),
    }
}

fn zeroed_array(tag: TypeTag, size: usize, nmemb: usize) -> ArrayValue {
    match tag {
        TypeTag::Blob => ArrayValue::Blob(vec![vec![0u8; size]; nmemb]),
        TypeTag::Bool => ArrayValue::Bool(vec![false; nmemb]),
        TypeTag::Int => ArrayValue::Int(vec![0; nmemb]),
        TypeTag::Uint => ArrayValue::Uint(vec![0; nmemb]),
        TypeTag::Float => ArrayValue::Float(vec![0.0; nmemb]),
        TypeTag::String => ArrayValue::String(vec![vec![0u8; size]; nmemb]),
        TypeTag::StringPointer => ArrayValue::StringPointer(vec![String::new(); nmemb]),
    }
}

/// A single allocated, self-describing value conforming to an [`Entity`]
///. Holds one strong reference to its entity; dropping
/// the instance releases it.
pub struct Instance {
    uuid: Uuid,
    uri: Option<String>,
    entity: Entity,
    dims: Vec<u64>,
    properties: Vec<PropertyValue>,
}

impl Instance {
    /// Allocate a zero-initialized instance of `entity` with the given
    /// dimension sizes, deriving its identity from `id`. If `id` produced a v5-derived uuid, it is
    /// remembered verbatim as the instance's `uri`.
    pub fn create(entity: &Entity, dims: &[u64], id: &str) -> Result<Self> {
        if dims.len() != entity.ndimensions() {
            return DimensionCountMismatchSnafu { uri: entity.uri().to_owned(), given: dims.len(), expected: entity.ndimensions() }
                .fail();
        }
        let (uuid, origin) = identity::get_uuid(id);
        let uri = matches!(origin, identity::Origin::Derived).then(|| id.to_owned());
        let properties = entity
            .properties()
            .iter()
            .map(|prop| {
                let nmemb: u64 = prop.dims.iter().map(|&k| dims[k]).product();
                PropertyValue::zeroed(prop, nmemb as usize)
            })
            .collect();
        debug!(%uuid, entity = entity.uri(), "created instance");
        Ok(Instance { uuid, uri, entity: entity.incref(), dims: dims.to_vec(), properties })
    }

    /// Release this instance, decrementing its entity's refcount.
    /// Equivalent to dropping the handle; kept for symmetry with the
    /// source design's explicit `instance_free` call sites.
    pub fn free(self) {
        drop(self)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn get_dimension_size(&self, name: &str) -> Result<u64> {
        let index = self.entity.get_dimension_index(name)?;
        Ok(self.dims[index])
    }

    pub fn get_property(&self, name: &str) -> Result<&PropertyValue> {
        let index = self.entity.get_property_index(name)?;
        Ok(&self.properties[index])
    }

    /// Overwrite a property's value. The new value replaces the old one
    /// wholesale (with it, every owned string/buffer the old value
    /// held) — in safe Rust this already gives each instance
    /// independent ownership of its strings with no separate
    /// strdup/realloc step.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let index = self.entity.get_property_index(name)?;
        let prop = &self.entity.properties()[index];
        if value.type_tag() != prop.type_tag {
            return PropertyTypeMismatchSnafu {
                uri: self.entity.uri().to_owned(),
                name: name.to_owned(),
                expected: prop.type_tag,
                given: value.type_tag(),
            }
            .fail();
        }
        let expected_len = if prop.ndims() == 0 {
            1
        } else {
            prop.dims.iter().map(|&k| self.dims[k]).product::<u64>() as usize
        };
        if value.len() != expected_len {
            return PropertyShapeMismatchSnafu {
                uri: self.entity.uri().to_owned(),
                name: name.to_owned(),
                expected: expected_len,
                given: value.len(),
            }
            .fail();
        }
        self.properties[index] = value;
        Ok(())
    }

    /// Load an instance of `entity` from `storage`: open a datamodel, require its metadata uri
    /// match `entity`, pull every dimension size, allocate, then pull
    /// every property.
    pub fn load(storage: &Storage, id: &str, entity: &Entity) -> Result<Self> {
        let dm = DataModel::new(storage, id).context(DataModelSnafu { uri: entity.uri().to_owned() })?;
        let actual = dm.get_metadata().context(DataModelSnafu { uri: entity.uri().to_owned() })?;
        if actual != entity.uri() {
            return MetadataUriMismatchSnafu { expected: entity.uri().to_owned(), actual }.fail();
        }
        let mut dims = Vec::with_capacity(entity.ndimensions());
        for dim in entity.dimensions() {
            let size = dm.get_dimension_size(&dim.name).context(DataModelSnafu { uri: entity.uri().to_owned() })?;
            dims.push(size);
        }
        let mut instance = Instance::create(entity, &dims, id)?;
        for (index, prop) in entity.properties().iter().enumerate() {
            let shape: Vec<u64> = prop.dims.iter().map(|&k| dims[k]).collect();
            let data = dm
                .get_property(&prop.name, &shape)
                .context(DataModelSnafu { uri: entity.uri().to_owned() })?;
            trace!(property = prop.name, "loaded property");
            instance.properties[index] = PropertyValue::from_data(data);
        }
        Ok(instance)
    }

    /// Save this instance to `storage`:
    /// reopen the same datamodel by the instance's own uuid (so saving
    /// never re-derives a different identity), write the meta uri,
    /// every dimension size, then every property.
    pub fn save(&self, storage: &Storage) -> Result<()> {
        let id = self.uuid.to_string();
        let dm = DataModel::new(storage, &id).context(DataModelSnafu { uri: self.entity.uri().to_owned() })?;
        dm.set_metadata(self.entity.uri()).context(DataModelSnafu { uri: self.entity.uri().to_owned() })?;
        for (dim, &size) in self.entity.dimensions().iter().zip(self.dims.iter()) {
            dm.set_dimension_size(&dim.name, size).context(DataModelSnafu { uri: self.entity.uri().to_owned() })?;
        }
        for (prop, value) in self.entity.properties().iter().zip(self.properties.iter()) {
            dm.set_property(&prop.name, &value.clone().into_data())
                .context(DataModelSnafu { uri: self.entity.uri().to_owned() })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Dimension;
    use crate::storage::mock::MockDriver;
    use crate::storage::Registry;
    use std::path::PathBuf;

    fn alloy_entity() -> Entity {
        let dims = vec![Dimension::new("nelements"), Dimension::new("nphases")];
        let pointer_size = std::mem::size_of::<usize>();
        let props = vec![
            Property::scalar("alloy", TypeTag::StringPointer, pointer_size),
            Property::array("elements", TypeTag::StringPointer, pointer_size, vec![0]),
            Property::array("phases", TypeTag::StringPointer, pointer_size, vec![1]),
            Property::array("X0", TypeTag::Float, 8, vec![0]),
            Property::array("Xp", TypeTag::Float, 8, vec![1, 0]),
            Property::array("volfrac", TypeTag::Float, 8, vec![1]),
            Property::array("rpart", TypeTag::Float, 8, vec![1]),
            Property::array("atvol", TypeTag::Float, 8, vec![1]),
        ];
        Entity::create("http://www.sintef.no/calm/0.1/Chemistry", None, dims, props).unwrap()
    }

    fn open_mock_storage() -> Storage {
        let registry = Registry::new(Vec::<PathBuf>::new());
        registry.register(crate::Arc::new(MockDriver::new("mock")));
        Storage::open(&registry, "mock", "mem://x", "", true).unwrap()
    }

    #[test]
    fn create_zero_initializes_and_tracks_refcount() {
        let entity = alloy_entity();
        let before = entity.refcount();
        let inst = Instance::create(&entity, &[3, 2], "alloy-1").unwrap();
        assert_eq!(entity.refcount(), before + 1);
        assert_eq!(inst.get_dimension_size("nelements").unwrap(), 3);
        match inst.get_property("X0").unwrap() {
            PropertyValue::Array(ArrayValue::Float(v)) => assert_eq!(v, &vec![0.0, 0.0, 0.0]),
            other => panic!("unexpected value {other:?}"),
        }
        inst.free();
        assert_eq!(entity.refcount(), before);
    }

    #[test]
    fn set_property_rejects_shape_mismatch() {
        let entity = alloy_entity();
        let mut inst = Instance::create(&entity, &[3, 2], "alloy-1").unwrap();
        let err = inst.set_property("X0", PropertyValue::Array(ArrayValue::Float(vec![1.0, 2.0]))).unwrap_err();
        assert!(matches!(err, Error::PropertyShapeMismatch { .. }));
    }

    #[test]
    fn alloy_save_then_load_round_trips() {
        let storage = open_mock_storage();
        let entity = alloy_entity();
        let mut inst = Instance::create(&entity, &[3, 2], "6063").unwrap();
        inst.set_property("alloy", PropertyValue::Scalar(Scalar::StringPointer("6063".into()))).unwrap();
        inst.set_property(
            "elements",
            PropertyValue::Array(ArrayValue::StringPointer(vec!["Al".into(), "Mg".into(), "Si".into()])),
        )
        .unwrap();
        inst.set_property(
            "phases",
            PropertyValue::Array(ArrayValue::StringPointer(vec!["beta\"".into(), "beta'".into()])),
        )
        .unwrap();
        inst.set_property("X0", PropertyValue::Array(ArrayValue::Float(vec![0.99, 0.005, 0.005]))).unwrap();
        inst.set_property(
            "Xp",
            PropertyValue::Array(ArrayValue::Float(vec![2.0 / 11.0, 5.0 / 11.0, 4.0 / 11.0, 0.0, 9.0 / 14.0, 5.0 / 14.0])),
        )
        .unwrap();
        inst.set_property("volfrac", PropertyValue::Array(ArrayValue::Float(vec![0.005, 0.001]))).unwrap();
        inst.set_property("rpart", PropertyValue::Array(ArrayValue::Float(vec![7e-9, 15e-9]))).unwrap();
        inst.set_property("atvol", PropertyValue::Array(ArrayValue::Float(vec![1.9e-29, 1.8e-29]))).unwrap();

        inst.save(&storage).unwrap();
        let loaded = Instance::load(&storage, &inst.uuid.to_string(), &entity).unwrap();

        assert_eq!(loaded.get_dimension_size("nelements").unwrap(), 3);
        assert_eq!(loaded.get_dimension_size("nphases").unwrap(), 2);
        assert_eq!(loaded.get_property("alloy").unwrap(), inst.get_property("alloy").unwrap());
        assert_eq!(loaded.get_property("elements").unwrap(), inst.get_property("elements").unwrap());
        assert_eq!(loaded.get_property("Xp").unwrap(), inst.get_property("Xp").unwrap());
        assert_eq!(loaded.get_property("atvol").unwrap(), inst.get_property("atvol").unwrap());
    }

    #[test]
    fn load_rejects_metadata_uri_mismatch() {
        let storage = open_mock_storage();
        let entity = alloy_entity();
        let other = Entity::create("http://example.org/0.1/Other", None, vec![], vec![]).unwrap();
        let dm = DataModel::new(&storage, "thing").unwrap();
        dm.set_metadata(other.uri()).unwrap();
        let err = Instance::load(&storage, "thing", &entity).unwrap_err();
        assert!(matches!(err, Error::MetadataUriMismatch { .. }));
    }
}
