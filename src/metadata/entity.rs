use snafu::{ResultExt, Snafu};
use tracing::{debug, trace, warn};

use super::meta_entity::meta_entity;
use super::{Dimension, Property};
use crate::identity::{self, Origin, Uuid};
use crate::storage::{self, EntityData, PropertyRecord, Storage};
use crate::typesystem::{self, StorageForm, TypeTag};
use crate::{Arc, Vec};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("dimension {name:?} not found in entity {uri}"))]
    UnknownDimension { uri: String, name: String },

    #[snafu(display("property {name:?} not found in entity {uri}"))]
    UnknownProperty { uri: String, name: String },

    #[snafu(display(
        "id {id:?} given to entity_load is neither an existing uuid nor a name a v5 uuid can be derived from"
    ))]
    UnsuitableIdentity { id: String },

    #[snafu(display("computing layout for entity {uri}"))]
    Layout { uri: String, source: typesystem::Error },

    #[snafu(display("entity {uri}: property {property} references unknown dimension {dimension:?}"))]
    UnknownPropertyDimension { uri: String, property: String, dimension: String },

    #[snafu(display("entity {uri}: property {property} has unrecognised type {type_name:?}"))]
    UnknownPropertyType { uri: String, property: String, type_name: String },

    #[snafu(display("storage error while loading/saving entity {uri}"))]
    Storage { uri: String, source: storage::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

const POINTER_SIZE: usize = std::mem::size_of::<usize>();
const POINTER_ALIGN: usize = std::mem::align_of::<usize>();
const UUID_HEADER_SIZE: usize = 37; // 36 canonical chars + NUL

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Layout {
    pub size: usize,
    pub dimoffset: usize,
    pub reloffset: usize,
}

struct EntityInner {
    uuid: Uuid,
    uri: String,
    description: Option<String>,
    /// `None` only for the permanently-pinned meta-entity singleton.
    meta: Option<Entity>,
    dimensions: Vec<Dimension>,
    properties: Vec<Property>,
    layout: Layout,
    propoffsets: Vec<usize>,
}

/// Metadata describing a class of instances: its dimensions, properties
/// and derived byte layout. Cheaply cloneable; cloning
/// is the reference-count increment ([`Entity::incref`]).
#[derive(Clone)]
pub struct Entity(Arc<EntityInner>);

impl Entity {
    /// Deep-copies `dimensions`/`properties`, derives a v5 uuid from
    /// `uri`, links to the singleton meta-entity (incrementing its
    /// refcount), and computes the layout.
    pub fn create(
        uri: impl Into<String>,
        description: Option<String>,
        dimensions: Vec<Dimension>,
        properties: Vec<Property>,
    ) -> Result<Self> {
        let uri = uri.into();
        for prop in &properties {
            for &idx in &prop.dims {
                if idx >= dimensions.len() {
                    return UnknownPropertyDimensionSnafu {
                        uri: uri.clone(),
                        property: prop.name.clone(),
                        dimension: idx.to_string(),
                    }
                    .fail();
                }
            }
        }
        let (uuid, _origin) = identity::get_uuid(&uri);
        let (layout, propoffsets) =
            compute_layout(&dimensions, &properties).context(LayoutSnafu { uri: uri.clone() })?;
        debug!(%uuid, uri, size = layout.size, "created entity");
        Ok(Entity(Arc::new(EntityInner {
            uuid,
            uri,
            description,
            meta: Some(meta_entity().incref()),
            dimensions,
            properties,
            layout,
            propoffsets,
        })))
    }

    /// Build the permanently-pinned meta-entity singleton. Only called
    /// once, by [`super::meta_entity::meta_entity`].
    pub(crate) fn create_meta(
        uri: impl Into<String>,
        dimensions: Vec<Dimension>,
        properties: Vec<Property>,
    ) -> Self {
        let uri = uri.into();
        let (uuid, _origin) = identity::get_uuid(&uri);
        let (layout, propoffsets) =
            compute_layout(&dimensions, &properties).expect("built-in meta-entity schema is well-formed");
        Entity(Arc::new(EntityInner { uuid, uri, description: None, meta: None, dimensions, properties, layout, propoffsets }))
    }

    pub fn uuid(&self) -> Uuid {
        self.0.uuid
    }

    pub fn uri(&self) -> &str {
        &self.0.uri
    }

    pub fn description(&self) -> Option<&str> {
        self.0.description.as_deref()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.0.dimensions
    }

    pub fn properties(&self) -> &[Property] {
        &self.0.properties
    }

    pub fn ndimensions(&self) -> usize {
        self.0.dimensions.len()
    }

    pub fn nproperties(&self) -> usize {
        self.0.properties.len()
    }

    pub fn size(&self) -> usize {
        self.0.layout.size
    }

    pub fn dimoffset(&self) -> usize {
        self.0.layout.dimoffset
    }

    pub fn reloffset(&self) -> usize {
        self.0.layout.reloffset
    }

    pub fn propoffsets(&self) -> &[usize] {
        &self.0.propoffsets
    }

    /// The entity's own schema: the meta-entity singleton, or `None`
    /// only for that singleton itself.
    pub fn meta(&self) -> Option<&Entity> {
        self.0.meta.as_ref()
    }

    /// Current strong-reference count, i.e. the number of live
    /// [`Entity`] handles (this one plus every clone/`incref`) sharing
    /// this metadata.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Obtain a new strong reference, incrementing [`Entity::refcount`].
    pub fn incref(&self) -> Entity {
        Entity(Arc::clone(&self.0))
    }

    /// Release one strong reference. Equivalent to dropping the handle;
    /// provided so callers can mirror the source design's explicit
    /// `decref` call sites.
    pub fn decref(self) {
        drop(self)
    }

    pub fn get_dimension_index(&self, name: &str) -> Result<usize> {
        self.0.dimensions.iter().position(|d| d.name == name).ok_or_else(|| {
            warn!(entity = %self.uri(), dimension = name, "dimension not found");
            Error::UnknownDimension { uri: self.uri().to_owned(), name: name.to_owned() }
        })
    }

    pub fn get_property_index(&self, name: &str) -> Result<usize> {
        self.0.properties.iter().position(|p| p.name == name).ok_or_else(|| {
            warn!(entity = %self.uri(), property = name, "property not found");
            Error::UnknownProperty { uri: self.uri().to_owned(), name: name.to_owned() }
        })
    }

    /// Load an entity from `storage` using the driver's `get_entity`
    /// fast path.
    ///
    /// `id` must be either an already-canonical uuid or a name a v5 uuid
    /// can be derived from; an id that only works by generating a fresh
    /// random (v4) uuid is rejected, fixing the source design's
    /// always-true `uuidver != 0 || uuidver != 5` guard.
    pub fn load(storage: &Storage, id: &str) -> Result<Self> {
        let (uuid, origin) = identity::get_uuid(id);
        if !matches!(origin, Origin::Verbatim | Origin::Derived) {
            return UnsuitableIdentitySnafu { id: id.to_owned() }.fail();
        }
        trace!(%uuid, id, "loading entity");
        let data = storage.connection().get_entity(uuid).context(StorageSnafu { uri: id.to_owned() })?;
        Self::from_entity_data(data)
    }

    /// Save this entity to `storage` using the driver's `set_entity`
    /// fast path.
    pub fn save(&self, storage: &Storage) -> Result<()> {
        let data = self.to_entity_data();
        storage
            .connection()
            .set_entity(self.uuid(), &data)
            .context(StorageSnafu { uri: self.uri().to_owned() })?;
        Ok(())
    }

    fn from_entity_data(data: EntityData) -> Result<Self> {
        let dimensions: Vec<Dimension> =
            data.dimensions.into_iter().map(|(name, description)| Dimension { name, description }).collect();
        let dim_index = |uri: &str, prop: &str, name: &str| -> Result<usize> {
            dimensions.iter().position(|d| d.name == name).ok_or_else(|| Error::UnknownPropertyDimension {
                uri: uri.to_owned(),
                property: prop.to_owned(),
                dimension: name.to_owned(),
            })
        };
        let mut properties = Vec::with_capacity(data.properties.len());
        for record in &data.properties {
            let type_tag = TypeTag::from_typename(&record.type_name).map_err(|_| Error::UnknownPropertyType {
                uri: data.uri.clone(),
                property: record.name.clone(),
                type_name: record.type_name.clone(),
            })?;
            let dims = record
                .dim_names
                .iter()
                .map(|name| dim_index(&data.uri, &record.name, name))
                .collect::<Result<Vec<_>>>()?;
            properties.push(Property {
                name: record.name.clone(),
                type_tag,
                size: record.size,
                dims,
                description: record.description.clone(),
                unit: record.unit.clone(),
            });
        }
        Self::create(data.uri, data.description, dimensions, properties)
    }

    fn to_entity_data(&self) -> EntityData {
        EntityData {
            uri: self.uri().to_owned(),
            description: self.description().map(|s| s.to_owned()),
            dimensions: self.dimensions().iter().map(|d| (d.name.clone(), d.description.clone())).collect(),
            properties: self
                .properties()
                .iter()
                .map(|p| PropertyRecord {
                    name: p.name.clone(),
                    type_name: p.type_tag.typename().to_owned(),
                    size: p.size,
                    dim_names: p.dims.iter().map(|&i| self.dimensions()[i].name.clone()).collect(),
                    description: p.description.clone(),
                    unit: p.unit.clone(),
                })
                .collect(),
        }
    }
}

/// Sweep header, dimension array, properties and relations slot in
/// declaration order through [`typesystem::member_offset`], recording
/// each property's own offset along the way.
fn compute_layout(
    dimensions: &[Dimension],
    properties: &[Property],
) -> std::result::Result<(Layout, Vec<usize>), typesystem::Error> {
    let mut offset = 0usize;
    let mut max_align = POINTER_ALIGN;

    // Fixed header: uuid[37], optional uri pointer, meta pointer.
    offset += UUID_HEADER_SIZE;
    offset = typesystem::align_up(offset, POINTER_ALIGN);
    offset += POINTER_SIZE; // uri pointer (may be unused/null)
    offset = typesystem::align_up(offset, POINTER_ALIGN);
    offset += POINTER_SIZE; // meta pointer

    // Dimension-size array: one integer per dimension.
    let dim_align = std::mem::align_of::<u64>();
    offset = typesystem::align_up(offset, dim_align);
    let dimoffset = offset;
    offset += dimensions.len() * std::mem::size_of::<u64>();
    max_align = max_align.max(dim_align);

    // Properties: inline scalar or pointer-to-heap.
    let mut propoffsets = Vec::with_capacity(properties.len());
    for prop in properties {
        let form = StorageForm::for_ndims(prop.ndims());
        let (align, size) = form.effective(prop.type_tag, prop.size)?;
        offset = typesystem::align_up(offset, align);
        propoffsets.push(offset);
        offset += size;
        max_align = max_align.max(align);
    }

    // Relations slot: always a pointer-sized handle.
    offset = typesystem::align_up(offset, POINTER_ALIGN);
    let reloffset = offset;
    offset += POINTER_SIZE;

    let size = typesystem::align_up(offset, max_align);
    Ok((Layout { size, dimoffset, reloffset }, propoffsets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockDriver;
    use crate::storage::Registry;
    use std::path::PathBuf;

    fn chemistry_entity() -> Entity {
        let dims = vec![Dimension::new("nelements"), Dimension::new("nphases")];
        let props = vec![
            Property::scalar("alloy", TypeTag::StringPointer, POINTER_SIZE),
            Property::array("elements", TypeTag::StringPointer, POINTER_SIZE, vec![0]),
            Property::array("phases", TypeTag::StringPointer, POINTER_SIZE, vec![1]),
            Property::array("X0", TypeTag::Float, 8, vec![0]),
            Property::array("Xp", TypeTag::Float, 8, vec![1, 0]),
            Property::array("volfrac", TypeTag::Float, 8, vec![1]),
            Property::array("rpart", TypeTag::Float, 8, vec![1]),
            Property::array("atvol", TypeTag::Float, 8, vec![1]),
        ];
        Entity::create("http://www.sintef.no/calm/0.1/Chemistry", None, dims, props).unwrap()
    }

    #[test]
    fn chemistry_entity_matches_scenario_shape() {
        let entity = chemistry_entity();
        assert_eq!(entity.ndimensions(), 2);
        assert_eq!(entity.nproperties(), 8);
        let elements = entity.get_property_index("elements").unwrap();
        let prop = &entity.properties()[elements];
        assert_eq!(prop.type_tag, TypeTag::StringPointer);
        assert_eq!(prop.size, POINTER_SIZE);
        assert_eq!(prop.ndims(), 1);
    }

    #[test]
    fn layout_is_sound() {
        let entity = chemistry_entity();
        for (i, prop) in entity.properties().iter().enumerate() {
            let form = StorageForm::for_ndims(prop.ndims());
            let (align, size) = form.effective(prop.type_tag, prop.size).unwrap();
            let offset = entity.propoffsets()[i];
            assert_eq!(offset % align, 0, "property {} misaligned", prop.name);
            assert!(offset + size <= entity.size(), "property {} overruns entity size", prop.name);
        }
    }

    #[test]
    fn refcount_restored_after_create_incref_decref_decref() {
        let meta = meta_entity();
        let before = meta.refcount();
        let entity = chemistry_entity();
        assert_eq!(meta.refcount(), before + 1);
        let again = entity.incref();
        assert_eq!(entity.refcount(), 2);
        again.decref();
        assert_eq!(entity.refcount(), 1);
        drop(entity);
        assert_eq!(meta.refcount(), before);
    }

    #[test]
    fn unknown_dimension_reports_diagnostic() {
        let entity = chemistry_entity();
        assert!(entity.get_dimension_index("nope").is_err());
    }

    #[test]
    fn load_requires_verbatim_or_derivable_identity() {
        let registry = Registry::new(Vec::<PathBuf>::new());
        registry.register(crate::Arc::new(MockDriver::new("mock")));
        let storage = Storage::open(&registry, "mock", "mem://x", "", true).unwrap();
        // Empty id can only resolve through a freshly generated v4 uuid:
        // rejected per the fixed `entity_load` identity check.
        assert!(Entity::load(&storage, "").is_err());
    }

    #[test]
    fn save_then_load_round_trips_through_driver() {
        let registry = Registry::new(Vec::<PathBuf>::new());
        registry.register(crate::Arc::new(MockDriver::new("mock")));
        let storage = Storage::open(&registry, "mock", "mem://x", "", true).unwrap();
        let entity = chemistry_entity();
        entity.save(&storage).unwrap();
        let loaded = Entity::load(&storage, entity.uri()).unwrap();
        assert_eq!(loaded.uri(), entity.uri());
        assert_eq!(loaded.nproperties(), entity.nproperties());
        assert_eq!(loaded.ndimensions(), entity.ndimensions());
    }
}
