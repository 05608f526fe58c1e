//! The singleton meta-entity: the schema describing entities themselves.
//! A `static` `OnceLock` holds one permanent strong reference for the
//! life of the process, giving it a permanently pinned refcount that
//! never drops to zero.

use std::sync::OnceLock;

use super::{Dimension, Entity, Property};
use crate::typesystem::TypeTag;

const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// The schema describing entities: every [`Entity`] created through
/// [`Entity::create`] links to this singleton as its `meta`.
/// Its layout is hard-coded from a fixed dimension/property list rather
/// than computed from a user-supplied schema, but goes through the same
/// [`Entity::create_meta`] sweep every other entity's layout does.
pub fn meta_entity() -> &'static Entity {
    static META_ENTITY: OnceLock<Entity> = OnceLock::new();
    META_ENTITY.get_or_init(|| {
        let dimensions = vec![Dimension::new("ndimensions"), Dimension::new("nproperties")];
        let properties = vec![
            Property::scalar("uri", TypeTag::StringPointer, POINTER_SIZE),
            Property::scalar("description", TypeTag::StringPointer, POINTER_SIZE),
            // Dimension/property records themselves are opaque blobs
            // from the metaclass's point of view; their internal shape
            // is `Dimension`/`Property` as defined above, not something
            // the meta-entity's own layout needs to know about.
            Property::array("dimensions", TypeTag::Blob, std::mem::size_of::<usize>() * 2, vec![0]),
            Property::array("properties", TypeTag::Blob, std::mem::size_of::<usize>() * 4, vec![1]),
        ];
        Entity::create_meta("dlite/0.1/EntitySchema", dimensions, properties)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_entity_is_a_stable_singleton() {
        let a = meta_entity();
        let b = meta_entity();
        assert_eq!(a.uuid(), b.uuid());
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn meta_entity_has_no_meta_of_its_own() {
        assert!(meta_entity().meta().is_none());
    }
}
