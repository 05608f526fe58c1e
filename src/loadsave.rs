//! Orchestration tying entities, instances, datamodels and storage
//! together.
//!
//! Neither [`crate::instance::Instance::load`]/`save` nor
//! [`crate::metadata::Entity::load`]/`save` know about any specific
//! driver — they go through the storage/datamodel plugin interfaces
//! only. This module is thin wiring for the common case where a caller
//! wants an entity and an instance of it loaded or saved together.

use snafu::{ResultExt, Snafu};

use crate::instance::{self, Instance};
use crate::metadata::{self, Entity};
use crate::storage::Storage;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("loading/saving entity {uri}"))]
    Entity { uri: String, source: metadata::Error },

    #[snafu(display("loading/saving instance"))]
    Instance { source: instance::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Load the entity named `entity_uri` through its driver-native fast
/// path, then load the instance `id` against it.
pub fn load_instance(storage: &Storage, id: &str, entity_uri: &str) -> Result<(Entity, Instance)> {
    let entity = Entity::load(storage, entity_uri).context(EntitySnafu { uri: entity_uri.to_owned() })?;
    let instance = Instance::load(storage, id, &entity).context(InstanceSnafu)?;
    Ok((entity, instance))
}

/// Save `instance`'s entity through the driver-native fast path, then
/// save the instance itself through the generic property-by-property
/// path.
pub fn save_instance(storage: &Storage, instance: &Instance) -> Result<()> {
    instance.entity().save(storage).context(EntitySnafu { uri: instance.entity().uri().to_owned() })?;
    instance.save(storage).context(InstanceSnafu)
}
