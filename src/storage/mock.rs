//! An in-memory storage driver implementing the full capability set,
//! used as the test fixture exercising load/save, entity persistence,
//! and the optional-capability-missing error path end to end (stands in
//! for the out-of-scope JSON driver).

use std::sync::Mutex;

use super::{Connection, DataModelHandle, Driver, EntityData, PropertyData, Result};
use crate::identity::Uuid;
use crate::{HashMap, Vec};

#[derive(Default, Clone)]
struct Record {
    metadata_uri: Option<String>,
    dimensions: HashMap<String, u64>,
    properties: HashMap<String, PropertyData>,
    data_name: Option<String>,
}

struct Store {
    records: Mutex<HashMap<Uuid, Record>>,
    entities: Mutex<HashMap<Uuid, EntityData>>,
}

pub struct MockDriver {
    name: String,
    store: std::sync::Arc<Store>,
}

impl MockDriver {
    pub fn new(name: impl Into<String>) -> Self {
        MockDriver {
            name: name.into(),
            store: std::sync::Arc::new(Store { records: Mutex::new(HashMap::new()), entities: Mutex::new(HashMap::new()) }),
        }
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, _uri: &str, _options: &str, writable: bool) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MockConnection { name: self.name.clone(), store: self.store.clone(), writable }))
    }
}

struct MockConnection {
    name: String,
    store: std::sync::Arc<Store>,
    writable: bool,
}

impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        &self.name
    }

    fn data_model(&self, uuid: Uuid) -> Result<Box<dyn DataModelHandle>> {
        self.store.records.lock().unwrap().entry(uuid).or_default();
        Ok(Box::new(MockDataModel { name: self.name.clone(), uuid, store: self.store.clone(), writable: self.writable }))
    }

    fn get_uuids(&self) -> Result<Vec<Uuid>> {
        Ok(self.store.records.lock().unwrap().keys().copied().collect())
    }

    fn get_entity(&self, uuid: Uuid) -> Result<EntityData> {
        self.store
            .entities
            .lock()
            .unwrap()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| super::Error::DriverIo { driver: self.name.clone(), message: format!("no entity {uuid}") })
    }

    fn set_entity(&self, uuid: Uuid, data: &EntityData) -> Result<()> {
        self.store.entities.lock().unwrap().insert(uuid, data.clone());
        Ok(())
    }
}

struct MockDataModel {
    name: String,
    uuid: Uuid,
    store: std::sync::Arc<Store>,
    writable: bool,
}

impl DataModelHandle for MockDataModel {
    fn driver_name(&self) -> &str {
        &self.name
    }

    fn metadata_uri(&self) -> Result<String> {
        self.store
            .records
            .lock()
            .unwrap()
            .get(&self.uuid)
            .and_then(|r| r.metadata_uri.clone())
            .ok_or_else(|| super::Error::DriverIo { driver: self.name.clone(), message: "no metadata uri set".into() })
    }

    fn dimension_size(&self, name: &str) -> Result<u64> {
        self.store
            .records
            .lock()
            .unwrap()
            .get(&self.uuid)
            .and_then(|r| r.dimensions.get(name).copied())
            .ok_or_else(|| super::Error::UnknownDimension { name: name.to_owned() })
    }

    fn property(&self, name: &str, _shape: &[u64]) -> Result<PropertyData> {
        self.store
            .records
            .lock()
            .unwrap()
            .get(&self.uuid)
            .and_then(|r| r.properties.get(name).cloned())
            .ok_or_else(|| super::Error::UnknownProperty { name: name.to_owned() })
    }

    fn set_metadata_uri(&self, uri: &str) -> Result<()> {
        self.guard_writable()?;
        self.store.records.lock().unwrap().entry(self.uuid).or_default().metadata_uri = Some(uri.to_owned());
        Ok(())
    }

    fn set_dimension_size(&self, name: &str, size: u64) -> Result<()> {
        self.guard_writable()?;
        self.store.records.lock().unwrap().entry(self.uuid).or_default().dimensions.insert(name.to_owned(), size);
        Ok(())
    }

    fn set_property(&self, name: &str, data: &PropertyData) -> Result<()> {
        self.guard_writable()?;
        self.store.records.lock().unwrap().entry(self.uuid).or_default().properties.insert(name.to_owned(), data.clone());
        Ok(())
    }

    fn has_property(&self, name: &str) -> Result<bool> {
        Ok(self.store.records.lock().unwrap().get(&self.uuid).map(|r| r.properties.contains_key(name)).unwrap_or(false))
    }

    fn get_data_name(&self) -> Result<Option<String>> {
        Ok(self.store.records.lock().unwrap().get(&self.uuid).and_then(|r| r.data_name.clone()))
    }

    fn set_data_name(&self, name: &str) -> Result<()> {
        self.guard_writable()?;
        self.store.records.lock().unwrap().entry(self.uuid).or_default().data_name = Some(name.to_owned());
        Ok(())
    }
}

impl MockDataModel {
    fn guard_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(super::Error::DriverIo { driver: self.name.clone(), message: "storage opened read-only".into() })
        }
    }
}
