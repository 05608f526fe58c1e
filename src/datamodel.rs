//! Per-instance façade over a [`crate::storage::Storage`].

use snafu::Snafu;
use tracing::trace;

use crate::identity::{self, Origin, Uuid};
use crate::storage::{self, Connection, DataModelHandle, PropertyData, Storage};
use crate::Vec;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("storage error"))]
    Storage { source: storage::Error },
}

impl From<storage::Error> for Error {
    fn from(source: storage::Error) -> Self {
        Error::Storage { source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Opaque handle bound to `(storage, uuid)` through which typed
/// dimension sizes and property values are transferred.
pub struct DataModel<'s> {
    uuid: Uuid,
    handle: Box<dyn DataModelHandle>,
    storage: &'s Storage,
}

impl<'s> DataModel<'s> {
    /// Generate the canonical uuid for `id`, ask the driver for a fresh
    /// datamodel handle, and — if `id` was a readable name the driver
    /// can persist — record it via `set_data_name` when the storage is
    /// writable and the driver supports it.
    pub fn new(storage: &'s Storage, id: &str) -> Result<Self> {
        let (uuid, origin) = identity::get_uuid(id);
        trace!(%uuid, ?origin, "opening datamodel");
        let handle = storage.connection().data_model(uuid)?;
        let model = DataModel { uuid, handle, storage };
        if origin == Origin::Derived && storage.writable() {
            model.try_set_data_name(id)?;
        }
        Ok(model)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn storage(&self) -> &Storage {
        self.storage
    }

    pub fn get_metadata(&self) -> Result<String> {
        Ok(self.handle.metadata_uri()?)
    }

    pub fn get_dimension_size(&self, name: &str) -> Result<u64> {
        Ok(self.handle.dimension_size(name)?)
    }

    pub fn get_property(&self, name: &str, shape: &[u64]) -> Result<PropertyData> {
        Ok(self.handle.property(name, shape)?)
    }

    pub fn set_metadata(&self, uri: &str) -> Result<()> {
        Ok(self.handle.set_metadata_uri(uri)?)
    }

    pub fn set_dimension_size(&self, name: &str, size: u64) -> Result<()> {
        Ok(self.handle.set_dimension_size(name, size)?)
    }

    pub fn set_property(&self, name: &str, data: &PropertyData) -> Result<()> {
        Ok(self.handle.set_property(name, data)?)
    }

    pub fn has_property(&self, name: &str) -> Result<bool> {
        Ok(self.handle.has_property(name)?)
    }

    pub fn get_data_name(&self) -> Result<Option<String>> {
        Ok(self.handle.get_data_name()?)
    }

    /// Like [`DataModel::set_data_name`] but treats a missing capability
    /// as success rather than an error — used internally by `new` for
    /// housekeeping that is best-effort, not by callers who explicitly
    /// asked for the name to be persisted.
    fn try_set_data_name(&self, name: &str) -> Result<()> {
        match self.handle.set_data_name(name) {
            Ok(()) => Ok(()),
            Err(storage::Error::MissingCapability { .. }) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    pub fn set_data_name(&self, name: &str) -> Result<()> {
        Ok(self.handle.set_data_name(name)?)
    }
}

/// A ragged, pointer-to-pointer-shaped array as some drivers prefer it,
/// versus the contiguous C-order buffer [`copy_to_flat`] produces. One
/// well-specified N-dimensional walk, shared by both directions below.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Leaf(Vec<T>),
    Branch(Vec<Nested<T>>),
}

/// Reshape a contiguous, row-major (C-order) buffer into a ragged
/// `Nested` tree of the given `shape`.
pub fn copy_to_nested<T: Clone>(flat: &[T], shape: &[u64]) -> Nested<T> {
    build_nested(flat, shape)
}

fn build_nested<T: Clone>(flat: &[T], shape: &[u64]) -> Nested<T> {
    match shape {
        [] | [_] => Nested::Leaf(flat.to_vec()),
        [n, rest @ ..] => {
            let stride: usize = rest.iter().product::<u64>() as usize;
            let mut branches = Vec::with_capacity(*n as usize);
            for i in 0..*n as usize {
                branches.push(build_nested(&flat[i * stride..(i + 1) * stride], rest));
            }
            Nested::Branch(branches)
        }
    }
}

/// Flatten a ragged `Nested` tree into a contiguous, row-major buffer.
pub fn copy_to_flat<T: Clone>(nested: &Nested<T>) -> Vec<T> {
    let mut out = Vec::new();
    flatten_into(nested, &mut out);
    out
}

fn flatten_into<T: Clone>(nested: &Nested<T>, out: &mut Vec<T>) {
    match nested {
        Nested::Leaf(values) => out.extend_from_slice(values),
        Nested::Branch(children) => {
            for child in children {
                flatten_into(child, out);
            }
        }
    }
}
