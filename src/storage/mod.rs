//! Storage handles and the plugin registry that resolves named drivers
//!.

mod registry;

#[cfg(test)]
pub(crate) mod mock;

pub use registry::Registry;

use snafu::Snafu;
use tracing::{debug, info};

use crate::identity::Uuid;
use crate::typesystem::TypeTag;
use crate::{Arc, Vec};

/// Errors raised by storage handles, the plugin registry, and datamodel
/// handles obtained from a driver's connection.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "driver {driver:?} does not support capability {capability:?}"
    ))]
    MissingCapability { driver: String, capability: &'static str },

    #[snafu(display(
        "no storage driver named {name:?} is registered and none could be resolved from search path {search_path:?}; \
         set the {env} environment variable to point at a directory containing it",
        env = crate::settings::PLUGIN_DIRS_ENV
    ))]
    PluginResolutionFailed { name: String, search_path: Vec<String> },

    #[snafu(display("storage driver {driver:?} reported an I/O error: {message}"))]
    DriverIo { driver: String, message: String },

    #[snafu(display("dimension {name:?} not found"))]
    UnknownDimension { name: String },

    #[snafu(display("property {name:?} not found"))]
    UnknownProperty { name: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One element value transferred through a [`DataModelHandle`]: either a
/// single scalar or a flat, row-major array.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyData {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Blob(Vec<u8>),
    String(Vec<u8>),
    StringPointer(String),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    UintArray(Vec<u64>),
    FloatArray(Vec<f64>),
    BlobArray(Vec<Vec<u8>>),
    StringArray(Vec<Vec<u8>>),
    StringPointerArray(Vec<String>),
}

impl PropertyData {
    pub fn type_tag(&self) -> TypeTag {
        use PropertyData::*;
        match self {
            Bool(_) | BoolArray(_) => TypeTag::Bool,
            Int(_) | IntArray(_) => TypeTag::Int,
            Uint(_) | UintArray(_) => TypeTag::Uint,
            Float(_) | FloatArray(_) => TypeTag::Float,
            Blob(_) | BlobArray(_) => TypeTag::Blob,
            String(_) | StringArray(_) => TypeTag::String,
            StringPointer(_) | StringPointerArray(_) => TypeTag::StringPointer,
        }
    }
}

/// A raw dimension/property description as handed back by a driver's
/// `get_entity` fast path.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityData {
    pub uri: String,
    pub description: Option<String>,
    pub dimensions: Vec<(String, Option<String>)>,
    pub properties: Vec<PropertyRecord>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyRecord {
    pub name: String,
    pub type_name: String,
    pub size: usize,
    /// Dimension *names* as persisted; resolved to indices
    /// against the owning entity's dimension list at load time.
    pub dim_names: Vec<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
}

/// Per-`(storage, uuid)` façade a driver hands back from
/// [`Connection::data_model`]. Required core methods must be
/// implemented by every driver; optional ones default to
/// [`Error::MissingCapability`] naming the driver and the capability,
/// the idiomatic analogue of a null function pointer in the source
/// design's plugin record.
pub trait DataModelHandle: Send + Sync {
    fn driver_name(&self) -> &str;

    fn metadata_uri(&self) -> Result<String>;
    fn dimension_size(&self, name: &str) -> Result<u64>;
    fn property(&self, name: &str, shape: &[u64]) -> Result<PropertyData>;

    fn set_metadata_uri(&self, _uri: &str) -> Result<()> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "set_metadata" }.fail()
    }
    fn set_dimension_size(&self, _name: &str, _size: u64) -> Result<()> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "set_dimension_size" }.fail()
    }
    fn set_property(&self, _name: &str, _data: &PropertyData) -> Result<()> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "set_property" }.fail()
    }
    fn has_property(&self, _name: &str) -> Result<bool> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "has_property" }.fail()
    }
    fn get_data_name(&self) -> Result<Option<String>> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "get_data_name" }.fail()
    }
    fn set_data_name(&self, _name: &str) -> Result<()> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "set_data_name" }.fail()
    }
}

/// A live connection to a backing medium, obtained from
/// [`Driver::open`]. Required core: `data_model`/`data_model_free`,
/// `get_metadata`/`get_dimension_size`/`get_property` (the latter three
/// are really per-datamodel and live on [`DataModelHandle`]). Optional
/// extension: `get_uuids`, `get_entity`/`set_entity`.
pub trait Connection: Send + Sync {
    fn driver_name(&self) -> &str;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn data_model(&self, uuid: Uuid) -> Result<Box<dyn DataModelHandle>>;

    fn get_uuids(&self) -> Result<Vec<Uuid>> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "get_uuids" }.fail()
    }

    fn get_entity(&self, _uuid: Uuid) -> Result<EntityData> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "get_entity" }.fail()
    }

    fn set_entity(&self, _uuid: Uuid, _data: &EntityData) -> Result<()> {
        MissingCapabilitySnafu { driver: self.driver_name().to_owned(), capability: "set_entity" }.fail()
    }
}

/// A named storage driver, i.e. a plugin record without a
/// function-pointer table — here each capability is a trait method and
/// "optional" ones carry the default [`Error::MissingCapability`] body.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;
    fn open(&self, uri: &str, options: &str, writable: bool) -> Result<Box<dyn Connection>>;
}

/// Opaque handle holding a driver connection, the opening uri, an
/// options string, and a `writable` flag.
pub struct Storage {
    driver_name: crate::Cow<'static, str>,
    uri: String,
    options: String,
    writable: bool,
    connection: Box<dyn Connection>,
}

impl Storage {
    pub fn open(registry: &Registry, driver_name: &str, uri: &str, options: &str, writable: bool) -> Result<Self> {
        let driver = registry.resolve(driver_name)?;
        info!(driver = driver_name, uri, "opening storage");
        let connection = driver.open(uri, options, writable)?;
        Ok(Storage {
            driver_name: crate::Cow::Owned(driver_name.to_owned()),
            uri: uri.to_owned(),
            options: options.to_owned(),
            writable,
            connection,
        })
    }

    pub fn close(mut self) -> Result<()> {
        debug!(driver = %self.driver_name, uri = %self.uri, "closing storage");
        self.connection.close()
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockDriver;
    use std::path::PathBuf;

    #[test]
    fn open_resolves_registered_driver() {
        let registry = Registry::new(Vec::<PathBuf>::new());
        registry.register(Arc::new(MockDriver::new("json")));
        let storage = Storage::open(&registry, "json", "mem://x", "", true).unwrap();
        assert_eq!(storage.driver_name(), "json");
        storage.close().unwrap();
    }

    #[test]
    fn open_fails_with_diagnostic_when_unresolvable() {
        let registry = Registry::new(Vec::<PathBuf>::new());
        let err = Storage::open(&registry, "json", "mem://x", "", true).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("json"));
        assert!(message.contains(crate::settings::PLUGIN_DIRS_ENV));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn property_data_with_serde() {
        use serde_test::{assert_tokens, Token};

        assert_tokens(
            &PropertyData::Float(0.5),
            &[Token::NewtypeVariant { name: "PropertyData", variant: "Float" }, Token::F64(0.5)],
        );
        assert_tokens(
            &PropertyData::FloatArray(vec![1.0, 2.0]),
            &[
                Token::NewtypeVariant { name: "PropertyData", variant: "FloatArray" },
                Token::Seq { len: Some(2) },
                Token::F64(1.0),
                Token::F64(2.0),
                Token::SeqEnd,
            ],
        );
    }
}
