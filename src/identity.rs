//! Canonical instance identity: UUID derivation and metadata-uri helpers.
//!
//! Grounded on `uid.rs`'s validate-then-derive shape; the v4/v5 split
//! itself has no DICOM analogue and follows the uuid derivation rule
//! directly.

use snafu::Snafu;

/// Re-exported so callers never need to depend on the `uuid` crate
/// themselves.
pub use uuid::Uuid;

/// How a [`Uuid`] returned by [`get_uuid`] came to be.
///
/// Mirrors the version tag `get_uuid` returns in the source design:
/// `0` for [`Origin::Verbatim`], `4` for [`Origin::Generated`], `5` for
/// [`Origin::Derived`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// `id` was already a canonical UUID string; copied verbatim.
    Verbatim,
    /// `id` was empty; a random v4 UUID was generated.
    Generated,
    /// `id` was a non-empty, non-UUID string; a v5 UUID was derived from
    /// it under the DNS namespace.
    Derived,
}

impl Origin {
    /// The version tag the source design returns for this origin.
    pub fn version_tag(self) -> i32 {
        match self {
            Origin::Verbatim => 0,
            Origin::Generated => 4,
            Origin::Derived => 5,
        }
    }
}

/// Derive the canonical identity for a user-supplied id.
///
/// - `id` empty → a random v4 UUID, [`Origin::Generated`].
/// - `id` already a valid (hyphenated, lowercase-or-not) UUID string →
///   copied verbatim, [`Origin::Verbatim`].
/// - Otherwise → a v5 UUID derived from `id` under the DNS namespace,
///   [`Origin::Derived`]; deterministic across calls and machines.
///
/// The returned [`Uuid`] always renders as 36 lowercase characters.
pub fn get_uuid(id: &str) -> (Uuid, Origin) {
    if id.is_empty() {
        return (Uuid::new_v4(), Origin::Generated);
    }
    if let Ok(parsed) = Uuid::parse_str(id) {
        return (parsed, Origin::Verbatim);
    }
    (Uuid::new_v5(&Uuid::NAMESPACE_DNS, id.as_bytes()), Origin::Derived)
}

/// Errors from the metadata-uri helpers.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("metadata uri {uri:?} has fewer than two '/' separators"))]
    MalformedUri { uri: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Build the canonical metadata uri `namespace/version/name`.
pub fn join(name: &str, version: &str, namespace: &str) -> String {
    format!("{namespace}/{version}/{name}")
}

/// Split a canonical metadata uri into `(name, version, namespace)` using
/// the last two `/` characters as separators.
pub fn split(uri: &str) -> Result<(&str, &str, &str)> {
    let last = uri.rfind('/').ok_or_else(|| Error::MalformedUri { uri: uri.to_owned() })?;
    let (head, name) = uri.split_at(last);
    let name = &name[1..];
    let second_last = head.rfind('/').ok_or_else(|| Error::MalformedUri { uri: uri.to_owned() })?;
    let (namespace, version) = head.split_at(second_last);
    let version = &version[1..];
    Ok((name, version, namespace))
}
