//! Labelled bags of instance references backed by an RDF-like triple
//! store.

use std::sync::Mutex;

use snafu::Snafu;
use tracing::trace;

use crate::instance::Instance;
use crate::metadata::Dimension;
use crate::Vec;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("cannot add {label:?} to collection: instance has no meta"))]
    NoMeta { label: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stable identifier of one stored triple, used by `remove_by_id` and by
/// `_has-dimmap` triples to reference another triple in the same store.
pub type TripleId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// Opaque cursor handed back by [`TripleStore::init_state`] and advanced
/// by [`TripleStore::find`]. Callers must not mutate the store while
/// holding one.
pub struct FindState {
    cursor: usize,
}

/// The fact-storage primitive a [`Collection`] delegates to. `s`/`p`/`o` parameters of
/// `None` act as a wildcard.
pub trait TripleStore: Send + Sync {
    fn add(&self, subject: &str, predicate: &str, object: &str) -> TripleId;

    /// Remove every triple matching the pattern, returning how many were
    /// removed.
    fn remove(&self, subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> usize;

    fn remove_by_id(&self, id: TripleId);

    fn find_first(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Option<(TripleId, Triple)>;

    fn init_state(&self) -> FindState;

    /// Advance `state` to the next triple matching the pattern, or
    /// `None` when exhausted.
    fn find(
        &self,
        state: &mut FindState,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Option<(TripleId, Triple)>;
}

/// Default in-memory [`TripleStore`]: an append-only, hole-punched
/// vector behind a mutex, scanned linearly on each lookup.
#[derive(Default)]
pub struct MemoryTripleStore {
    triples: Mutex<Vec<Option<Triple>>>,
}

impl MemoryTripleStore {
    pub fn new() -> Self {
        MemoryTripleStore { triples: Mutex::new(Vec::new()) }
    }

    fn matches(triple: &Triple, subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> bool {
        subject.map_or(true, |s| s == triple.subject)
            && predicate.map_or(true, |p| p == triple.predicate)
            && object.map_or(true, |o| o == triple.object)
    }
}

impl TripleStore for MemoryTripleStore {
    fn add(&self, subject: &str, predicate: &str, object: &str) -> TripleId {
        let mut triples = self.triples.lock().unwrap();
        let id = triples.len();
        triples.push(Some(Triple { subject: subject.to_owned(), predicate: predicate.to_owned(), object: object.to_owned() }));
        id
    }

    fn remove(&self, subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> usize {
        let mut triples = self.triples.lock().unwrap();
        let mut removed = 0;
        for slot in triples.iter_mut() {
            if slot.as_ref().is_some_and(|t| Self::matches(t, subject, predicate, object)) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    fn remove_by_id(&self, id: TripleId) {
        let mut triples = self.triples.lock().unwrap();
        if let Some(slot) = triples.get_mut(id) {
            *slot = None;
        }
    }

    fn find_first(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Option<(TripleId, Triple)> {
        let triples = self.triples.lock().unwrap();
        triples.iter().enumerate().find_map(|(id, slot)| {
            slot.as_ref()
                .filter(|t| Self::matches(t, subject, predicate, object))
                .map(|t| (id, t.clone()))
        })
    }

    fn init_state(&self) -> FindState {
        FindState { cursor: 0 }
    }

    fn find(
        &self,
        state: &mut FindState,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Option<(TripleId, Triple)> {
        let triples = self.triples.lock().unwrap();
        while state.cursor < triples.len() {
            let id = state.cursor;
            state.cursor += 1;
            if let Some(triple) = &triples[id] {
                if Self::matches(triple, subject, predicate, object) {
                    return Some((id, triple.clone()));
                }
            }
        }
        None
    }
}

const IS_A: &str = "_is-a";
const HAS_UUID: &str = "_has-uuid";
const HAS_META: &str = "_has-meta";
const HAS_DIMMAP: &str = "_has-dimmap";
const INSTANCE_MARK: &str = "Instance";

/// A bag of labelled instance references over a [`TripleStore`]. Holds
/// labels and uuids, not strong instance references: dropping a
/// collection never frees the instances it recorded.
pub struct Collection {
    id: String,
    uri: Option<String>,
    dimensions: Vec<Dimension>,
    store: Box<dyn TripleStore>,
}

impl Collection {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_store(id, Vec::new(), Box::new(MemoryTripleStore::new()))
    }

    pub fn with_store(id: impl Into<String>, dimensions: Vec<Dimension>, store: Box<dyn TripleStore>) -> Self {
        Collection { id: id.into(), uri: None, dimensions, store }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Record `instance` under `label`: fails if the
    /// instance has no meta, otherwise adds its `_is-a`/`_has-uuid`/
    /// `_has-meta` triples.
    pub fn add(&self, label: &str, instance: &Instance) -> Result<()> {
        let meta = instance.entity().meta().ok_or_else(|| Error::NoMeta { label: label.to_owned() })?;
        self.store.add(label, IS_A, INSTANCE_MARK);
        self.store.add(label, HAS_UUID, &instance.uuid().to_string());
        self.store.add(label, HAS_META, meta.uri());
        trace!(label, uuid = %instance.uuid(), "added instance to collection");
        Ok(())
    }

    /// Remove `label`'s `_is-a` marker; if it was present, also follow
    /// and delete any `_has-dimmap` targets by id, then clear the
    /// uuid/meta/dimmap triples.
    pub fn remove(&self, label: &str) {
        let removed = self.store.remove(Some(label), Some(IS_A), None);
        if removed == 0 {
            return;
        }
        let mut targets = Vec::new();
        let mut state = self.store.init_state();
        while let Some((_, triple)) = self.store.find(&mut state, Some(label), Some(HAS_DIMMAP), None) {
            if let Ok(id) = triple.object.parse::<TripleId>() {
                targets.push(id);
            }
        }
        for id in targets {
            self.store.remove_by_id(id);
        }
        self.store.remove(Some(label), Some(HAS_UUID), None);
        self.store.remove(Some(label), Some(HAS_META), None);
        self.store.remove(Some(label), Some(HAS_DIMMAP), None);
        trace!(label, "removed instance from collection");
    }

    /// Direct passthrough to the backing triple store.
    pub fn add_relation(&self, subject: &str, predicate: &str, object: &str) -> TripleId {
        self.store.add(subject, predicate, object)
    }

    /// Direct passthrough to the backing triple store.
    pub fn remove_relations(&self, subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> usize {
        self.store.remove(subject, predicate, object)
    }

    pub fn init_state(&self) -> FindState {
        self.store.init_state()
    }

    /// Advance `state` to the next triple matching the pattern. Callers
    /// must not mutate the collection while iterating.
    pub fn find(
        &self,
        state: &mut FindState,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Option<Triple> {
        self.store.find(state, subject, predicate, object).map(|(_, t)| t)
    }

    pub fn find_first(&self, subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> Option<Triple> {
        self.store.find_first(subject, predicate, object).map(|(_, t)| t)
    }

    /// An iterator over every triple matching the pattern, wrapping
    /// [`Collection::init_state`]/[`Collection::find`]. Callers must not
    /// mutate the collection while iterating.
    pub fn iter<'collection, 'pattern>(
        &'collection self,
        subject: Option<&'pattern str>,
        predicate: Option<&'pattern str>,
        object: Option<&'pattern str>,
    ) -> CollectionIter<'collection, 'pattern> {
        CollectionIter { collection: self, state: self.store.init_state(), subject, predicate, object }
    }
}

/// Iterator returned by [`Collection::iter`].
pub struct CollectionIter<'collection, 'pattern> {
    collection: &'collection Collection,
    state: FindState,
    subject: Option<&'pattern str>,
    predicate: Option<&'pattern str>,
    object: Option<&'pattern str>,
}

impl Iterator for CollectionIter<'_, '_> {
    type Item = Triple;

    fn next(&mut self) -> Option<Triple> {
        self.collection.find(&mut self.state, self.subject, self.predicate, self.object)
    }
}
