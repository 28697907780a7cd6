//! Materialized domain objects

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;

use crate::association::AssociationTarget;
use crate::query::Row;
use crate::reflection::Reflection;
use crate::schema::ModelType;

/// Normalized form of a key value: values are compared by their string form and
/// `null` is never a key
pub fn key_of(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        }),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// A link from an association to its target
pub(crate) enum Link {
    Owned(Record),
    /// Back-reference set by inverse wiring; never keeps the target alive
    Inverse(WeakRecord),
}

impl Link {
    fn get(&self) -> Option<Record> {
        match self {
            Link::Owned(record) => Some(record.clone()),
            Link::Inverse(weak) => weak.upgrade(),
        }
    }

    fn is_dangling(&self) -> bool {
        matches!(self, Link::Inverse(weak) if weak.upgrade().is_none())
    }
}

pub(crate) enum Target {
    Singular(Option<Link>),
    Collection(Vec<Record>),
}

/// Cached state of one association on one record
pub(crate) struct AssociationState {
    pub(crate) reflection: Arc<Reflection>,
    pub(crate) loaded: bool,
    pub(crate) target: Target,
}

impl AssociationState {
    fn new(reflection: &Arc<Reflection>) -> Self {
        let target = if reflection.is_collection() {
            Target::Collection(Vec::new())
        } else {
            Target::Singular(None)
        };
        Self {
            reflection: Arc::clone(reflection),
            loaded: false,
            target,
        }
    }

    fn is_loaded(&self) -> bool {
        match &self.target {
            Target::Singular(Some(link)) => self.loaded && !link.is_dangling(),
            _ => self.loaded,
        }
    }

    fn snapshot(&self) -> AssociationTarget {
        match &self.target {
            Target::Singular(link) => AssociationTarget::One(link.as_ref().and_then(Link::get)),
            Target::Collection(records) => AssociationTarget::Many(records.clone()),
        }
    }
}

struct RecordInner {
    model: Arc<ModelType>,
    attributes: RwLock<Row>,
    persisted: AtomicBool,
    associations: Mutex<HashMap<String, AssociationState>>,
}

/// A shared handle to one domain object
///
/// Cloning a `Record` clones the handle, not the object. Two handles are the same
/// object when [`Record::ptr_eq`] holds; `==` compares base class and primary key.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

/// A non-owning reference to a [`Record`]
#[derive(Clone)]
pub struct WeakRecord {
    inner: Weak<RecordInner>,
}

impl WeakRecord {
    pub fn upgrade(&self) -> Option<Record> {
        self.inner.upgrade().map(|inner| Record { inner })
    }
}

impl Record {
    /// A new, unsaved record
    pub fn new(model: Arc<ModelType>, attributes: Row) -> Self {
        Self::build(model, attributes, false)
    }

    /// A record loaded from storage
    pub(crate) fn from_row(model: Arc<ModelType>, attributes: Row) -> Self {
        Self::build(model, attributes, true)
    }

    fn build(model: Arc<ModelType>, attributes: Row, persisted: bool) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                model,
                attributes: RwLock::new(attributes),
                persisted: AtomicBool::new(persisted),
                associations: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn model(&self) -> &Arc<ModelType> {
        &self.inner.model
    }

    pub fn model_name(&self) -> &str {
        self.inner.model.name()
    }

    /// Attribute value; `null` when absent
    pub fn get(&self, column: &str) -> JsonValue {
        self.inner
            .attributes
            .read()
            .get(column)
            .cloned()
            .unwrap_or(JsonValue::Null)
    }

    pub fn set(&self, column: impl Into<String>, value: impl Into<JsonValue>) {
        self.inner.attributes.write().insert(column.into(), value.into());
    }

    pub fn attributes(&self) -> Row {
        self.inner.attributes.read().clone()
    }

    /// Primary key value, if set
    pub fn id(&self) -> Option<JsonValue> {
        Some(self.get(self.inner.model.primary_key())).filter(|id| !id.is_null())
    }

    /// Normalized value of a key column
    pub fn key(&self, column: &str) -> Option<String> {
        key_of(&self.get(column))
    }

    pub fn is_persisted(&self) -> bool {
        self.inner.persisted.load(Ordering::Acquire)
    }

    pub fn mark_persisted(&self) {
        self.inner.persisted.store(true, Ordering::Release);
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakRecord {
        WeakRecord {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True when the association has been loaded and its target is still reachable
    pub fn is_association_loaded(&self, name: &str) -> bool {
        self.inner
            .associations
            .lock()
            .get(name)
            .map(AssociationState::is_loaded)
            .unwrap_or(false)
    }

    /// The loaded target of an association, or `None` if it is not loaded
    pub fn cached_association(&self, name: &str) -> Option<AssociationTarget> {
        let associations = self.inner.associations.lock();
        let state = associations.get(name)?;
        if state.is_loaded() {
            Some(state.snapshot())
        } else {
            None
        }
    }

    /// Loaded singular target, flattened
    pub fn cached_one(&self, name: &str) -> Option<Record> {
        self.cached_association(name).and_then(AssociationTarget::into_one)
    }

    /// Loaded collection target; empty when not loaded
    pub fn cached_many(&self, name: &str) -> Vec<Record> {
        self.cached_association(name)
            .map(AssociationTarget::into_many)
            .unwrap_or_default()
    }

    /// Drop every cached association
    pub fn clear_association_cache(&self) {
        self.inner.associations.lock().clear();
    }

    pub(crate) fn replace_attributes(&self, attributes: Row) {
        *self.inner.attributes.write() = attributes;
    }

    pub(crate) fn reset_association(&self, name: &str) {
        self.inner.associations.lock().remove(name);
    }

    pub(crate) fn with_association<R>(
        &self,
        reflection: &Arc<Reflection>,
        f: impl FnOnce(&mut AssociationState) -> R,
    ) -> R {
        let mut associations = self.inner.associations.lock();
        let state = associations
            .entry(reflection.name().to_string())
            .or_insert_with(|| AssociationState::new(reflection));
        f(state)
    }

    /// Set a singular target and mark it loaded
    pub(crate) fn set_singular(&self, reflection: &Arc<Reflection>, target: Option<Link>) {
        self.with_association(reflection, |state| {
            state.target = Target::Singular(target);
            state.loaded = true;
        });
    }

    /// Mark a collection loaded, keeping anything already in it
    pub(crate) fn mark_loaded(&self, reflection: &Arc<Reflection>) {
        self.with_association(reflection, |state| {
            if !state.loaded {
                state.loaded = true;
                state.target = Target::Collection(Vec::new());
            }
        });
    }

    pub(crate) fn push_target(&self, reflection: &Arc<Reflection>, record: Record) {
        self.with_association(reflection, |state| {
            if let Target::Collection(records) = &mut state.target {
                records.push(record);
            }
        });
    }

    pub(crate) fn set_collection(&self, reflection: &Arc<Reflection>, records: Vec<Record>) {
        self.with_association(reflection, |state| {
            state.target = Target::Collection(records);
            state.loaded = true;
        });
    }

    /// Remove duplicate members of a loaded collection, keeping first occurrences
    pub(crate) fn dedupe_collection(&self, name: &str) {
        let records = match self.cached_association(name) {
            Some(AssociationTarget::Many(records)) => records,
            _ => return,
        };
        let unique = unique_records_by_value(records);
        let mut associations = self.inner.associations.lock();
        if let Some(state) = associations.get_mut(name) {
            state.target = Target::Collection(unique);
        }
    }

    /// Address of the shared instance
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Base class and normalized id; two records with the same value are equal
    fn value_key(&self) -> Option<(String, String)> {
        let id = key_of(&self.id()?)?;
        Some((self.inner.model.base_class().to_string(), id))
    }
}

/// Records without repeated instances, in first-seen order
pub(crate) fn unique_records(records: impl IntoIterator<Item = Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.identity()))
        .collect()
}

/// Records without repeats under `==`, in first-seen order
pub(crate) fn unique_records_by_value(records: impl IntoIterator<Item = Record>) -> Vec<Record> {
    let mut instances = HashSet::new();
    let mut values = HashSet::new();
    let mut unique = Vec::new();
    for record in records {
        if !instances.insert(record.identity()) {
            continue;
        }
        if let Some(value) = record.value_key() {
            if !values.insert(value) {
                continue;
            }
        }
        unique.push(record);
    }
    unique
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.inner.model.base_class() != other.inner.model.base_class() {
            return false;
        }
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => key_of(&a) == key_of(&b),
            _ => false,
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model_name())
            .field("attributes", &*self.inner.attributes.read())
            .field("persisted", &self.is_persisted())
            .finish()
    }
}

impl fmt::Debug for WeakRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(record) => write!(f, "WeakRecord({}#{:?})", record.model_name(), record.id()),
            None => f.write_str("WeakRecord(dropped)"),
        }
    }
}
