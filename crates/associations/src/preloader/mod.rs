//! Batched eager loading
//!
//! The [`Preloader`] loads associations for many owners at once: owners are grouped by
//! reflection and target model, and each group is fetched with one query per key chunk
//! instead of one query per owner.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::association::{set_inverse_instance, set_target_and_wire_inverse};
use crate::error::OrmResult;
use crate::includes::Includes;
use crate::query::{find_in_batches, BatchFind, QueryExecutor, Row};
use crate::record::{key_of, unique_records, Record};
use crate::reflection::{MacroKind, Reflection, Scope};
use crate::schema::{ModelType, Schema};

mod association;
mod habtm;
mod through;

/// Owners sharing one reflection, split by target model
///
/// A `None` model stands for polymorphic owners without a stored type.
type ReflectionGroup = (Arc<Reflection>, Vec<(Option<Arc<ModelType>>, Vec<Record>)>);

/// Loads associations for a set of owner records with batched queries
pub struct Preloader<'a> {
    schema: &'a Schema,
    executor: &'a dyn QueryExecutor,
}

impl<'a> Preloader<'a> {
    pub fn new(schema: &'a Schema, executor: &'a dyn QueryExecutor) -> Self {
        Self { schema, executor }
    }

    /// Preload `includes` on `records`
    ///
    /// Association names are checked for every owner model before any query runs.
    /// Associations that are already loaded on an owner are left alone.
    pub async fn run(&self, records: &[Record], includes: &Includes) -> OrmResult<()> {
        let records = unique_records(records.iter().cloned());
        let mut models: Vec<Arc<ModelType>> = Vec::new();
        for record in &records {
            if !models.iter().any(|model| Arc::ptr_eq(model, record.model())) {
                models.push(Arc::clone(record.model()));
            }
        }
        for model in &models {
            validate_includes(self.schema, model, includes)?;
        }
        self.preload(&records, includes, &[]).await
    }

    /// Limit on keys per batch query
    pub fn max_ids_in_list(&self) -> Option<usize> {
        self.schema
            .config()
            .max_ids_in_list
            .or_else(|| self.executor.max_ids_in_list())
    }

    fn preload<'b>(
        &'b self,
        records: &'b [Record],
        includes: &'b Includes,
        preload_scope: &'b [Scope],
    ) -> BoxFuture<'b, OrmResult<()>> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(());
            }
            match includes {
                Includes::Name(name) => self.preload_one(records, name, preload_scope).await,
                Includes::List(items) => {
                    for item in items {
                        self.preload(records, item, preload_scope).await?;
                    }
                    Ok(())
                }
                Includes::Nested(map) => {
                    for (parent, children) in map {
                        self.preload_one(records, parent, preload_scope).await?;
                        let associated =
                            unique_records(records.iter().flat_map(|record| record.cached_many(parent)));
                        self.preload(&associated, children, &[]).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn preload_one(&self, records: &[Record], name: &str, preload_scope: &[Scope]) -> OrmResult<()> {
        for (reflection, groups) in self.grouped_records(records, name)? {
            for (klass, owners) in groups {
                let owners: Vec<Record> = owners
                    .into_iter()
                    .filter(|owner| !owner.is_association_loaded(name))
                    .collect();
                if owners.is_empty() {
                    continue;
                }
                match klass {
                    Some(klass) => {
                        self.preload_association(&reflection, &klass, &owners, preload_scope)
                            .await?
                    }
                    None => {
                        for owner in &owners {
                            set_target_and_wire_inverse(self.schema, owner, &reflection, None)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn preload_association(
        &self,
        reflection: &Arc<Reflection>,
        klass: &Arc<ModelType>,
        owners: &[Record],
        preload_scope: &[Scope],
    ) -> OrmResult<()> {
        let records_by_owner = self
            .records_by_owner(reflection, klass, owners, preload_scope)
            .await?;
        self.assign(reflection, owners, records_by_owner)
    }

    /// Targets of `reflection` for each owner
    ///
    /// The owners' own cache for `reflection` is not written.
    fn records_by_owner<'b>(
        &'b self,
        reflection: &'b Arc<Reflection>,
        klass: &'b Arc<ModelType>,
        owners: &'b [Record],
        preload_scope: &'b [Scope],
    ) -> BoxFuture<'b, OrmResult<Vec<Vec<Record>>>> {
        Box::pin(async move {
            if reflection.is_through() {
                return self.through_records_by_owner(reflection, owners, preload_scope).await;
            }
            match reflection.macro_kind() {
                MacroKind::HasAndBelongsToMany => {
                    self.habtm_records_by_owner(reflection, klass, owners, preload_scope).await
                }
                _ => self.associated_records_by_owner(reflection, klass, owners, preload_scope).await,
            }
        })
    }

    /// Targets of the association `name` for each record, in record order
    ///
    /// Without a scope the association is preloaded and read back from the cache.
    /// A scoped lookup selects a subset, so it is fetched for every record and never
    /// cached as the whole association.
    async fn targets_for(&self, records: &[Record], name: &str, preload_scope: &[Scope]) -> OrmResult<Vec<Vec<Record>>> {
        if preload_scope.is_empty() {
            self.preload(records, &Includes::Name(name.to_string()), &[]).await?;
            return Ok(records
                .iter()
                .map(|record| {
                    record
                        .cached_association(name)
                        .map(|target| target.into_many())
                        .unwrap_or_default()
                })
                .collect());
        }

        let positions: HashMap<usize, usize> = records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.identity(), i))
            .collect();
        let mut targets = vec![Vec::new(); records.len()];
        for (reflection, groups) in self.grouped_records(records, name)? {
            for (klass, owners) in groups {
                let Some(klass) = klass else { continue };
                let found = self
                    .records_by_owner(&reflection, &klass, &owners, preload_scope)
                    .await?;
                for (owner, associated) in owners.iter().zip(found) {
                    for record in &associated {
                        set_inverse_instance(self.schema, owner, &reflection, record)?;
                    }
                    if let Some(&i) = positions.get(&owner.identity()) {
                        targets[i] = associated;
                    }
                }
            }
        }
        Ok(targets)
    }

    /// Group owners by the reflection `name` resolves to on their model, then by target model
    fn grouped_records(&self, records: &[Record], name: &str) -> OrmResult<Vec<ReflectionGroup>> {
        let mut groups: Vec<ReflectionGroup> = Vec::new();
        for record in records {
            let reflection = self.schema.reflect_on_association(record.model(), name)?;
            let index = match groups.iter().position(|(r, _)| Arc::ptr_eq(r, &reflection)) {
                Some(index) => index,
                None => {
                    reflection.check_validity(self.schema)?;
                    groups.push((Arc::clone(&reflection), Vec::new()));
                    groups.len() - 1
                }
            };
            let klass = self.association_klass(&reflection, record)?;

            let klasses = &mut groups[index].1;
            let same_klass = |candidate: &Option<Arc<ModelType>>| match (candidate, &klass) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            match klasses.iter_mut().find(|(candidate, _)| same_klass(candidate)) {
                Some((_, owners)) => owners.push(record.clone()),
                None => klasses.push((klass, vec![record.clone()])),
            }
        }
        Ok(groups)
    }

    fn association_klass(&self, reflection: &Reflection, record: &Record) -> OrmResult<Option<Arc<ModelType>>> {
        if reflection.is_belongs_to() && reflection.is_polymorphic() {
            return match record.get(&reflection.foreign_type(self.schema)?) {
                JsonValue::String(name) if !name.is_empty() => self.schema.model(&name).map(Some),
                _ => Ok(None),
            };
        }
        reflection.klass(self.schema).map(Some)
    }

    /// Run a batched lookup with the effective chunk limit
    async fn fetch(&self, find: BatchFind) -> OrmResult<Vec<Row>> {
        find_in_batches(
            self.executor,
            &find,
            self.max_ids_in_list(),
            self.schema.config().parallel_batches,
        )
        .await
    }

    /// Put fetched targets on their owners
    fn assign(&self, reflection: &Arc<Reflection>, owners: &[Record], records_by_owner: Vec<Vec<Record>>) -> OrmResult<()> {
        for (owner, records) in owners.iter().zip(records_by_owner) {
            if reflection.is_collection() {
                owner.mark_loaded(reflection);
                for record in records {
                    owner.push_target(reflection, record.clone());
                    set_inverse_instance(self.schema, owner, reflection, &record)?;
                }
            } else {
                if records.len() > 1 && reflection.macro_kind() == MacroKind::HasOne {
                    tracing::warn!(
                        "{} rows match has_one {}#{} for owner {:?}; keeping the first",
                        records.len(),
                        owner.model_name(),
                        reflection.name(),
                        owner.id()
                    );
                }
                set_target_and_wire_inverse(self.schema, owner, reflection, records.into_iter().next())?;
            }
        }
        Ok(())
    }
}

/// Owners keyed by the normalized value of `column`; owners with a null key are left out
pub(crate) fn owners_by_key(owners: &[Record], column: &str) -> IndexMap<String, Vec<usize>> {
    let mut map: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (i, owner) in owners.iter().enumerate() {
        if let Some(key) = owner.key(column) {
            map.entry(key).or_default().push(i);
        }
    }
    map
}

/// Distribute fetched records to owners by the value of `key_column` in each row
///
/// The result holds one list per owner, in owner order.
pub(crate) fn group_by_owner(
    owners: &[Record],
    owners_by_key: &IndexMap<String, Vec<usize>>,
    records: impl IntoIterator<Item = (JsonValue, Record)>,
) -> Vec<Vec<Record>> {
    let mut records_by_owner = vec![Vec::new(); owners.len()];
    for (key, record) in records {
        let indexes = key_of(&key).and_then(|key| owners_by_key.get(&key));
        for &i in indexes.into_iter().flatten() {
            records_by_owner[i].push(record.clone());
        }
    }
    records_by_owner
}

/// Key column value of every owner, without repeats or nulls
pub(crate) fn owner_keys(owners: &[Record], column: &str) -> Vec<JsonValue> {
    crate::query::executor::unique_keys(owners.iter().map(|owner| owner.get(column)))
}

/// Check that every name in `includes` resolves, starting from `model`
///
/// Nested includes below a polymorphic belongs-to cannot be checked statically.
pub fn validate_includes(schema: &Schema, model: &ModelType, includes: &Includes) -> OrmResult<()> {
    match includes {
        Includes::Name(name) => {
            schema.reflect_on_association(model, name)?.check_validity(schema)?;
        }
        Includes::List(items) => {
            for item in items {
                validate_includes(schema, model, item)?;
            }
        }
        Includes::Nested(map) => {
            for (name, children) in map {
                let reflection = schema.reflect_on_association(model, name)?;
                reflection.check_validity(schema)?;
                if reflection.is_polymorphic() {
                    continue;
                }
                let klass = reflection.klass(schema)?;
                validate_includes(schema, &klass, children)?;
            }
        }
    }
    Ok(())
}

impl std::fmt::Debug for Preloader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preloader")
            .field("schema", self.schema)
            .field("max_ids_in_list", &self.max_ids_in_list())
            .finish()
    }
}
