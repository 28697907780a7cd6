//! Association runtime objects
//!
//! The loaded state of an association lives in the owner record's association cache.
//! An [`AssociationHandle`] binds that state to a [`Session`] so it can be loaded,
//! reloaded and replaced.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{OrmError, OrmResult};
use crate::query::{Predicate, Row, TableRef, WriteOp};
use crate::record::{Link, Record};
use crate::reflection::{MacroKind, Reflection};
use crate::schema::{ModelType, Schema};
use crate::session::Session;

pub mod callbacks;
pub mod scope;

pub use callbacks::AssociationCallback;
pub use scope::AssociationScope;

use callbacks::{fire, CallbackKind};

/// The target of an association
#[derive(Debug, Clone)]
pub enum AssociationTarget {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl AssociationTarget {
    pub fn into_one(self) -> Option<Record> {
        match self {
            AssociationTarget::One(record) => record,
            AssociationTarget::Many(records) => records.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<Record> {
        match self {
            AssociationTarget::One(record) => record.into_iter().collect(),
            AssociationTarget::Many(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AssociationTarget::One(record) => usize::from(record.is_some()),
            AssociationTarget::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Record> for AssociationTarget {
    fn from(record: Record) -> Self {
        AssociationTarget::One(Some(record))
    }
}

impl From<Option<Record>> for AssociationTarget {
    fn from(record: Option<Record>) -> Self {
        AssociationTarget::One(record)
    }
}

impl From<Vec<Record>> for AssociationTarget {
    fn from(records: Vec<Record>) -> Self {
        AssociationTarget::Many(records)
    }
}

/// Set an already fetched singular target and wire its inverse
///
/// No query is issued; used by the preloader and by join reconstruction.
pub(crate) fn set_target_and_wire_inverse(
    schema: &Schema,
    owner: &Record,
    reflection: &Arc<Reflection>,
    target: Option<Record>,
) -> OrmResult<()> {
    owner.set_singular(reflection, target.clone().map(Link::Owned));
    if let Some(target) = &target {
        set_inverse_instance(schema, owner, reflection, target)?;
    }
    Ok(())
}

/// Point `record`'s inverse association back at `owner`
pub(crate) fn set_inverse_instance(
    schema: &Schema,
    owner: &Record,
    reflection: &Arc<Reflection>,
    record: &Record,
) -> OrmResult<()> {
    if let Some(inverse) = inverse_reflection_for(schema, reflection, record)? {
        record.set_singular(&inverse, Some(Link::Inverse(owner.downgrade())));
    }
    Ok(())
}

fn inverse_reflection_for(
    schema: &Schema,
    reflection: &Arc<Reflection>,
    record: &Record,
) -> OrmResult<Option<Arc<Reflection>>> {
    let inverse = if reflection.is_polymorphic() {
        reflection.polymorphic_inverse_of(schema, record.model())?
    } else {
        reflection.inverse_of(schema)?
    };
    Ok(inverse.filter(|inverse| {
        !inverse.is_collection()
            && (!reflection.is_belongs_to() || inverse.macro_kind() == MacroKind::HasOne)
    }))
}

/// An association of one owner record
pub struct AssociationHandle<'s> {
    session: &'s Session,
    owner: Record,
    reflection: Arc<Reflection>,
}

impl<'s> AssociationHandle<'s> {
    pub(crate) fn new(session: &'s Session, owner: Record, reflection: Arc<Reflection>) -> Self {
        Self {
            session,
            owner,
            reflection,
        }
    }

    pub fn owner(&self) -> &Record {
        &self.owner
    }

    pub fn reflection(&self) -> &Arc<Reflection> {
        &self.reflection
    }

    pub fn is_loaded(&self) -> bool {
        self.owner.is_association_loaded(self.reflection.name())
    }

    /// The cached target; empty when not loaded
    pub fn target(&self) -> AssociationTarget {
        self.owner
            .cached_association(self.reflection.name())
            .unwrap_or_else(|| self.empty_target())
    }

    /// Forget the cached target
    pub fn reset(&self) {
        self.owner.reset_association(self.reflection.name());
    }

    /// Load the target unless it is already loaded (or `force` is set)
    pub async fn load(&self, force: bool) -> OrmResult<AssociationTarget> {
        if !force {
            if let Some(target) = self.owner.cached_association(self.reflection.name()) {
                return Ok(target);
            }
        }

        let schema = self.session.schema();
        self.reflection.check_validity(schema)?;
        let records = self.find_target().await?;

        if self.reflection.is_collection() {
            self.owner.set_collection(&self.reflection, records.clone());
            for record in &records {
                set_inverse_instance(schema, &self.owner, &self.reflection, record)?;
            }
        } else {
            let target = records.into_iter().next();
            set_target_and_wire_inverse(schema, &self.owner, &self.reflection, target)?;
        }

        Ok(self.target())
    }

    pub async fn reload(&self) -> OrmResult<AssociationTarget> {
        self.reset();
        self.load(true).await
    }

    /// Replace the target
    ///
    /// The new value is type-checked before anything changes. Key changes are written
    /// through the executor only when the owner is persisted.
    pub async fn replace(&self, value: impl Into<AssociationTarget>) -> OrmResult<()> {
        let schema = self.session.schema();
        self.reflection.check_validity(schema)?;

        let value = value.into();
        for record in value.clone().into_many() {
            self.check_record_type(&record)?;
        }

        match self.reflection.macro_kind() {
            MacroKind::BelongsTo => self.replace_belongs_to(value.into_one()).await,
            MacroKind::HasOne if self.reflection.is_through() => Err(OrmError::Unsupported(format!(
                "assigning has_one :through association '{}'",
                self.reflection.name()
            ))),
            MacroKind::HasOne => self.replace_has_one(value.into_one()).await,
            MacroKind::HasMany if self.reflection.is_through() => self.replace_through(value.into_many()).await,
            MacroKind::HasMany => self.replace_has_many(value.into_many()).await,
            MacroKind::HasAndBelongsToMany => self.replace_habtm(value.into_many()).await,
        }
    }

    fn empty_target(&self) -> AssociationTarget {
        if self.reflection.is_collection() {
            AssociationTarget::Many(Vec::new())
        } else {
            AssociationTarget::One(None)
        }
    }

    /// Target model for this owner; `None` when a polymorphic type is unset
    fn klass(&self) -> OrmResult<Option<Arc<ModelType>>> {
        let schema = self.session.schema();
        if !self.reflection.is_polymorphic() {
            return self.reflection.klass(schema).map(Some);
        }
        match self.owner.get(&self.reflection.foreign_type(schema)?) {
            JsonValue::String(name) if !name.is_empty() => schema.model(&name).map(Some),
            _ => Ok(None),
        }
    }

    async fn find_target(&self) -> OrmResult<Vec<Record>> {
        let schema = self.session.schema();
        let klass = match self.klass()? {
            Some(klass) => klass,
            None => return Ok(Vec::new()),
        };

        let owner_key = scope::owner_key_column(schema, &self.reflection)?;
        if self.owner.get(&owner_key).is_null()
            || (!self.reflection.is_belongs_to() && !self.owner.is_persisted())
        {
            return Ok(Vec::new());
        }

        let mut plan = AssociationScope::new(
            schema,
            &self.reflection,
            &self.owner,
            Arc::clone(&klass),
            self.session.table_alias_length(),
        )
        .build()?;
        if !self.reflection.is_collection() {
            plan = plan.limit(1);
        }

        tracing::debug!(
            "Loading {}#{} from {}",
            self.owner.model_name(),
            self.reflection.name(),
            plan.from.name
        );
        let rows = self.session.executor().execute_plan(&plan).await?;
        rows.into_iter()
            .map(|row| schema.instantiate(&klass, row))
            .collect()
    }

    fn check_record_type(&self, record: &Record) -> OrmResult<()> {
        if self.reflection.is_polymorphic() {
            return Ok(());
        }
        let schema = self.session.schema();
        let klass = self.reflection.klass(schema)?;
        if schema.is_a(record.model(), klass.name()) {
            Ok(())
        } else {
            Err(OrmError::AssociationTypeMismatch {
                expected: klass.name().to_string(),
                actual: record.model_name().to_string(),
            })
        }
    }

    async fn replace_belongs_to(&self, target: Option<Record>) -> OrmResult<()> {
        let schema = self.session.schema();
        let foreign_key = self.reflection.foreign_key(schema)?;
        let mut changes = Row::new();

        let key = match &target {
            Some(target) => {
                let primary_key = self
                    .reflection
                    .association_primary_key(schema, Some(target.model().as_ref()))?;
                target.get(&primary_key)
            }
            None => JsonValue::Null,
        };
        changes.insert(foreign_key, key);

        if self.reflection.is_polymorphic() {
            let type_name = target
                .as_ref()
                .map(|target| JsonValue::String(target.model().base_class().to_string()))
                .unwrap_or(JsonValue::Null);
            changes.insert(self.reflection.foreign_type(schema)?, type_name);
        }

        for (column, value) in &changes {
            self.owner.set(column.clone(), value.clone());
        }
        set_target_and_wire_inverse(schema, &self.owner, &self.reflection, target)?;

        if self.owner.is_persisted() {
            self.update_record(&self.owner, changes).await?;
        }
        Ok(())
    }

    async fn replace_has_one(&self, target: Option<Record>) -> OrmResult<()> {
        let schema = self.session.schema();
        let current = self.load(false).await?.into_one();

        if let Some(old) = current {
            if target.as_ref() != Some(&old) {
                let changes = self.owner_key_changes(None)?;
                self.apply_changes(&old, &changes);
                if let Some(inverse) = inverse_reflection_for(schema, &self.reflection, &old)? {
                    old.reset_association(inverse.name());
                }
                if self.owner.is_persisted() && old.is_persisted() {
                    self.update_record(&old, changes).await?;
                }
            }
        }

        if let Some(new) = &target {
            let changes = self.owner_key_changes(Some(&self.owner))?;
            self.apply_changes(new, &changes);
            if self.owner.is_persisted() {
                self.save_record(new, changes).await?;
            }
        }

        set_target_and_wire_inverse(schema, &self.owner, &self.reflection, target)
    }

    async fn replace_has_many(&self, records: Vec<Record>) -> OrmResult<()> {
        let schema = self.session.schema();
        let current = self.load(false).await?.into_many();
        let (removed, added) = diff(&current, &records);
        let callbacks = &self.reflection.options().callbacks;

        for record in &removed {
            fire(callbacks, CallbackKind::BeforeRemove, &self.owner, record)?;
            let changes = self.owner_key_changes(None)?;
            self.apply_changes(record, &changes);
            if let Some(inverse) = inverse_reflection_for(schema, &self.reflection, record)? {
                record.reset_association(inverse.name());
            }
            if self.owner.is_persisted() && record.is_persisted() {
                self.update_record(record, changes).await?;
            }
            fire(callbacks, CallbackKind::AfterRemove, &self.owner, record)?;
        }

        for record in &added {
            fire(callbacks, CallbackKind::BeforeAdd, &self.owner, record)?;
            let changes = self.owner_key_changes(Some(&self.owner))?;
            self.apply_changes(record, &changes);
            if self.owner.is_persisted() {
                self.save_record(record, changes).await?;
            }
            fire(callbacks, CallbackKind::AfterAdd, &self.owner, record)?;
        }

        self.owner.set_collection(&self.reflection, records.clone());
        for record in &records {
            set_inverse_instance(schema, &self.owner, &self.reflection, record)?;
        }
        Ok(())
    }

    async fn replace_habtm(&self, records: Vec<Record>) -> OrmResult<()> {
        let schema = self.session.schema();
        let current = self.load(false).await?.into_many();
        let (removed, added) = diff(&current, &records);
        let callbacks = &self.reflection.options().callbacks;

        let join_table = TableRef::new(self.reflection.join_table(schema)?);
        let foreign_key = self.reflection.foreign_key(schema)?;
        let association_foreign_key = self.reflection.association_foreign_key(schema)?;
        let association_primary_key = self.reflection.association_primary_key(schema, None)?;
        let owner_key = self
            .owner
            .get(&self.reflection.active_record_primary_key(schema)?);

        for record in &removed {
            fire(callbacks, CallbackKind::BeforeRemove, &self.owner, record)?;
            if self.owner.is_persisted() && record.is_persisted() {
                let op = WriteOp::Delete {
                    table: join_table.name.clone(),
                    filters: vec![
                        Predicate::eq(join_table.column(&foreign_key), owner_key.clone()),
                        Predicate::eq(
                            join_table.column(&association_foreign_key),
                            record.get(&association_primary_key),
                        ),
                    ],
                };
                self.session.executor().execute_write(&op).await?;
            }
            fire(callbacks, CallbackKind::AfterRemove, &self.owner, record)?;
        }

        for record in &added {
            fire(callbacks, CallbackKind::BeforeAdd, &self.owner, record)?;
            if self.owner.is_persisted() {
                if owner_key.is_null() {
                    return Err(OrmError::MissingPrimaryKey);
                }
                if !record.is_persisted() {
                    self.save_record(record, Row::new()).await?;
                }
                let mut values = Row::new();
                values.insert(foreign_key.clone(), owner_key.clone());
                values.insert(association_foreign_key.clone(), record.get(&association_primary_key));
                let op = WriteOp::Insert {
                    table: join_table.name.clone(),
                    values,
                };
                self.session.executor().execute_write(&op).await?;
            }
            fire(callbacks, CallbackKind::AfterAdd, &self.owner, record)?;
        }

        self.owner.set_collection(&self.reflection, records);
        Ok(())
    }

    async fn replace_through(&self, records: Vec<Record>) -> OrmResult<()> {
        let schema = self.session.schema();
        let through = self.reflection.through_reflection(schema)?;
        let source = self.reflection.source_reflection(schema)?;

        if through.is_through() || through.macro_kind() != MacroKind::HasMany {
            return Err(OrmError::Unsupported(format!(
                "assigning '{}' through '{}'",
                self.reflection.name(),
                through.name()
            )));
        }
        if !source.is_belongs_to() {
            return Err(OrmError::HasManyThroughCantAssociateThroughHasOneOrManyReflection {
                model: self.reflection.active_record().to_string(),
                name: self.reflection.name().to_string(),
                source: source.name().to_string(),
            });
        }

        let current = self.load(false).await?.into_many();
        let (removed, added) = diff(&current, &records);
        let callbacks = &self.reflection.options().callbacks;

        let through_table = TableRef::new(through.table_name(schema)?);
        let through_key = through.foreign_key(schema)?;
        let owner_key = self.owner.get(&through.active_record_primary_key(schema)?);
        let source_key = source.foreign_key(schema)?;

        let link_values = |record: &Record| -> OrmResult<Row> {
            let mut values = Row::new();
            values.insert(through_key.clone(), owner_key.clone());
            if let Some(type_column) = through.type_column(schema)? {
                values.insert(type_column, JsonValue::String(self.owner.model().base_class().to_string()));
            }
            let primary_key = source.association_primary_key(schema, Some(record.model().as_ref()))?;
            values.insert(source_key.clone(), record.get(&primary_key));
            if source.is_polymorphic() {
                values.insert(
                    source.foreign_type(schema)?,
                    JsonValue::String(record.model().base_class().to_string()),
                );
            }
            Ok(values)
        };

        for record in &removed {
            fire(callbacks, CallbackKind::BeforeRemove, &self.owner, record)?;
            if self.owner.is_persisted() && record.is_persisted() {
                let filters = link_values(record)?
                    .into_iter()
                    .map(|(column, value)| Predicate::eq(through_table.column(column), value))
                    .collect();
                let op = WriteOp::Delete {
                    table: through_table.name.clone(),
                    filters,
                };
                self.session.executor().execute_write(&op).await?;
            }
            fire(callbacks, CallbackKind::AfterRemove, &self.owner, record)?;
        }

        for record in &added {
            fire(callbacks, CallbackKind::BeforeAdd, &self.owner, record)?;
            if self.owner.is_persisted() {
                if owner_key.is_null() {
                    return Err(OrmError::MissingPrimaryKey);
                }
                if !record.is_persisted() {
                    self.save_record(record, Row::new()).await?;
                }
                let op = WriteOp::Insert {
                    table: through_table.name.clone(),
                    values: link_values(record)?,
                };
                self.session.executor().execute_write(&op).await?;
            }
            fire(callbacks, CallbackKind::AfterAdd, &self.owner, record)?;
        }

        self.owner.set_collection(&self.reflection, records);
        self.owner.reset_association(through.name());
        Ok(())
    }

    /// Foreign key (and type) values pointing at `owner`, or nulls when detaching
    fn owner_key_changes(&self, owner: Option<&Record>) -> OrmResult<Row> {
        let schema = self.session.schema();
        let mut changes = Row::new();
        let key = match owner {
            Some(owner) => owner.get(&self.reflection.active_record_primary_key(schema)?),
            None => JsonValue::Null,
        };
        changes.insert(self.reflection.foreign_key(schema)?, key);
        if let Some(type_column) = self.reflection.type_column(schema)? {
            let type_name = owner
                .map(|owner| JsonValue::String(owner.model().base_class().to_string()))
                .unwrap_or(JsonValue::Null);
            changes.insert(type_column, type_name);
        }
        Ok(changes)
    }

    fn apply_changes(&self, record: &Record, changes: &Row) {
        for (column, value) in changes {
            record.set(column.clone(), value.clone());
        }
    }

    async fn update_record(&self, record: &Record, changes: Row) -> OrmResult<()> {
        let id = record.id().ok_or(OrmError::MissingPrimaryKey)?;
        let table = TableRef::new(record.model().table_name());
        let op = WriteOp::Update {
            filters: vec![Predicate::eq(table.column(record.model().primary_key()), id)],
            table: table.name,
            changes,
        };
        self.session.executor().execute_write(&op).await?;
        Ok(())
    }

    /// Update `changes` on a persisted record, insert a new one
    async fn save_record(&self, record: &Record, changes: Row) -> OrmResult<()> {
        if record.is_persisted() {
            return self.update_record(record, changes).await;
        }
        if record.id().is_none() {
            return Err(OrmError::MissingPrimaryKey);
        }
        let op = WriteOp::Insert {
            table: record.model().table_name().to_string(),
            values: record.attributes(),
        };
        self.session.executor().execute_write(&op).await?;
        record.mark_persisted();
        Ok(())
    }
}

/// Records only in `current`, and records only in `desired`
fn diff(current: &[Record], desired: &[Record]) -> (Vec<Record>, Vec<Record>) {
    let removed = current
        .iter()
        .filter(|record| !desired.contains(record))
        .cloned()
        .collect();
    let added = desired
        .iter()
        .filter(|record| !current.contains(record))
        .cloned()
        .collect();
    (removed, added)
}
