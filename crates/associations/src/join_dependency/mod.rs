//! Join-based eager loading
//!
//! A [`JoinDependency`] turns a root model and an [`Includes`] tree into one
//! LEFT OUTER JOIN query, and rebuilds the object graph from its flat result rows.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::association::scope::type_condition;
use crate::association::{set_inverse_instance, set_target_and_wire_inverse};
use crate::error::{OrmError, OrmResult};
use crate::includes::Includes;
use crate::query::{JoinClause, JoinKind, Predicate, Projection, Row, SelectPlan, TableRef};
use crate::record::{key_of, Record};
use crate::reflection::{MacroKind, Reflection};
use crate::schema::{ModelType, Schema};

pub mod alias_tracker;
pub mod join_part;

pub use alias_tracker::AliasTracker;
pub use join_part::JoinPart;

/// The join tree for one eager-loading query
#[derive(Debug)]
pub struct JoinDependency {
    schema: Schema,
    includes: Includes,
    /// Base part first; a parent always precedes its children
    parts: Vec<JoinPart>,
    raw_joins: Vec<String>,
    table_alias_length: usize,
}

impl JoinDependency {
    /// Build the join tree for `includes` on `base`
    ///
    /// `joins` are hand-written join fragments already present in the query; table
    /// names they mention count as used when aliases are assigned.
    pub fn new(
        schema: &Schema,
        base: Arc<ModelType>,
        includes: &Includes,
        joins: Vec<String>,
        table_alias_length: usize,
    ) -> OrmResult<Self> {
        let mut tracker = AliasTracker::new(table_alias_length, joins.clone());
        tracker.aliased_name_for(base.table_name(), base.table_name());

        let mut dependency = Self {
            schema: schema.clone(),
            includes: includes.clone(),
            parts: vec![JoinPart::base(base)],
            raw_joins: joins,
            table_alias_length,
        };
        dependency.build(includes, 0, &mut tracker)?;
        Ok(dependency)
    }

    pub fn join_base(&self) -> &JoinPart {
        &self.parts[0]
    }

    pub fn join_parts(&self) -> &[JoinPart] {
        &self.parts
    }

    /// The association parts, in join order
    pub fn join_associations(&self) -> &[JoinPart] {
        &self.parts[1..]
    }

    pub fn includes(&self) -> &Includes {
        &self.includes
    }

    pub fn table_alias_length(&self) -> usize {
        self.table_alias_length
    }

    fn build(&mut self, includes: &Includes, parent: usize, tracker: &mut AliasTracker) -> OrmResult<()> {
        match includes {
            Includes::Name(name) => {
                self.build_association(name, parent, tracker)?;
            }
            Includes::List(items) => {
                for item in items {
                    self.build(item, parent, tracker)?;
                }
            }
            Includes::Nested(map) => {
                let mut names: Vec<&String> = map.keys().collect();
                names.sort();
                for name in names {
                    let part = self.build_association(name, parent, tracker)?;
                    self.build(&map[name.as_str()], part, tracker)?;
                }
            }
        }
        Ok(())
    }

    /// Index of the part for `name` under `parent`, creating it when missing
    fn build_association(&mut self, name: &str, parent: usize, tracker: &mut AliasTracker) -> OrmResult<usize> {
        let parent_model = Arc::clone(&self.parts[parent].model);
        let reflection = self
            .schema
            .find_reflection(&parent_model, name)?
            .ok_or_else(|| OrmError::association_not_found(parent_model.name(), name))?;

        let existing = self.parts.iter().find(|part| {
            part.parent == Some(parent)
                && part
                    .reflection
                    .as_ref()
                    .map(|r| Arc::ptr_eq(r, &reflection))
                    .unwrap_or(false)
        });
        if let Some(part) = existing {
            return Ok(part.index);
        }

        reflection.check_validity(&self.schema)?;
        if reflection.is_polymorphic() {
            return Err(OrmError::EagerLoadPolymorphic(format!(
                "{}#{}",
                parent_model.name(),
                reflection.name()
            )));
        }
        let instance_dependent = reflection
            .conditions(&self.schema)?
            .iter()
            .flatten()
            .any(|scope| scope.is_instance_dependent());
        if instance_dependent {
            return Err(OrmError::InstanceDependentScope(reflection.name().to_string()));
        }

        let klass = reflection.klass(&self.schema)?;
        let mut tables = self.construct_tables(&reflection, parent_model.table_name(), tracker)?;
        tables.reverse();

        let index = self.parts.len();
        tracing::trace!(
            "Join part t{} for {}#{} as {}",
            index,
            parent_model.name(),
            reflection.name(),
            tables.last().map(TableRef::reference).unwrap_or_default()
        );
        self.parts
            .push(JoinPart::association(index, parent, reflection, klass, tables));
        Ok(index)
    }

    fn construct_tables(
        &self,
        reflection: &Arc<Reflection>,
        parent_table_name: &str,
        tracker: &mut AliasTracker,
    ) -> OrmResult<Vec<TableRef>> {
        let schema = &self.schema;
        let table_alias_for = |chain_reflection: &Reflection, join: bool| {
            let mut name = format!("{}_{}", chain_reflection.plural_name(), parent_table_name);
            if join {
                name.push_str("_join");
            }
            name
        };

        let mut tables = Vec::new();
        for chain_reflection in reflection.chain(schema)? {
            let is_self = Arc::ptr_eq(&chain_reflection, reflection);
            tables.push(tracker.aliased_table_for(
                &chain_reflection.table_name(schema)?,
                &table_alias_for(&chain_reflection, !is_self),
            ));
            if chain_reflection.source_macro(schema)? == MacroKind::HasAndBelongsToMany {
                tables.push(tracker.aliased_table_for(
                    &chain_reflection.join_table(schema)?,
                    &table_alias_for(&chain_reflection, true),
                ));
            }
        }
        Ok(tables)
    }

    /// The select list: every column of every part, labelled `t<part>_r<column>`
    pub fn columns(&self) -> Vec<Projection> {
        self.parts.iter().flat_map(JoinPart::projections).collect()
    }

    /// Join clauses for every association part, in order
    pub fn join_clauses(&self) -> OrmResult<Vec<JoinClause>> {
        let mut joins = Vec::new();
        for part in self.join_associations() {
            joins.extend(self.join_to(part)?);
        }
        Ok(joins)
    }

    /// The complete eager-loading query, without filters
    pub fn to_plan(&self) -> OrmResult<SelectPlan> {
        let mut plan = SelectPlan::new(self.join_base().aliased_table().clone());
        plan.projections = self.columns();
        plan.joins = self.join_clauses()?;
        plan.raw_joins = self.raw_joins.clone();
        Ok(plan)
    }

    fn join_to(&self, part: &JoinPart) -> OrmResult<Vec<JoinClause>> {
        let schema = &self.schema;
        let reflection = part_reflection(part)?;
        let parent = &self.parts[part.parent.unwrap_or(0)];
        let chain = reflection.chain(schema)?;
        let conditions = reflection.conditions(schema)?;

        let mut tables: VecDeque<TableRef> = part.tables.iter().cloned().collect();
        let mut foreign_table = parent.aliased_table().clone();
        let mut foreign_klass = Arc::clone(&parent.model);
        let mut joins = Vec::new();

        for (i, chain_reflection) in chain.iter().rev().enumerate() {
            let mut table = next_table(&mut tables)?;
            let klass = chain_reflection.klass(schema)?;

            let (key, foreign_key) = match chain_reflection.source_macro(schema)? {
                MacroKind::BelongsTo => (
                    chain_reflection.association_primary_key(schema, Some(&klass))?,
                    chain_reflection.foreign_key(schema)?,
                ),
                MacroKind::HasAndBelongsToMany => {
                    joins.push(JoinClause {
                        kind: JoinKind::LeftOuter,
                        table: table.clone(),
                        on: vec![Predicate::columns_eq(
                            table.column(chain_reflection.foreign_key(schema)?),
                            foreign_table.column(chain_reflection.active_record_primary_key(schema)?),
                        )],
                    });
                    foreign_table = table;
                    table = next_table(&mut tables)?;
                    (
                        chain_reflection.association_primary_key(schema, Some(&klass))?,
                        chain_reflection.association_foreign_key(schema)?,
                    )
                }
                MacroKind::HasOne | MacroKind::HasMany => (
                    chain_reflection.foreign_key(schema)?,
                    chain_reflection.active_record_primary_key(schema)?,
                ),
            };

            let mut on = vec![Predicate::columns_eq(
                table.column(&key),
                foreign_table.column(&foreign_key),
            )];
            on.extend(type_condition(schema, &klass, &table));
            for scope in &conditions[chain.len() - i - 1] {
                let fragment = scope.evaluate(None, reflection.name())?;
                on.extend(
                    fragment
                        .conditions
                        .iter()
                        .map(|condition| condition.qualify(table.reference())),
                );
            }
            if let Some(type_column) = chain_reflection.type_column(schema)? {
                on.push(Predicate::eq(table.column(type_column), foreign_klass.base_class()));
            }

            joins.push(JoinClause {
                kind: JoinKind::LeftOuter,
                table: table.clone(),
                on,
            });
            foreign_table = table;
            foreign_klass = klass;
        }
        Ok(joins)
    }

    /// Rebuild root records, with their included associations loaded, from joined rows
    ///
    /// Root records come back in first-seen order, one instance per primary key. Each
    /// part keeps an identity map for this call only.
    pub fn instantiate(&self, rows: &[Row]) -> OrmResult<Vec<Record>> {
        let base = self.join_base();
        let mut caches: Vec<HashMap<String, Record>> = vec![HashMap::new(); self.parts.len()];
        let mut records = Vec::new();

        for row in rows {
            let key = match key_of(&base.record_id(row)) {
                Some(key) => key,
                None => continue,
            };
            let parent = match caches[0].get(&key) {
                Some(parent) => parent.clone(),
                None => {
                    let parent = self.schema.instantiate(&base.model, base.extract_record(row))?;
                    caches[0].insert(key, parent.clone());
                    records.push(parent.clone());
                    parent
                }
            };
            self.construct(parent, row, &mut caches)?;
        }

        tracing::trace!(
            "Reconstructed {} {} record(s) from {} row(s)",
            records.len(),
            base.model.name(),
            rows.len()
        );
        self.remove_duplicate_results(&records, &self.includes)?;
        Ok(records)
    }

    /// Attach every part's record in `row` to its parent's record
    fn construct(&self, root: Record, row: &Row, caches: &mut [HashMap<String, Record>]) -> OrmResult<()> {
        let mut constructed: Vec<Option<Record>> = vec![None; self.parts.len()];
        constructed[0] = Some(root);

        for part in self.join_associations() {
            let parent = match part.parent.and_then(|parent| constructed[parent].clone()) {
                Some(parent) => parent,
                None => continue,
            };
            constructed[part.index] = self.construct_association(&parent, part, row, &mut caches[part.index])?;
        }
        Ok(())
    }

    fn construct_association(
        &self,
        record: &Record,
        part: &JoinPart,
        row: &Row,
        cache: &mut HashMap<String, Record>,
    ) -> OrmResult<Option<Record>> {
        let parent = &self.parts[part.parent.unwrap_or(0)];
        // Fan-out rows of another parent record
        if record.key(record.model().primary_key()) != key_of(&parent.record_id(row)) {
            return Ok(None);
        }

        let reflection = part_reflection(part)?;
        match reflection.macro_kind() {
            MacroKind::HasOne => {
                if record.is_association_loaded(reflection.name()) {
                    return Ok(record.cached_one(reflection.name()));
                }
                let associated = self.instantiate_part(part, row, cache)?;
                set_target_and_wire_inverse(&self.schema, record, reflection, associated.clone())?;
                Ok(associated)
            }
            MacroKind::HasMany | MacroKind::HasAndBelongsToMany => {
                let associated = self.instantiate_part(part, row, cache)?;
                record.mark_loaded(reflection);
                if let Some(associated) = &associated {
                    record.push_target(reflection, associated.clone());
                    set_inverse_instance(&self.schema, record, reflection, associated)?;
                }
                Ok(associated)
            }
            // A null joined key still settles the association: the parent has no target,
            // and reading it later must not issue a query
            MacroKind::BelongsTo => {
                let associated = self.instantiate_part(part, row, cache)?;
                set_target_and_wire_inverse(&self.schema, record, reflection, associated.clone())?;
                Ok(associated)
            }
        }
    }

    /// The part's record in `row`, or `None` when the outer join found no match
    fn instantiate_part(
        &self,
        part: &JoinPart,
        row: &Row,
        cache: &mut HashMap<String, Record>,
    ) -> OrmResult<Option<Record>> {
        let key = match key_of(&part.record_id(row)) {
            Some(key) => key,
            None => return Ok(None),
        };
        if let Some(record) = cache.get(&key) {
            return Ok(Some(record.clone()));
        }
        let record = self.schema.instantiate(&part.model, part.extract_record(row))?;
        cache.insert(key, record.clone());
        Ok(Some(record))
    }

    /// Drop collection members repeated by join fan-out, level by level
    fn remove_duplicate_results(&self, records: &[Record], includes: &Includes) -> OrmResult<()> {
        match includes {
            Includes::Name(name) => {
                for record in records {
                    self.remove_uniq_by_reflection(record, name)?;
                }
            }
            Includes::List(items) => {
                for item in items {
                    self.remove_duplicate_results(records, item)?;
                }
            }
            Includes::Nested(map) => {
                for (name, children) in map {
                    let mut parents = Vec::new();
                    for record in records {
                        if self.remove_uniq_by_reflection(record, name)? {
                            parents.extend(record.cached_many(name));
                        } else if let Some(associated) = record.cached_one(name) {
                            parents.push(associated);
                        }
                    }
                    if !parents.is_empty() {
                        self.remove_duplicate_results(&parents, children)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns whether `name` is a collection on the record's model
    fn remove_uniq_by_reflection(&self, record: &Record, name: &str) -> OrmResult<bool> {
        let reflection = self.schema.reflect_on_association(record.model(), name)?;
        if reflection.is_collection() {
            record.dedupe_collection(name);
        }
        Ok(reflection.is_collection())
    }
}

fn part_reflection(part: &JoinPart) -> OrmResult<&Arc<Reflection>> {
    part.reflection()
        .ok_or_else(|| OrmError::Query("the join base has no association".into()))
}

fn next_table(tables: &mut VecDeque<TableRef>) -> OrmResult<TableRef> {
    tables
        .pop_front()
        .ok_or_else(|| OrmError::Query("join part is missing a table".into()))
}
