//! Query for loading one owner's association
//!
//! Walks the reflection chain from the target back to the owner: through models and
//! habtm join tables are joined in, and the last chain element is filtered by the
//! owner's key.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{OrmError, OrmResult};
use crate::join_dependency::AliasTracker;
use crate::query::{JoinClause, JoinKind, Predicate, SelectPlan, TableRef};
use crate::record::Record;
use crate::reflection::{MacroKind, Reflection};
use crate::schema::{ModelType, Schema};

pub struct AssociationScope<'a> {
    schema: &'a Schema,
    reflection: &'a Arc<Reflection>,
    owner: &'a Record,
    klass: Arc<ModelType>,
    table_alias_length: usize,
}

impl<'a> AssociationScope<'a> {
    /// `klass` is the target model; for polymorphic belongs-to it comes from the owner
    pub fn new(
        schema: &'a Schema,
        reflection: &'a Arc<Reflection>,
        owner: &'a Record,
        klass: Arc<ModelType>,
        table_alias_length: usize,
    ) -> Self {
        Self {
            schema,
            reflection,
            owner,
            klass,
            table_alias_length,
        }
    }

    pub fn build(&self) -> OrmResult<SelectPlan> {
        let schema = self.schema;
        let chain = self.reflection.chain(schema)?;
        let conditions = self.reflection.conditions(schema)?;
        let mut tables: VecDeque<TableRef> = self.construct_tables(&chain)?.into();

        let target = tables
            .front()
            .cloned()
            .ok_or_else(|| OrmError::Query("association chain is empty".into()))?;
        let mut plan = SelectPlan::all_from(target.clone());
        if let Some(condition) = type_condition(schema, &self.klass, &target) {
            plan = plan.filter(condition);
        }

        for (i, reflection) in chain.iter().enumerate() {
            let scope_table = tables
                .pop_front()
                .ok_or_else(|| OrmError::Query("association chain is missing a table".into()))?;
            let mut table = scope_table.clone();
            let mut foreign_table = tables.front().cloned();
            let source_macro = reflection.source_macro(schema)?;

            if source_macro == MacroKind::HasAndBelongsToMany {
                let join_table = tables
                    .pop_front()
                    .ok_or_else(|| OrmError::Query("habtm join table is missing".into()))?;
                plan = plan.join(JoinClause {
                    kind: JoinKind::Inner,
                    table: join_table.clone(),
                    on: vec![Predicate::columns_eq(
                        table.column(reflection.association_primary_key(schema, None)?),
                        join_table.column(reflection.association_foreign_key(schema)?),
                    )],
                });
                table = join_table;
                foreign_table = tables.front().cloned();
            }

            let (key, foreign_key) = if source_macro == MacroKind::BelongsTo {
                let klass = if i == 0 {
                    Arc::clone(&self.klass)
                } else {
                    reflection.klass(schema)?
                };
                (
                    reflection.association_primary_key(schema, Some(&klass))?,
                    reflection.foreign_key(schema)?,
                )
            } else {
                (
                    reflection.foreign_key(schema)?,
                    reflection.active_record_primary_key(schema)?,
                )
            };

            if i + 1 == chain.len() {
                plan = plan.filter(Predicate::eq(table.column(&key), self.owner.get(&foreign_key)));
                if let Some(type_column) = reflection.type_column(schema)? {
                    plan = plan.filter(Predicate::eq(
                        table.column(type_column),
                        self.owner.model().base_class(),
                    ));
                }
            } else {
                let foreign_table = foreign_table
                    .ok_or_else(|| OrmError::Query("association chain is missing a table".into()))?;
                let next_klass = chain[i + 1].klass(schema)?;
                let mut on = vec![Predicate::columns_eq(
                    table.column(&key),
                    foreign_table.column(&foreign_key),
                )];
                if let Some(type_column) = reflection.type_column(schema)? {
                    on.push(Predicate::eq(table.column(type_column), next_klass.base_class()));
                }
                on.extend(type_condition(schema, &next_klass, &foreign_table));
                plan = plan.join(JoinClause {
                    kind: JoinKind::Inner,
                    table: foreign_table,
                    on,
                });
            }

            for scope in &conditions[i] {
                let fragment = scope.evaluate(Some(self.owner), self.reflection.name())?;
                plan = plan.filters(
                    fragment
                        .conditions
                        .iter()
                        .map(|condition| condition.qualify(scope_table.reference())),
                );
                for (column, direction) in fragment.order {
                    let column = scope_table.column(column);
                    if !plan.order.iter().any(|order| order.column == column) {
                        plan = plan.order_by(column, direction);
                    }
                }
            }
        }

        Ok(plan)
    }

    fn construct_tables(&self, chain: &[Arc<Reflection>]) -> OrmResult<Vec<TableRef>> {
        let schema = self.schema;
        let mut tracker = AliasTracker::new(self.table_alias_length, Vec::new());
        let mut tables = Vec::with_capacity(chain.len());

        for reflection in chain {
            let is_self = Arc::ptr_eq(reflection, self.reflection);
            let table_name = if is_self {
                self.klass.table_name().to_string()
            } else {
                reflection.table_name(schema)?
            };
            tables.push(tracker.aliased_table_for(&table_name, &self.table_alias_for(reflection, !is_self)));

            if reflection.source_macro(schema)? == MacroKind::HasAndBelongsToMany {
                tables.push(tracker.aliased_table_for(
                    &reflection.join_table(schema)?,
                    &self.table_alias_for(reflection, true),
                ));
            }
        }
        Ok(tables)
    }

    fn table_alias_for(&self, reflection: &Reflection, join: bool) -> String {
        let mut name = format!("{}_{}", reflection.plural_name(), self.reflection.name());
        if join {
            name.push_str("_join");
        }
        name
    }
}

/// Owner column whose value the association query filters on
pub(crate) fn owner_key_column(schema: &Schema, reflection: &Arc<Reflection>) -> OrmResult<String> {
    let chain = reflection.chain(schema)?;
    let last = chain
        .last()
        .ok_or_else(|| OrmError::Query("association chain is empty".into()))?;
    if last.source_macro(schema)? == MacroKind::BelongsTo {
        last.foreign_key(schema)
    } else {
        last.active_record_primary_key(schema)
    }
}

/// STI type condition for queries on a subclass
pub(crate) fn type_condition(schema: &Schema, klass: &ModelType, table: &TableRef) -> Option<Predicate> {
    if !klass.needs_type_condition() {
        return None;
    }
    let names = schema
        .sti_names(klass)
        .into_iter()
        .map(JsonValue::String)
        .collect();
    Some(Predicate::in_list(table.column(klass.inheritance_column()), names))
}
