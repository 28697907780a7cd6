//! Direct belongs-to, has-one and has-many preloading

use std::collections::HashSet;
use std::sync::Arc;

use crate::association::scope::type_condition;
use crate::error::OrmResult;
use crate::query::{BatchFind, Predicate, SelectPlan, TableRef};
use crate::record::{key_of, Record};
use crate::reflection::{MacroKind, Reflection, Scope, ScopeFragment};
use crate::schema::ModelType;

use super::{group_by_owner, owner_keys, owners_by_key, Preloader};

impl Preloader<'_> {
    /// Fetch the targets of `owners` and group them per owner
    pub(super) async fn associated_records_by_owner(
        &self,
        reflection: &Arc<Reflection>,
        klass: &Arc<ModelType>,
        owners: &[Record],
        preload_scope: &[Scope],
    ) -> OrmResult<Vec<Vec<Record>>> {
        let schema = self.schema;
        let (owner_key_name, association_key_name) = if reflection.macro_kind() == MacroKind::BelongsTo {
            (
                reflection.foreign_key(schema)?,
                reflection.association_primary_key(schema, Some(klass))?,
            )
        } else {
            (
                reflection.active_record_primary_key(schema)?,
                reflection.foreign_key(schema)?,
            )
        };

        let owners_map = owners_by_key(owners, &owner_key_name);
        let keys = owner_keys(owners, &owner_key_name);
        let table = TableRef::new(klass.table_name());
        let plan = self.build_scope(reflection, klass, &table, preload_scope)?;
        let rows = self
            .fetch(BatchFind::new(plan, table.column(&association_key_name), keys))
            .await?;

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            // Duplicate target rows would hand out two instances of one record
            if reflection.is_belongs_to() {
                let id = row.get(klass.primary_key()).and_then(key_of);
                if let Some(id) = id {
                    if !seen.insert(id) {
                        continue;
                    }
                }
            }
            let record = schema.instantiate(klass, row)?;
            records.push((record.get(&association_key_name), record));
        }

        Ok(group_by_owner(owners, &owners_map, records))
    }

    /// Target query without the key filter: scopes, the `as` type and the STI type
    pub(super) fn build_scope(
        &self,
        reflection: &Arc<Reflection>,
        klass: &ModelType,
        table: &TableRef,
        preload_scope: &[Scope],
    ) -> OrmResult<SelectPlan> {
        let schema = self.schema;
        let mut fragment = ScopeFragment::new();
        for scope in reflection.own_scopes().iter().chain(preload_scope) {
            fragment.merge(scope.evaluate(None, reflection.name())?);
        }

        let mut plan = SelectPlan::all_from(table.clone()).filters(
            fragment
                .conditions
                .iter()
                .map(|condition| condition.qualify(table.reference())),
        );
        for (column, direction) in fragment.order {
            plan = plan.order_by(table.column(column), direction);
        }
        if let Some(type_column) = reflection.type_column(schema)? {
            let owner = reflection.owner_model(schema)?;
            plan = plan.filter(Predicate::eq(
                table.column(type_column),
                owner.base_class(),
            ));
        }
        if let Some(condition) = type_condition(schema, klass, table) {
            plan = plan.filter(condition);
        }
        Ok(plan)
    }
}
