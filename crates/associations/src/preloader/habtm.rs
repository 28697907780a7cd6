//! Has-and-belongs-to-many preloading
//!
//! Target rows do not carry the owner key, so the join table is joined in and its owner
//! column is selected under a synthetic label.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::OrmResult;
use crate::query::{BatchFind, JoinClause, JoinKind, Predicate, Projection, TableRef};
use crate::record::{key_of, Record};
use crate::reflection::{Reflection, Scope};
use crate::schema::ModelType;

use super::{group_by_owner, owner_keys, owners_by_key, Preloader};

const ASSOCIATION_KEY_NAME: &str = "ar_association_key_name";
const JOIN_TABLE_ALIAS: &str = "t0";

impl Preloader<'_> {
    pub(super) async fn habtm_records_by_owner(
        &self,
        reflection: &Arc<Reflection>,
        klass: &Arc<ModelType>,
        owners: &[Record],
        preload_scope: &[Scope],
    ) -> OrmResult<Vec<Vec<Record>>> {
        let schema = self.schema;
        let owner_key_name = reflection.active_record_primary_key(schema)?;
        let owners_map = owners_by_key(owners, &owner_key_name);
        let keys = owner_keys(owners, &owner_key_name);

        let table = TableRef::new(klass.table_name());
        let join_table = TableRef::aliased(reflection.join_table(schema)?, JOIN_TABLE_ALIAS);
        let association_key = join_table.column(reflection.foreign_key(schema)?);

        let plan = self
            .build_scope(reflection, klass, &table, preload_scope)?
            .join(JoinClause {
                kind: JoinKind::Inner,
                table: join_table.clone(),
                on: vec![Predicate::columns_eq(
                    table.column(reflection.association_primary_key(schema, Some(klass))?),
                    join_table.column(reflection.association_foreign_key(schema)?),
                )],
            })
            .project(Projection::Column {
                column: association_key.clone(),
                label: ASSOCIATION_KEY_NAME.to_string(),
            });
        let rows = self.fetch(BatchFind::new(plan, association_key, keys)).await?;

        // One instance per target, however many owners share it
        let mut instances: HashMap<String, Record> = HashMap::new();
        let mut records = Vec::with_capacity(rows.len());
        for mut row in rows {
            let owner_key = row.remove(ASSOCIATION_KEY_NAME).unwrap_or(JsonValue::Null);
            let record = match row.get(klass.primary_key()).and_then(key_of) {
                Some(id) => match instances.get(&id) {
                    Some(record) => record.clone(),
                    None => {
                        let record = schema.instantiate(klass, row)?;
                        instances.insert(id, record.clone());
                        record
                    }
                },
                None => schema.instantiate(klass, row)?,
            };
            records.push((owner_key, record));
        }

        Ok(group_by_owner(owners, &owners_map, records))
    }
}
