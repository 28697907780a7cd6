//! Nodes of a join dependency tree

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::query::{Projection, Row, TableRef};
use crate::reflection::Reflection;
use crate::schema::ModelType;

/// One table (or chain of tables) taking part in an eager-load join
///
/// The base part is the root model; every other part is reached from its parent
/// through `reflection`.
#[derive(Debug, Clone)]
pub struct JoinPart {
    pub(crate) index: usize,
    pub(crate) parent: Option<usize>,
    pub(crate) reflection: Option<Arc<Reflection>>,
    /// Model instantiated from this part's columns
    pub(crate) model: Arc<ModelType>,
    /// Tables joined for this part, from the parent side to the target; the last one
    /// holds the target rows
    pub(crate) tables: Vec<TableRef>,
    /// `(column, label)` pairs, primary key first
    pub(crate) columns: Vec<(String, String)>,
}

impl JoinPart {
    pub(crate) fn base(model: Arc<ModelType>) -> Self {
        let tables = vec![TableRef::new(model.table_name())];
        Self::new(0, None, None, model, tables)
    }

    pub(crate) fn association(
        index: usize,
        parent: usize,
        reflection: Arc<Reflection>,
        model: Arc<ModelType>,
        tables: Vec<TableRef>,
    ) -> Self {
        Self::new(index, Some(parent), Some(reflection), model, tables)
    }

    fn new(
        index: usize,
        parent: Option<usize>,
        reflection: Option<Arc<Reflection>>,
        model: Arc<ModelType>,
        tables: Vec<TableRef>,
    ) -> Self {
        let prefix = format!("t{}", index);
        let primary_key = model.primary_key().to_string();
        let columns = std::iter::once(primary_key.clone())
            .chain(model.columns().iter().filter(|c| **c != primary_key).cloned())
            .enumerate()
            .map(|(i, column)| (column, format!("{}_r{}", prefix, i)))
            .collect();
        Self {
            index,
            parent,
            reflection,
            model,
            tables,
            columns,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// The association this part represents; `None` for the base part
    pub fn reflection(&self) -> Option<&Arc<Reflection>> {
        self.reflection.as_ref()
    }

    pub fn model(&self) -> &Arc<ModelType> {
        &self.model
    }

    pub fn is_base(&self) -> bool {
        self.parent.is_none()
    }

    /// Unaliased table name of the model
    pub fn table_name(&self) -> &str {
        self.model.table_name()
    }

    pub fn aliased_table(&self) -> &TableRef {
        // Every part has at least its target table
        &self.tables[self.tables.len() - 1]
    }

    pub fn aliased_table_name(&self) -> &str {
        self.aliased_table().reference()
    }

    pub fn aliased_prefix(&self) -> String {
        format!("t{}", self.index)
    }

    pub fn aliased_primary_key(&self) -> &str {
        &self.columns[0].1
    }

    pub fn column_names_with_alias(&self) -> &[(String, String)] {
        &self.columns
    }

    pub(crate) fn projections(&self) -> impl Iterator<Item = Projection> + '_ {
        let table = self.aliased_table();
        self.columns.iter().map(move |(column, label)| Projection::Column {
            column: table.column(column),
            label: label.clone(),
        })
    }

    /// This part's primary key value in `row`
    pub fn record_id(&self, row: &Row) -> JsonValue {
        row.get(self.aliased_primary_key()).cloned().unwrap_or(JsonValue::Null)
    }

    /// This part's columns of `row`, keyed by their unaliased names
    pub fn extract_record(&self, row: &Row) -> Row {
        self.columns
            .iter()
            .map(|(column, label)| {
                (
                    column.clone(),
                    row.get(label).cloned().unwrap_or(JsonValue::Null),
                )
            })
            .collect()
    }
}
