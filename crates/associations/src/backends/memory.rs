//! In-memory executor
//!
//! Evaluates plans against tables held in memory and records every statement it runs.
//! Used by the test suites and handy for prototyping schemas without a database.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;

use crate::error::{OrmError, OrmResult};
use crate::query::{
    CompareOp, JoinKind, Operand, OrderDirection, Predicate, Projection, QueryExecutor, Row, SelectPlan, TableRef,
    WriteOp, DEFAULT_TABLE_ALIAS_LENGTH,
};
use crate::record::key_of;

/// Table reference -> row bound to it; `None` for an unmatched outer join
type Binding = IndexMap<String, Option<Row>>;

#[derive(Debug, Default)]
struct StatementLog {
    plans: Vec<SelectPlan>,
    writes: Vec<WriteOp>,
}

/// Query executor over in-memory tables
#[derive(Debug)]
pub struct MemoryExecutor {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    max_ids_in_list: Option<usize>,
    table_alias_length: usize,
    log: Mutex<StatementLog>,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            max_ids_in_list: None,
            table_alias_length: DEFAULT_TABLE_ALIAS_LENGTH,
            log: Mutex::new(StatementLog::default()),
        }
    }

    /// Reject IN lists longer than `limit`, like databases with a bound-parameter cap
    pub fn with_max_ids_in_list(mut self, limit: Option<usize>) -> Self {
        self.max_ids_in_list = limit;
        self
    }

    pub fn with_table_alias_length(mut self, length: usize) -> Self {
        self.table_alias_length = length;
        self
    }

    /// Append rows to `table`; non-object values are ignored
    pub fn insert(&self, table: &str, rows: impl IntoIterator<Item = JsonValue>) {
        let mut tables = self.tables.write();
        let entries = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let JsonValue::Object(row) = row {
                entries.push(row);
            }
        }
    }

    /// Current contents of `table`
    pub fn table(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Number of SELECT statements executed since the last reset
    pub fn query_count(&self) -> usize {
        self.log.lock().plans.len()
    }

    pub fn executed_plans(&self) -> Vec<SelectPlan> {
        self.log.lock().plans.clone()
    }

    pub fn writes(&self) -> Vec<WriteOp> {
        self.log.lock().writes.clone()
    }

    pub fn reset_log(&self) {
        let mut log = self.log.lock();
        log.plans.clear();
        log.writes.clear();
    }

    fn check_in_lists(&self, predicates: &[Predicate]) -> OrmResult<()> {
        let limit = match self.max_ids_in_list {
            Some(limit) => limit,
            None => return Ok(()),
        };
        for predicate in predicates {
            if let Predicate::In { column, values } = predicate {
                if values.len() > limit {
                    return Err(OrmError::Query(format!(
                        "IN list on {}.{} has {} values, limit is {}",
                        column.table,
                        column.column,
                        values.len(),
                        limit
                    )));
                }
            }
        }
        Ok(())
    }

    fn select(&self, plan: &SelectPlan) -> OrmResult<Vec<Row>> {
        if !plan.raw_joins.is_empty() {
            return Err(OrmError::Unsupported(
                "raw join fragments on the in-memory executor".to_string(),
            ));
        }
        self.check_in_lists(&plan.filters)?;

        let tables = self.tables.read();
        let mut bindings: Vec<Binding> = rows_of(&tables, &plan.from)
            .iter()
            .map(|row| {
                let mut binding = Binding::new();
                binding.insert(plan.from.reference().to_string(), Some(row.clone()));
                binding
            })
            .collect();

        for join in &plan.joins {
            let reference = join.table.reference().to_string();
            let right = rows_of(&tables, &join.table);
            let mut joined = Vec::new();
            for binding in bindings {
                let mut matched = false;
                for row in right {
                    let mut candidate = binding.clone();
                    candidate.insert(reference.clone(), Some(row.clone()));
                    if join.on.iter().all(|predicate| matches(predicate, &candidate)) {
                        joined.push(candidate);
                        matched = true;
                    }
                }
                if !matched && join.kind == JoinKind::LeftOuter {
                    let mut unmatched = binding;
                    unmatched.insert(reference.clone(), None);
                    joined.push(unmatched);
                }
            }
            bindings = joined;
        }

        bindings.retain(|binding| plan.filters.iter().all(|predicate| matches(predicate, binding)));

        if !plan.order.is_empty() {
            bindings.sort_by(|a, b| {
                for order in &plan.order {
                    let ordering = compare_values(
                        &lookup(a, &order.column.table, &order.column.column),
                        &lookup(b, &order.column.table, &order.column.column),
                    );
                    let ordering = match order.direction {
                        OrderDirection::Asc => ordering,
                        OrderDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = plan.limit {
            bindings.truncate(limit);
        }

        Ok(bindings.iter().map(|binding| project(plan, binding)).collect())
    }

    fn write(&self, op: &WriteOp) -> OrmResult<u64> {
        let mut tables = self.tables.write();
        match op {
            WriteOp::Insert { table, values } => {
                tables.entry(table.clone()).or_default().push(values.clone());
                Ok(1)
            }
            WriteOp::Update {
                table,
                filters,
                changes,
            } => {
                self.check_in_lists(filters)?;
                let mut affected = 0;
                for row in tables.get_mut(table).into_iter().flatten() {
                    if row_matches(table, row, filters) {
                        for (column, value) in changes {
                            row.insert(column.clone(), value.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            WriteOp::Delete { table, filters } => {
                self.check_in_lists(filters)?;
                let rows = match tables.get_mut(table) {
                    Some(rows) => rows,
                    None => return Ok(0),
                };
                let before = rows.len();
                rows.retain(|row| !row_matches(table, row, filters));
                Ok((before - rows.len()) as u64)
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn execute_plan(&self, plan: &SelectPlan) -> OrmResult<Vec<Row>> {
        self.log.lock().plans.push(plan.clone());
        tracing::trace!("In-memory select on {}", plan.from.name);
        self.select(plan)
    }

    async fn execute_write(&self, op: &WriteOp) -> OrmResult<u64> {
        self.log.lock().writes.push(op.clone());
        tracing::trace!("In-memory write on {}", op.table());
        self.write(op)
    }

    fn max_ids_in_list(&self) -> Option<usize> {
        self.max_ids_in_list
    }

    fn table_alias_length(&self) -> usize {
        self.table_alias_length
    }
}

fn rows_of<'t>(tables: &'t HashMap<String, Vec<Row>>, table: &TableRef) -> &'t [Row] {
    tables.get(&table.name).map(Vec::as_slice).unwrap_or(&[])
}

fn lookup(binding: &Binding, table: &str, column: &str) -> JsonValue {
    binding
        .get(table)
        .and_then(Option::as_ref)
        .and_then(|row| row.get(column))
        .cloned()
        .unwrap_or(JsonValue::Null)
}

fn row_matches(table: &str, row: &Row, filters: &[Predicate]) -> bool {
    let mut binding = Binding::new();
    binding.insert(table.to_string(), Some(row.clone()));
    filters.iter().all(|predicate| matches(predicate, &binding))
}

fn matches(predicate: &Predicate, binding: &Binding) -> bool {
    match predicate {
        Predicate::Compare { left, op, right } => {
            let actual = lookup(binding, &left.table, &left.column);
            let expected = match right {
                Operand::Column(column) => lookup(binding, &column.table, &column.column),
                // `= NULL` and `<> NULL` render as IS [NOT] NULL
                Operand::Value(JsonValue::Null) => {
                    return match op {
                        CompareOp::Eq => actual.is_null(),
                        CompareOp::NotEq => !actual.is_null(),
                        _ => false,
                    }
                }
                Operand::Value(value) => value.clone(),
            };
            if actual.is_null() || expected.is_null() {
                return false;
            }
            let ordering = compare_values(&actual, &expected);
            match op {
                CompareOp::Eq => values_eq(&actual, &expected),
                CompareOp::NotEq => !values_eq(&actual, &expected),
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Lte => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Gte => ordering != Ordering::Less,
            }
        }
        Predicate::In { column, values } => {
            let actual = lookup(binding, &column.table, &column.column);
            !actual.is_null() && values.iter().any(|value| values_eq(&actual, value))
        }
        Predicate::IsNull(column) => lookup(binding, &column.table, &column.column).is_null(),
        Predicate::NotNull(column) => !lookup(binding, &column.table, &column.column).is_null(),
    }
}

fn values_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => key_of(a).is_some() && key_of(a) == key_of(b),
    }
}

/// Total order used for ORDER BY; nulls sort last
fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Null, _) => Ordering::Greater,
        (_, JsonValue::Null) => Ordering::Less,
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        _ => key_of(a).cmp(&key_of(b)),
    }
}

fn project(plan: &SelectPlan, binding: &Binding) -> Row {
    let mut row = Row::new();
    for projection in &plan.projections {
        match projection {
            Projection::AllColumns(table) => {
                if let Some(Some(source)) = binding.get(table) {
                    for (column, value) in source {
                        row.insert(column.clone(), value.clone());
                    }
                }
            }
            Projection::Column { column, label } => {
                row.insert(label.clone(), lookup(binding, &column.table, &column.column));
            }
        }
    }
    row
}
