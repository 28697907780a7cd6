//! Query plan vocabulary handed to a [`QueryExecutor`](super::QueryExecutor)
//!
//! Plans are plain data: the join builder, the preloader and the association scopes
//! describe *what* to fetch, executors decide how to run it.

use serde_json::Value as JsonValue;

/// A result row: column label -> raw value, in select-list order
pub type Row = serde_json::Map<String, JsonValue>;

/// A table in a FROM or JOIN clause, optionally aliased
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    /// An aliased table; an alias equal to the table name is dropped
    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        let name = name.into();
        let alias = alias.into();
        if alias == name {
            Self::new(name)
        } else {
            Self {
                name,
                alias: Some(alias),
            }
        }
    }

    /// The identifier used to qualify columns of this table
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn column(&self, column: impl Into<String>) -> ColumnRef {
        ColumnRef::new(self.reference(), column)
    }
}

/// A column qualified by a table name or alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Value(JsonValue),
}

/// A qualified predicate; a list of predicates is ANDed
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: ColumnRef,
        op: CompareOp,
        right: Operand,
    },
    In {
        column: ColumnRef,
        values: Vec<JsonValue>,
    },
    IsNull(ColumnRef),
    NotNull(ColumnRef),
}

impl Predicate {
    /// `left = right` between two columns
    pub fn columns_eq(left: ColumnRef, right: ColumnRef) -> Self {
        Predicate::Compare {
            left,
            op: CompareOp::Eq,
            right: Operand::Column(right),
        }
    }

    /// `column = value`
    pub fn eq(column: ColumnRef, value: impl Into<JsonValue>) -> Self {
        Predicate::Compare {
            left: column,
            op: CompareOp::Eq,
            right: Operand::Value(value.into()),
        }
    }

    pub fn compare(column: ColumnRef, op: CompareOp, value: impl Into<JsonValue>) -> Self {
        Predicate::Compare {
            left: column,
            op,
            right: Operand::Value(value.into()),
        }
    }

    pub fn in_list(column: ColumnRef, values: Vec<JsonValue>) -> Self {
        Predicate::In { column, values }
    }

    /// Table references mentioned by this predicate
    pub fn tables(&self) -> Vec<&str> {
        match self {
            Predicate::Compare { left, right, .. } => {
                let mut tables = vec![left.table.as_str()];
                if let Operand::Column(column) = right {
                    tables.push(column.table.as_str());
                }
                tables
            }
            Predicate::In { column, .. } | Predicate::IsNull(column) | Predicate::NotNull(column) => {
                vec![column.table.as_str()]
            }
        }
    }
}

/// An unqualified condition, as produced by association scopes
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        op: CompareOp,
        value: JsonValue,
    },
    In {
        column: String,
        values: Vec<JsonValue>,
    },
    IsNull(String),
    NotNull(String),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Condition::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<JsonValue>) -> Self {
        Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn in_list(column: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Condition::In {
            column: column.into(),
            values,
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Condition::IsNull(column.into())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Condition::NotNull(column.into())
    }

    pub fn column(&self) -> &str {
        match self {
            Condition::Compare { column, .. }
            | Condition::In { column, .. }
            | Condition::IsNull(column)
            | Condition::NotNull(column) => column,
        }
    }

    /// Qualify this condition against a table reference
    pub fn qualify(&self, table: &str) -> Predicate {
        let column = ColumnRef::new(table, self.column());
        match self {
            Condition::Compare { op, value, .. } => Predicate::Compare {
                left: column,
                op: *op,
                right: Operand::Value(value.clone()),
            },
            Condition::In { values, .. } => Predicate::In {
                column,
                values: values.clone(),
            },
            Condition::IsNull(_) => Predicate::IsNull(column),
            Condition::NotNull(_) => Predicate::NotNull(column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Vec<Predicate>,
}

/// An entry of the select list
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `table.*`
    AllColumns(String),
    /// `table.column AS label`
    Column { column: ColumnRef, label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: OrderDirection,
}

/// A SELECT statement described as data
#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    pub from: TableRef,
    pub joins: Vec<JoinClause>,
    /// Hand-written join fragments appended after the structured joins
    pub raw_joins: Vec<String>,
    pub projections: Vec<Projection>,
    pub filters: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl SelectPlan {
    pub fn new(from: TableRef) -> Self {
        Self {
            from,
            joins: Vec::new(),
            raw_joins: Vec::new(),
            projections: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// `SELECT table.* FROM table`
    pub fn all_from(from: TableRef) -> Self {
        let reference = from.reference().to_string();
        Self::new(from).project(Projection::AllColumns(reference))
    }

    pub fn join(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.filters.extend(predicates);
        self
    }

    pub fn order_by(mut self, column: ColumnRef, direction: OrderDirection) -> Self {
        self.order.push(OrderBy { column, direction });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// All table references introduced by FROM and JOIN clauses
    pub fn table_references(&self) -> Vec<&str> {
        std::iter::once(self.from.reference())
            .chain(self.joins.iter().map(|join| join.table.reference()))
            .collect()
    }
}

/// A batched lookup of rows whose key column matches any of `keys`
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFind {
    /// The lookup without its key filter
    pub plan: SelectPlan,
    pub key: ColumnRef,
    pub keys: Vec<JsonValue>,
}

impl BatchFind {
    pub fn new(plan: SelectPlan, key: ColumnRef, keys: Vec<JsonValue>) -> Self {
        Self { plan, key, keys }
    }

    /// The plan restricted to this lookup's keys
    pub fn to_plan(&self) -> SelectPlan {
        self.plan
            .clone()
            .filter(Predicate::in_list(self.key.clone(), self.keys.clone()))
    }

    /// A copy of this lookup restricted to a subset of keys
    pub fn with_keys(&self, keys: Vec<JsonValue>) -> Self {
        Self {
            plan: self.plan.clone(),
            key: self.key.clone(),
            keys,
        }
    }
}

/// A write issued when association assignments are persisted
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Update {
        table: String,
        filters: Vec<Predicate>,
        changes: Row,
    },
    Insert {
        table: String,
        values: Row,
    },
    Delete {
        table: String,
        filters: Vec<Predicate>,
    },
}

impl WriteOp {
    pub fn table(&self) -> &str {
        match self {
            WriteOp::Update { table, .. } | WriteOp::Insert { table, .. } | WriteOp::Delete { table, .. } => table,
        }
    }
}
