//! SQL rendering for query plans
//!
//! Plans are rendered with parameter placeholders; values are returned separately in
//! placeholder order.

use serde_json::Value as JsonValue;

use crate::query::{
    ColumnRef, CompareOp, JoinClause, Operand, OrderDirection, Predicate, Projection, SelectPlan, TableRef, WriteOp,
};

/// SQL dialect used for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for the zero-based parameter `index`
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }
}

/// Escape SQL identifier for safe use in queries
pub fn escape_identifier(identifier: &str, dialect: SqlDialect) -> String {
    let quote = dialect.identifier_quote();
    let escaped = identifier.replace(quote, &format!("{}{}", quote, quote));
    format!("{}{}{}", quote, escaped, quote)
}

/// Render a SELECT plan
pub fn render_select(plan: &SelectPlan, dialect: SqlDialect) -> (String, Vec<JsonValue>) {
    let mut writer = SqlWriter::new(dialect);
    writer.select(plan);
    writer.finish()
}

/// Render a write operation
pub fn render_write(op: &WriteOp, dialect: SqlDialect) -> (String, Vec<JsonValue>) {
    let mut writer = SqlWriter::new(dialect);
    writer.write(op);
    writer.finish()
}

struct SqlWriter {
    dialect: SqlDialect,
    sql: String,
    params: Vec<JsonValue>,
}

impl SqlWriter {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn finish(self) -> (String, Vec<JsonValue>) {
        (self.sql, self.params)
    }

    fn ident(&self, identifier: &str) -> String {
        escape_identifier(identifier, self.dialect)
    }

    fn bind(&mut self, value: &JsonValue) {
        let placeholder = self.dialect.parameter_placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self.params.push(value.clone());
    }

    fn table(&mut self, table: &TableRef) {
        let name = self.ident(&table.name);
        self.sql.push_str(&name);
        if let Some(alias) = &table.alias {
            let alias = self.ident(alias);
            self.sql.push(' ');
            self.sql.push_str(&alias);
        }
    }

    fn column(&mut self, column: &ColumnRef) {
        let rendered = format!("{}.{}", self.ident(&column.table), self.ident(&column.column));
        self.sql.push_str(&rendered);
    }

    fn select(&mut self, plan: &SelectPlan) {
        self.sql.push_str("SELECT ");
        if plan.projections.is_empty() {
            self.sql.push('*');
        }
        for (i, projection) in plan.projections.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            match projection {
                Projection::AllColumns(table) => {
                    let table = self.ident(table);
                    self.sql.push_str(&table);
                    self.sql.push_str(".*");
                }
                Projection::Column { column, label } => {
                    self.column(column);
                    let label = self.ident(label);
                    self.sql.push_str(" AS ");
                    self.sql.push_str(&label);
                }
            }
        }

        self.sql.push_str(" FROM ");
        self.table(&plan.from);
        for join in &plan.joins {
            self.join(join);
        }
        for raw in &plan.raw_joins {
            self.sql.push(' ');
            self.sql.push_str(raw);
        }

        self.predicates(" WHERE ", &plan.filters);

        for (i, order) in plan.order.iter().enumerate() {
            self.sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            self.column(&order.column);
            self.sql.push_str(match order.direction {
                OrderDirection::Asc => " ASC",
                OrderDirection::Desc => " DESC",
            });
        }
        if let Some(limit) = plan.limit {
            self.sql.push_str(&format!(" LIMIT {}", limit));
        }
    }

    fn join(&mut self, join: &JoinClause) {
        self.sql.push(' ');
        self.sql.push_str(join.kind.as_sql());
        self.sql.push(' ');
        self.table(&join.table);
        self.predicates(" ON ", &join.on);
    }

    /// ANDed predicates introduced by `keyword`; nothing for an empty list
    fn predicates(&mut self, keyword: &str, predicates: &[Predicate]) {
        for (i, predicate) in predicates.iter().enumerate() {
            self.sql.push_str(if i == 0 { keyword } else { " AND " });
            self.predicate(predicate);
        }
    }

    fn predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::Compare { left, op, right } => {
                self.column(left);
                match right {
                    Operand::Value(JsonValue::Null) if *op == CompareOp::Eq => self.sql.push_str(" IS NULL"),
                    Operand::Value(JsonValue::Null) if *op == CompareOp::NotEq => {
                        self.sql.push_str(" IS NOT NULL")
                    }
                    Operand::Value(value) => {
                        self.sql.push(' ');
                        self.sql.push_str(op.as_sql());
                        self.sql.push(' ');
                        self.bind(value);
                    }
                    Operand::Column(column) => {
                        self.sql.push(' ');
                        self.sql.push_str(op.as_sql());
                        self.sql.push(' ');
                        self.column(column);
                    }
                }
            }
            Predicate::In { values, .. } if values.is_empty() => self.sql.push_str("1=0"),
            Predicate::In { column, values } => {
                self.column(column);
                self.sql.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.bind(value);
                }
                self.sql.push(')');
            }
            Predicate::IsNull(column) => {
                self.column(column);
                self.sql.push_str(" IS NULL");
            }
            Predicate::NotNull(column) => {
                self.column(column);
                self.sql.push_str(" IS NOT NULL");
            }
        }
    }

    fn write(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Update {
                table,
                filters,
                changes,
            } => {
                let table = self.ident(table);
                self.sql.push_str(&format!("UPDATE {} SET ", table));
                for (i, (column, value)) in changes.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    let column = self.ident(column);
                    self.sql.push_str(&column);
                    self.sql.push_str(" = ");
                    self.bind(value);
                }
                self.predicates(" WHERE ", filters);
            }
            WriteOp::Insert { table, values } => {
                let table = self.ident(table);
                let columns: Vec<String> = values.keys().map(|column| self.ident(column)).collect();
                self.sql
                    .push_str(&format!("INSERT INTO {} ({}) VALUES (", table, columns.join(", ")));
                for (i, value) in values.values().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.bind(value);
                }
                self.sql.push(')');
            }
            WriteOp::Delete { table, filters } => {
                let table = self.ident(table);
                self.sql.push_str(&format!("DELETE FROM {}", table));
                self.predicates(" WHERE ", filters);
            }
        }
    }
}
