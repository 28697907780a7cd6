//! Query plans and the executor contract

pub mod executor;
pub mod plan;

pub use executor::{find_in_batches, QueryExecutor, DEFAULT_TABLE_ALIAS_LENGTH};
pub use plan::{
    BatchFind, ColumnRef, CompareOp, Condition, JoinClause, JoinKind, Operand, OrderBy,
    OrderDirection, Predicate, Projection, Row, SelectPlan, TableRef, WriteOp,
};
