//! # elif-associations: Association Engine for elif.rs
//!
//! Declares associations between models (belongs-to, has-one, has-many,
//! has-and-belongs-to-many, through and polymorphic variants), loads them lazily per
//! owner, preloads them in batches for many owners, and eager loads them with a single
//! LEFT OUTER JOIN query whose flat rows are rebuilt into an object graph.
//!
//! Models are registered in a [`Schema`]; queries are described as [`SelectPlan`]s and
//! run by a [`QueryExecutor`] such as [`PostgresExecutor`] or [`MemoryExecutor`].

pub mod association;
pub mod backends;
pub mod config;
pub mod error;
pub mod includes;
pub mod inflector;
pub mod join_dependency;
pub mod preloader;
pub mod query;
pub mod record;
pub mod reflection;
pub mod schema;
pub mod session;
pub mod sql;

// Re-export core types
pub use association::{AssociationCallback, AssociationHandle, AssociationScope, AssociationTarget};
pub use backends::{MemoryExecutor, PostgresExecutor};
pub use config::AssociationConfig;
pub use error::{OrmError, OrmResult};
pub use includes::Includes;
pub use join_dependency::{AliasTracker, JoinDependency, JoinPart};
pub use preloader::Preloader;
pub use query::{
    find_in_batches, BatchFind, ColumnRef, CompareOp, Condition, JoinClause, JoinKind, Operand, OrderBy,
    OrderDirection, Predicate, Projection, QueryExecutor, Row, SelectPlan, TableRef, WriteOp,
};
pub use record::{Record, WeakRecord};
pub use reflection::{AssociationOptions, InverseOf, MacroKind, Reflection, Scope, ScopeFragment};
pub use schema::{AttributeCaster, ModelBuilder, ModelType, Schema};
pub use session::{LoadStrategy, Session};
pub use sql::SqlDialect;
