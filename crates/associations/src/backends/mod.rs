//! Query executor implementations

pub mod memory;
pub mod postgres;

pub use memory::MemoryExecutor;
pub use postgres::PostgresExecutor;
