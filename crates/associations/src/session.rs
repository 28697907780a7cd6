//! Loading entry point
//!
//! A [`Session`] pairs a [`Schema`] with a [`QueryExecutor`] and decides how a set of
//! includes gets loaded: batched preloading or one joined query.

use std::sync::Arc;

use crate::association::scope::type_condition;
use crate::association::AssociationHandle;
use crate::config::AssociationConfig;
use crate::error::{OrmError, OrmResult};
use crate::includes::Includes;
use crate::join_dependency::JoinDependency;
use crate::preloader::{validate_includes, Preloader};
use crate::query::{Predicate, QueryExecutor, SelectPlan, TableRef};
use crate::record::Record;
use crate::schema::{ModelType, Schema};

/// How `find_all` loads included associations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// One batched query per association
    Preload,
    /// One LEFT OUTER JOIN query for everything
    EagerLoad,
    /// Join when a filter mentions a table other than the root table, preload otherwise
    #[default]
    Auto,
}

/// Schema and executor used to load records and their associations
#[derive(Clone)]
pub struct Session {
    schema: Schema,
    executor: Arc<dyn QueryExecutor>,
}

impl Session {
    pub fn new(schema: Schema, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { schema, executor }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn executor(&self) -> &dyn QueryExecutor {
        self.executor.as_ref()
    }

    pub fn config(&self) -> &AssociationConfig {
        self.schema.config()
    }

    /// Identifier length limit: the configured override, else the executor's
    pub fn table_alias_length(&self) -> usize {
        self.config()
            .table_alias_length
            .unwrap_or_else(|| self.executor.table_alias_length())
    }

    /// The association `name` of `record`
    pub fn association(&self, record: &Record, name: &str) -> OrmResult<AssociationHandle<'_>> {
        let reflection = self.schema.reflect_on_association(record.model(), name)?;
        Ok(AssociationHandle::new(self, record.clone(), reflection))
    }

    pub fn preloader(&self) -> Preloader<'_> {
        Preloader::new(&self.schema, self.executor.as_ref())
    }

    /// Preload `includes` on already loaded records
    pub async fn preload(&self, records: &[Record], includes: impl Into<Includes>) -> OrmResult<()> {
        self.preloader().run(records, &includes.into()).await
    }

    /// Join tree for `includes` on `model`
    pub fn join_dependency(&self, model: &str, includes: impl Into<Includes>) -> OrmResult<JoinDependency> {
        let model = self.schema.model(model)?;
        JoinDependency::new(
            &self.schema,
            model,
            &includes.into(),
            Vec::new(),
            self.table_alias_length(),
        )
    }

    /// Load every `model` record matching `filters`, with `includes` loaded in one joined query
    pub async fn eager_load(
        &self,
        model: &str,
        filters: Vec<Predicate>,
        includes: impl Into<Includes>,
    ) -> OrmResult<Vec<Record>> {
        self.find_all(model, filters, includes, LoadStrategy::EagerLoad).await
    }

    /// Load every `model` record matching `filters` and the given includes
    ///
    /// Filters are qualified by table name; the root table is referenced by its own
    /// name. Include names are checked before any query is issued.
    pub async fn find_all(
        &self,
        model: &str,
        filters: Vec<Predicate>,
        includes: impl Into<Includes>,
        strategy: LoadStrategy,
    ) -> OrmResult<Vec<Record>> {
        let includes = includes.into();
        let klass = self.schema.model(model)?;
        validate_includes(&self.schema, &klass, &includes)?;

        let join = match strategy {
            LoadStrategy::Preload => false,
            LoadStrategy::EagerLoad => true,
            LoadStrategy::Auto => references_other_tables(&filters, klass.table_name()),
        };

        if join && !includes.is_empty() {
            let dependency = JoinDependency::new(
                &self.schema,
                Arc::clone(&klass),
                &includes,
                Vec::new(),
                self.table_alias_length(),
            )?;
            let root = dependency.join_base().aliased_table().clone();
            let mut plan = dependency.to_plan()?.filters(filters);
            plan.filters.extend(type_condition(&self.schema, &klass, &root));

            tracing::debug!(
                "Eager loading {} with {} join(s)",
                klass.name(),
                plan.joins.len()
            );
            let rows = self.executor.execute_plan(&plan).await?;
            return dependency.instantiate(&rows);
        }

        let records = self.select(&klass, filters).await?;
        if !includes.is_empty() {
            self.preloader().run(&records, &includes).await?;
        }
        Ok(records)
    }

    /// Refresh `record` from the database and drop its loaded associations
    pub async fn reload(&self, record: &Record) -> OrmResult<()> {
        let id = record.id().ok_or(OrmError::MissingPrimaryKey)?;
        let klass = Arc::clone(record.model());
        let table = TableRef::new(klass.table_name());
        let plan = SelectPlan::all_from(table.clone())
            .filter(Predicate::eq(table.column(klass.primary_key()), id.clone()))
            .limit(1);

        let row = self
            .executor
            .execute_plan(&plan)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                OrmError::Query(format!(
                    "Couldn't find {} with {}={}",
                    klass.name(),
                    klass.primary_key(),
                    id
                ))
            })?;

        let fresh = self.schema.instantiate(&klass, row)?;
        record.replace_attributes(fresh.attributes());
        record.clear_association_cache();
        Ok(())
    }

    async fn select(&self, klass: &Arc<ModelType>, filters: Vec<Predicate>) -> OrmResult<Vec<Record>> {
        let table = TableRef::new(klass.table_name());
        let mut plan = SelectPlan::all_from(table.clone()).filters(filters);
        plan.filters.extend(type_condition(&self.schema, klass, &table));

        tracing::debug!("Loading {} from {}", klass.name(), table.name);
        let rows = self.executor.execute_plan(&plan).await?;
        rows.into_iter()
            .map(|row| self.schema.instantiate(klass, row))
            .collect()
    }
}

fn references_other_tables(filters: &[Predicate], root: &str) -> bool {
    filters
        .iter()
        .flat_map(Predicate::tables)
        .any(|table| table != root)
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("schema", &self.schema)
            .field("table_alias_length", &self.table_alias_length())
            .finish()
    }
}
