//! Model catalog
//!
//! A [`Schema`] owns every declared model and its reflections. It is built once at
//! startup, shared by cheap clones and passed to anything that resolves associations.

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::config::AssociationConfig;
use crate::error::{OrmError, OrmResult};
use crate::inflector;
use crate::query::Row;
use crate::record::Record;
use crate::reflection::Reflection;

pub mod model;

pub use model::{ModelBuilder, ModelType, TypeHandle};

/// Turns raw column values into attribute values on instantiation
pub trait AttributeCaster: Send + Sync {
    fn cast(&self, model: &ModelType, column: &str, value: JsonValue) -> JsonValue;
}

/// Keeps raw values as they came from the executor
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughCaster;

impl AttributeCaster for PassThroughCaster {
    fn cast(&self, _model: &ModelType, _column: &str, value: JsonValue) -> JsonValue {
        value
    }
}

struct SchemaInner {
    models: DashMap<String, Arc<ModelType>>,
    config: AssociationConfig,
    caster: Arc<dyn AttributeCaster>,
}

/// Catalog of model types and their associations
#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("models", &self.inner.models.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(AssociationConfig::default())
    }
}

impl Schema {
    pub fn new(config: AssociationConfig) -> Self {
        Self::with_caster(config, Arc::new(PassThroughCaster))
    }

    pub fn with_caster(config: AssociationConfig, caster: Arc<dyn AttributeCaster>) -> Self {
        Self {
            inner: Arc::new(SchemaInner {
                models: DashMap::new(),
                config,
                caster,
            }),
        }
    }

    pub fn config(&self) -> &AssociationConfig {
        &self.inner.config
    }

    /// Register a model
    ///
    /// An STI parent must be defined before its subclasses. Association targets may be
    /// defined later; they are resolved on first use.
    pub fn define(&self, builder: ModelBuilder) -> OrmResult<Arc<ModelType>> {
        if self.inner.models.contains_key(&builder.name) {
            return Err(OrmError::Configuration(format!(
                "Model '{}' is already defined",
                builder.name
            )));
        }

        let parent = builder.parent.as_deref().map(|name| self.model(name)).transpose()?;
        let config = &self.inner.config;

        let table_name = match (&builder.table, &parent) {
            (Some(table), _) => table.clone(),
            (None, Some(parent)) => parent.table_name.clone(),
            (None, None) => config.decorate_table_name(&inflector::tableize(
                &builder.name,
                config.pluralize_table_names,
            )),
        };

        let (primary_key, inheritance_column, base_class) = match &parent {
            Some(parent) => (
                parent.primary_key.clone(),
                parent.inheritance_column.clone(),
                parent.base_class.clone(),
            ),
            None => (
                builder.primary_key.clone(),
                builder.inheritance_column.clone(),
                builder.name.clone(),
            ),
        };

        let mut columns = if builder.columns.is_empty() {
            parent.as_ref().map(|p| p.columns.clone()).unwrap_or_default()
        } else {
            builder.columns.clone()
        };
        columns.retain(|column| column != &primary_key);
        columns.insert(0, primary_key.clone());

        let mut reflections = IndexMap::new();
        for declared in builder.associations {
            let reflection = Reflection::create(
                declared.kind,
                &declared.name,
                declared.scope,
                declared.options,
                &builder.name,
                config,
            )?;
            reflections.insert(declared.name, reflection);
        }

        let model = Arc::new(ModelType {
            name: builder.name.clone(),
            table_name,
            primary_key,
            columns,
            parent: builder.parent,
            base_class,
            inheritance_column,
            reflections,
        });

        tracing::debug!(
            "Defined model {} on table {} with {} association(s)",
            model.name,
            model.table_name,
            model.reflections.len()
        );
        self.inner.models.insert(builder.name, Arc::clone(&model));
        Ok(model)
    }

    pub fn model(&self, name: &str) -> OrmResult<Arc<ModelType>> {
        self.inner
            .models
            .get(name)
            .map(|model| Arc::clone(model.value()))
            .ok_or_else(|| OrmError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.models.contains_key(name)
    }

    /// Find an association on a model or any of its STI ancestors
    pub fn reflect_on_association(&self, model: &ModelType, name: &str) -> OrmResult<Arc<Reflection>> {
        self.find_reflection(model, name)?
            .ok_or_else(|| OrmError::association_not_found(&model.name, name))
    }

    pub(crate) fn find_reflection(&self, model: &ModelType, name: &str) -> OrmResult<Option<Arc<Reflection>>> {
        if let Some(reflection) = model.reflections.get(name) {
            return Ok(Some(Arc::clone(reflection)));
        }
        match &model.parent {
            Some(parent) => {
                let parent = self.model(parent)?;
                self.find_reflection(&parent, name)
            }
            None => Ok(None),
        }
    }

    /// Every association visible on a model, inherited ones first
    pub fn reflections(&self, model: &ModelType) -> OrmResult<Vec<Arc<Reflection>>> {
        let mut reflections = match &model.parent {
            Some(parent) => self.reflections(&*self.model(parent)?)?,
            None => Vec::new(),
        };
        for reflection in model.reflections.values() {
            reflections.retain(|existing| existing.name() != reflection.name());
            reflections.push(Arc::clone(reflection));
        }
        Ok(reflections)
    }

    pub fn base_class(&self, model: &ModelType) -> OrmResult<Arc<ModelType>> {
        self.model(&model.base_class)
    }

    /// True when `model` is `ancestor` or one of its STI subclasses
    pub fn is_a(&self, model: &ModelType, ancestor: &str) -> bool {
        let mut current = Some(model.name.clone());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.model(&name).ok().and_then(|m| m.parent.clone());
        }
        false
    }

    /// All STI subclasses of a model, at any depth
    pub fn descendants(&self, model: &ModelType) -> Vec<Arc<ModelType>> {
        let models: Vec<Arc<ModelType>> = self
            .inner
            .models
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut descendants: Vec<Arc<ModelType>> = models
            .into_iter()
            .filter(|candidate| candidate.name != model.name && self.is_a(candidate, &model.name))
            .collect();
        descendants.sort_by(|a, b| a.name.cmp(&b.name));
        descendants
    }

    /// Type column values matched by a query on `model`
    pub fn sti_names(&self, model: &ModelType) -> Vec<String> {
        std::iter::once(model.name.clone())
            .chain(self.descendants(model).into_iter().map(|m| m.name.clone()))
            .collect()
    }

    /// Materialize a persisted record from a row
    ///
    /// A row whose inheritance column names a registered subclass of `model` becomes an
    /// instance of that subclass.
    pub fn instantiate(&self, model: &Arc<ModelType>, row: Row) -> OrmResult<Record> {
        let model = self.concrete_model(model, &row);
        let caster = &self.inner.caster;
        let attributes: Row = row
            .into_iter()
            .map(|(column, value)| {
                let value = caster.cast(&model, &column, value);
                (column, value)
            })
            .collect();
        Ok(Record::from_row(model, attributes))
    }

    /// Build a new, unsaved record of the named model
    pub fn new_record(&self, model: &str, attributes: Row) -> OrmResult<Record> {
        let model = self.model(model)?;
        Ok(Record::new(model, attributes))
    }

    fn concrete_model(&self, model: &Arc<ModelType>, row: &Row) -> Arc<ModelType> {
        let type_name = match row.get(&model.inheritance_column) {
            Some(JsonValue::String(name)) if !name.is_empty() && name != &model.name => name,
            _ => return Arc::clone(model),
        };
        match self.model(type_name) {
            Ok(subclass) if self.is_a(&subclass, &model.name) => subclass,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    "Ignoring inheritance value '{}' on {}: not a subclass",
                    type_name,
                    model.name
                );
                Arc::clone(model)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::AssociationOptions;
    use serde_json::json;

    fn schema() -> Schema {
        let schema = Schema::default();
        schema
            .define(
                ModelBuilder::new("Post")
                    .columns(["title", "type", "id", "author_id"])
                    .belongs_to("author", AssociationOptions::new()),
            )
            .unwrap();
        schema
            .define(ModelBuilder::new("SpecialPost").inherits("Post"))
            .unwrap();
        schema
            .define(ModelBuilder::new("StickyPost").inherits("SpecialPost"))
            .unwrap();
        schema
    }

    #[test]
    fn test_table_and_columns_derivation() {
        let schema = schema();
        let post = schema.model("Post").unwrap();
        assert_eq!(post.table_name(), "posts");
        assert_eq!(post.columns(), &["id", "title", "type", "author_id"]);

        let special = schema.model("SpecialPost").unwrap();
        assert_eq!(special.table_name(), "posts");
        assert_eq!(special.base_class(), "Post");
        assert_eq!(special.columns(), post.columns());
        assert!(special.needs_type_condition());
    }

    #[test]
    fn test_reflection_lookup_walks_parents() {
        let schema = schema();
        let sticky = schema.model("StickyPost").unwrap();
        let reflection = schema.reflect_on_association(&sticky, "author").unwrap();
        assert_eq!(reflection.name(), "author");
        assert_eq!(reflection.active_record(), "Post");

        let err = schema.reflect_on_association(&sticky, "autor").unwrap_err();
        assert!(matches!(err, OrmError::AssociationNotFound { .. }));
    }

    #[test]
    fn test_sti_names_and_descendants() {
        let schema = schema();
        let post = schema.model("Post").unwrap();
        assert_eq!(schema.sti_names(&post), vec!["Post", "SpecialPost", "StickyPost"]);
        let special = schema.model("SpecialPost").unwrap();
        assert_eq!(schema.sti_names(&special), vec!["SpecialPost", "StickyPost"]);
    }

    #[test]
    fn test_instantiate_picks_subclass() {
        let schema = schema();
        let post = schema.model("Post").unwrap();
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        row.insert("type".into(), json!("StickyPost"));
        let record = schema.instantiate(&post, row).unwrap();
        assert_eq!(record.model_name(), "StickyPost");
        assert!(record.is_persisted());

        let mut row = Row::new();
        row.insert("id".into(), json!(2));
        row.insert("type".into(), json!("Author"));
        assert_eq!(schema.instantiate(&post, row).unwrap().model_name(), "Post");
    }

    #[test]
    fn test_duplicate_and_orphan_definitions_fail() {
        let schema = schema();
        assert!(schema.define(ModelBuilder::new("Post")).is_err());
        let err = schema
            .define(ModelBuilder::new("Orphan").inherits("Missing"))
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownModel(ref name) if name == "Missing"));
    }
}
