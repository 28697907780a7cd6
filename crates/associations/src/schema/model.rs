//! Model types and their declaration builder

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use super::Schema;
use crate::error::OrmResult;
use crate::reflection::{AssociationOptions, MacroKind, Reflection, Scope};

/// A declared model: its table, key, columns and associations
#[derive(Debug)]
pub struct ModelType {
    pub(crate) name: String,
    pub(crate) table_name: String,
    pub(crate) primary_key: String,
    pub(crate) columns: Vec<String>,
    pub(crate) parent: Option<String>,
    pub(crate) base_class: String,
    pub(crate) inheritance_column: String,
    pub(crate) reflections: IndexMap<String, Arc<Reflection>>,
}

impl ModelType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Declared columns, primary key first
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Name of the single-table-inheritance parent, if any
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Name of the root of this model's inheritance hierarchy
    pub fn base_class(&self) -> &str {
        &self.base_class
    }

    pub fn inheritance_column(&self) -> &str {
        &self.inheritance_column
    }

    /// True for STI subclasses, whose queries need a type condition
    pub fn needs_type_condition(&self) -> bool {
        self.parent.is_some()
    }

    /// Associations declared directly on this model, in declaration order
    pub fn reflections(&self) -> impl Iterator<Item = &Arc<Reflection>> {
        self.reflections.values()
    }

    pub fn reflection(&self, name: &str) -> Option<&Arc<Reflection>> {
        self.reflections.get(name)
    }
}

/// A lazily resolved reference to a model in the schema
///
/// Associations may point at models declared later; the handle resolves by name on
/// first use and caches a weak reference afterwards.
#[derive(Debug)]
pub struct TypeHandle {
    name: String,
    resolved: OnceCell<Weak<ModelType>>,
}

impl TypeHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, schema: &Schema) -> OrmResult<Arc<ModelType>> {
        if let Some(model) = self.resolved.get().and_then(Weak::upgrade) {
            return Ok(model);
        }
        let model = schema.model(&self.name)?;
        let _ = self.resolved.set(Arc::downgrade(&model));
        Ok(model)
    }
}

pub(crate) struct DeclaredAssociation {
    pub(crate) kind: MacroKind,
    pub(crate) name: String,
    pub(crate) scope: Option<Scope>,
    pub(crate) options: AssociationOptions,
}

/// Declares a model for [`Schema::define`]
pub struct ModelBuilder {
    pub(crate) name: String,
    pub(crate) table: Option<String>,
    pub(crate) primary_key: String,
    pub(crate) columns: Vec<String>,
    pub(crate) parent: Option<String>,
    pub(crate) inheritance_column: String,
    pub(crate) associations: Vec<DeclaredAssociation>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: "id".to_string(),
            columns: Vec::new(),
            parent: None,
            inheritance_column: "type".to_string(),
            associations: Vec::new(),
        }
    }

    /// Use an explicit table name instead of the derived one
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Make this model a single-table-inheritance subclass of `parent`
    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn inheritance_column(mut self, column: impl Into<String>) -> Self {
        self.inheritance_column = column.into();
        self
    }

    pub fn belongs_to(self, name: impl Into<String>, options: AssociationOptions) -> Self {
        self.associate(MacroKind::BelongsTo, name, None, options)
    }

    pub fn has_one(self, name: impl Into<String>, options: AssociationOptions) -> Self {
        self.associate(MacroKind::HasOne, name, None, options)
    }

    pub fn has_many(self, name: impl Into<String>, options: AssociationOptions) -> Self {
        self.associate(MacroKind::HasMany, name, None, options)
    }

    pub fn has_and_belongs_to_many(self, name: impl Into<String>, options: AssociationOptions) -> Self {
        self.associate(MacroKind::HasAndBelongsToMany, name, None, options)
    }

    /// Declare an association of any kind with an explicit scope
    pub fn associate(
        mut self,
        kind: MacroKind,
        name: impl Into<String>,
        scope: Option<Scope>,
        options: AssociationOptions,
    ) -> Self {
        self.associations.push(DeclaredAssociation {
            kind,
            name: name.into(),
            scope,
            options,
        });
        self
    }
}
