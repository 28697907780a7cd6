//! Association metadata
//!
//! A [`Reflection`] describes one declared association: its kind, target model, key
//! columns and any `through` indirection. Reflections are created when a model is
//! defined and never change afterwards, apart from lazily cached derivations.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::AssociationConfig;
use crate::error::{OrmError, OrmResult};
use crate::inflector;
use crate::query::Condition;
use crate::schema::{ModelType, Schema, TypeHandle};

pub mod options;

pub use options::{AssociationOptions, Callbacks, InverseOf, MacroKind, Scope, ScopeFragment};

/// Through chains nested deeper than this are treated as a declaration cycle
const MAX_CHAIN_DEPTH: usize = 32;

/// Metadata for one declared association
#[derive(Debug)]
pub struct Reflection {
    macro_kind: MacroKind,
    name: String,
    active_record: String,
    options: AssociationOptions,
    scope: Option<Scope>,
    klass: Option<TypeHandle>,
    foreign_key: String,
    plural_name: String,
    automatic_inverse: OnceCell<Option<String>>,
}

impl Reflection {
    /// Create the reflection for `owner.<kind> name`
    pub fn create(
        kind: MacroKind,
        name: &str,
        scope: Option<Scope>,
        options: AssociationOptions,
        active_record: &str,
        config: &AssociationConfig,
    ) -> OrmResult<Arc<Self>> {
        options.validate(kind, active_record, name)?;
        let scope = scope.or_else(|| options.scope.clone());

        let klass = if options.through.is_some() {
            // Resolved through the source reflection unless named explicitly
            options
                .class_name
                .clone()
                .or_else(|| options.source_type.clone())
                .map(TypeHandle::new)
        } else if options.polymorphic {
            None
        } else {
            let class_name = options.class_name.clone().unwrap_or_else(|| {
                if kind.is_collection() {
                    inflector::camelize(&inflector::singularize(name))
                } else {
                    inflector::camelize(name)
                }
            });
            Some(TypeHandle::new(class_name))
        };

        let foreign_key = match (&options.foreign_key, kind, &options.as_) {
            (Some(foreign_key), _, _) => foreign_key.clone(),
            (None, MacroKind::BelongsTo, _) => format!("{}_id", name),
            (None, _, Some(interface)) => format!("{}_id", interface),
            (None, _, None) => inflector::foreign_key(active_record),
        };

        let plural_name = if config.pluralize_table_names {
            inflector::pluralize(name)
        } else {
            name.to_string()
        };

        Ok(Arc::new(Self {
            macro_kind: kind,
            name: name.to_string(),
            active_record: active_record.to_string(),
            options,
            scope,
            klass,
            foreign_key,
            plural_name,
            automatic_inverse: OnceCell::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn macro_kind(&self) -> MacroKind {
        self.macro_kind
    }

    /// Name of the model this association is declared on
    pub fn active_record(&self) -> &str {
        &self.active_record
    }

    pub fn options(&self) -> &AssociationOptions {
        &self.options
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn is_through(&self) -> bool {
        self.options.through.is_some()
    }

    /// A polymorphic belongs-to, whose target model is read from each owner
    pub fn is_polymorphic(&self) -> bool {
        self.options.polymorphic
    }

    pub fn is_belongs_to(&self) -> bool {
        self.macro_kind == MacroKind::BelongsTo
    }

    pub fn is_collection(&self) -> bool {
        self.macro_kind.is_collection()
    }

    /// Pluralized association name, used to build table aliases
    pub fn plural_name(&self) -> &str {
        &self.plural_name
    }

    pub fn owner_model(&self, schema: &Schema) -> OrmResult<Arc<ModelType>> {
        schema.model(&self.active_record)
    }

    /// The target model
    pub fn klass(&self, schema: &Schema) -> OrmResult<Arc<ModelType>> {
        if let Some(handle) = &self.klass {
            return handle.resolve(schema);
        }
        if self.is_through() {
            return self.source_reflection(schema)?.klass(schema);
        }
        Err(OrmError::Configuration(format!(
            "Polymorphic association '{}#{}' has no static target model",
            self.active_record, self.name
        )))
    }

    pub fn table_name(&self, schema: &Schema) -> OrmResult<String> {
        Ok(self.klass(schema)?.table_name().to_string())
    }

    pub fn foreign_key(&self, schema: &Schema) -> OrmResult<String> {
        if self.is_through() {
            return self.source_reflection(schema)?.foreign_key(schema);
        }
        Ok(self.foreign_key.clone())
    }

    /// Discriminator column of a polymorphic belongs-to
    pub fn foreign_type(&self, schema: &Schema) -> OrmResult<String> {
        if self.is_through() {
            return self.source_reflection(schema)?.foreign_type(schema);
        }
        Ok(self
            .options
            .foreign_type
            .clone()
            .unwrap_or_else(|| format!("{}_type", self.name)))
    }

    /// Type column on the target of an `as:` association
    pub fn type_column(&self, schema: &Schema) -> OrmResult<Option<String>> {
        if self.is_through() {
            return self.source_reflection(schema)?.type_column(schema);
        }
        Ok(self.options.as_.as_ref().map(|interface| format!("{}_type", interface)))
    }

    /// Key column on the target side; `klass` overrides the target of polymorphic associations
    pub fn association_primary_key(&self, schema: &Schema, klass: Option<&ModelType>) -> OrmResult<String> {
        if self.is_through() {
            return self.source_reflection(schema)?.association_primary_key(schema, klass);
        }
        if let Some(primary_key) = &self.options.primary_key {
            return Ok(primary_key.clone());
        }
        match klass {
            Some(klass) => Ok(klass.primary_key().to_string()),
            None => Ok(self.klass(schema)?.primary_key().to_string()),
        }
    }

    /// Key column on the owner side
    pub fn active_record_primary_key(&self, schema: &Schema) -> OrmResult<String> {
        if self.is_through() {
            return self.source_reflection(schema)?.active_record_primary_key(schema);
        }
        if let Some(primary_key) = &self.options.primary_key {
            return Ok(primary_key.clone());
        }
        Ok(self.owner_model(schema)?.primary_key().to_string())
    }

    /// Join table column pointing at the target of a habtm association
    pub fn association_foreign_key(&self, schema: &Schema) -> OrmResult<String> {
        if self.is_through() {
            return self.source_reflection(schema)?.association_foreign_key(schema);
        }
        if let Some(key) = &self.options.association_foreign_key {
            return Ok(key.clone());
        }
        Ok(inflector::foreign_key(self.klass(schema)?.name()))
    }

    /// Join table of a habtm association
    pub fn join_table(&self, schema: &Schema) -> OrmResult<String> {
        if self.is_through() {
            return self.source_reflection(schema)?.join_table(schema);
        }
        if let Some(join_table) = &self.options.join_table {
            return Ok(join_table.clone());
        }
        let owner = self.owner_model(schema)?;
        let klass = self.klass(schema)?;
        Ok(derive_join_table(schema.config(), owner.table_name(), klass.table_name()))
    }

    /// The macro of the association that finally reaches the target
    pub fn source_macro(&self, schema: &Schema) -> OrmResult<MacroKind> {
        if self.is_through() {
            return self.source_reflection(schema)?.source_macro(schema);
        }
        Ok(self.macro_kind)
    }

    pub fn through_reflection(&self, schema: &Schema) -> OrmResult<Arc<Reflection>> {
        let through = self.options.through.as_deref().ok_or_else(|| {
            OrmError::Configuration(format!("'{}#{}' is not a through association", self.active_record, self.name))
        })?;
        let owner = self.owner_model(schema)?;
        schema
            .find_reflection(&owner, through)?
            .ok_or_else(|| OrmError::HasManyThroughAssociationNotFound {
                model: self.active_record.clone(),
                name: self.name.clone(),
                through: through.to_string(),
            })
    }

    /// Candidate names for the source association on the through model
    pub fn source_reflection_names(&self) -> Vec<String> {
        match &self.options.source {
            Some(source) => vec![source.clone()],
            None => {
                let singular = inflector::singularize(&self.name);
                if singular == self.name {
                    vec![singular]
                } else {
                    vec![singular, self.name.clone()]
                }
            }
        }
    }

    pub fn source_reflection(&self, schema: &Schema) -> OrmResult<Arc<Reflection>> {
        let through = self.through_reflection(schema)?;
        if through.is_polymorphic() {
            return Err(self.polymorphic_through_error());
        }
        let through_klass = through.klass(schema)?;

        let names = self.source_reflection_names();
        let mut found = Vec::new();
        for name in &names {
            if let Some(reflection) = schema.find_reflection(&through_klass, name)? {
                found.push(reflection);
            }
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => {
                let available = schema
                    .reflections(&through_klass)?
                    .iter()
                    .map(|r| r.name().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(OrmError::HasManyThroughSourceAssociationNotFound {
                    through_model: through_klass.name().to_string(),
                    candidates: names.join(" or "),
                    available,
                })
            }
            _ => Err(OrmError::AmbiguousSourceReflection {
                model: self.active_record.clone(),
                name: self.name.clone(),
                candidates: names.join(", "),
            }),
        }
    }

    /// The concrete reflections from the target back to the owner
    ///
    /// Position 0 is always this reflection so that source-type information survives.
    pub fn chain(self: &Arc<Self>, schema: &Schema) -> OrmResult<Vec<Arc<Reflection>>> {
        self.chain_at(schema, 0)
    }

    fn chain_at(self: &Arc<Self>, schema: &Schema, depth: usize) -> OrmResult<Vec<Arc<Reflection>>> {
        if !self.is_through() {
            return Ok(vec![Arc::clone(self)]);
        }
        if depth > MAX_CHAIN_DEPTH {
            return Err(self.cyclic_chain_error());
        }
        let mut chain = self.source_reflection(schema)?.chain_at(schema, depth + 1)?;
        chain.extend(self.through_reflection(schema)?.chain_at(schema, depth + 1)?);
        chain[0] = Arc::clone(self);
        Ok(chain)
    }

    /// Scopes applying to each element of [`chain`](Self::chain)
    pub fn conditions(self: &Arc<Self>, schema: &Schema) -> OrmResult<Vec<Vec<Scope>>> {
        self.conditions_at(schema, 0)
    }

    fn conditions_at(self: &Arc<Self>, schema: &Schema, depth: usize) -> OrmResult<Vec<Vec<Scope>>> {
        if !self.is_through() {
            return Ok(vec![self.own_scopes()]);
        }
        if depth > MAX_CHAIN_DEPTH {
            return Err(self.cyclic_chain_error());
        }

        let mut conditions = self.source_reflection(schema)?.conditions_at(schema, depth + 1)?;
        conditions[0].extend(self.own_scopes());

        let mut through_conditions = self.through_reflection(schema)?.conditions_at(schema, depth + 1)?;
        if let Some(source_type) = &self.options.source_type {
            let condition = Condition::eq(self.foreign_type(schema)?, source_type.clone());
            through_conditions[0].push(Scope::conditions(vec![condition]));
        }

        conditions.extend(through_conditions);
        Ok(conditions)
    }

    /// The declared scope plus the `order` option
    pub(crate) fn own_scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self.scope.iter().cloned().collect();
        if !self.options.order.is_empty() {
            let order = self.options.order.clone();
            scopes.push(Scope::new(move || ScopeFragment {
                conditions: Vec::new(),
                order: order.clone(),
            }));
        }
        scopes
    }

    /// Verify a through declaration and an explicit inverse
    pub fn check_validity(&self, schema: &Schema) -> OrmResult<()> {
        self.check_validity_at(schema, 0)
    }

    fn check_validity_at(&self, schema: &Schema, depth: usize) -> OrmResult<()> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(self.cyclic_chain_error());
        }

        if self.is_through() {
            let through = self.through_reflection(schema)?;
            if through.is_polymorphic() {
                return Err(self.polymorphic_through_error());
            }

            let source = self.source_reflection(schema)?;
            let through_model = through.klass(schema)?.name().to_string();

            if self.options.source_type.is_some() && !source.is_polymorphic() {
                return Err(OrmError::HasManyThroughAssociationPointlessSourceType {
                    model: self.active_record.clone(),
                    name: self.name.clone(),
                    through_model,
                    source: source.name().to_string(),
                });
            }
            if source.is_polymorphic() && self.options.source_type.is_none() {
                return Err(OrmError::HasManyThroughAssociationPolymorphicSource {
                    model: self.active_record.clone(),
                    name: self.name.clone(),
                    through_model,
                    source: source.name().to_string(),
                });
            }
            if self.macro_kind == MacroKind::HasOne && through.is_collection() {
                return Err(OrmError::HasOneThroughCantAssociateThroughCollection {
                    model: self.active_record.clone(),
                    name: self.name.clone(),
                    through: through.name().to_string(),
                });
            }

            through.check_validity_at(schema, depth + 1)?;
            source.check_validity_at(schema, depth + 1)?;
        }

        if let InverseOf::Named(_) = self.options.inverse_of {
            if !self.is_polymorphic() {
                self.inverse_of(schema)?;
            }
        }
        Ok(())
    }

    /// The association on the target pointing back at the owner
    ///
    /// An explicitly named inverse that does not exist is an error; automatic
    /// detection that finds nothing yields `None`.
    pub fn inverse_of(&self, schema: &Schema) -> OrmResult<Option<Arc<Reflection>>> {
        let name = match self.inverse_name(schema) {
            Some(name) => name,
            None => return Ok(None),
        };
        let klass = self.klass(schema)?;
        match schema.find_reflection(&klass, &name)? {
            Some(inverse) => Ok(Some(inverse)),
            None => Err(OrmError::InverseOfAssociationNotFound {
                name: self.name.clone(),
                inverse: name,
                model: klass.name().to_string(),
            }),
        }
    }

    /// Inverse of a polymorphic belongs-to, resolved on the actual target model
    pub(crate) fn polymorphic_inverse_of(
        &self,
        schema: &Schema,
        target: &ModelType,
    ) -> OrmResult<Option<Arc<Reflection>>> {
        match &self.options.inverse_of {
            InverseOf::Named(name) => schema
                .find_reflection(target, name)?
                .map(Some)
                .ok_or_else(|| OrmError::InverseOfAssociationNotFound {
                    name: self.name.clone(),
                    inverse: name.clone(),
                    model: target.name().to_string(),
                }),
            InverseOf::Auto | InverseOf::Disabled => Ok(None),
        }
    }

    fn inverse_name(&self, schema: &Schema) -> Option<String> {
        match &self.options.inverse_of {
            InverseOf::Named(name) => Some(name.clone()),
            InverseOf::Disabled => None,
            InverseOf::Auto => {
                if let Some(cached) = self.automatic_inverse.get() {
                    return cached.clone();
                }
                // Not cached while the target model is still undefined
                let detected = self.automatic_inverse_of(schema)?;
                let _ = self.automatic_inverse.set(detected.clone());
                detected
            }
        }
    }

    /// `Some(None)` when there is definitely no inverse, `None` when undecidable yet
    fn automatic_inverse_of(&self, schema: &Schema) -> Option<Option<String>> {
        if !self.can_find_inverse_automatically() {
            return Some(None);
        }
        let klass = self.klass(schema).ok()?;
        let candidate = inflector::underscore(&self.active_record);
        let reflection = match schema.find_reflection(&klass, &candidate) {
            Ok(Some(reflection)) => reflection,
            Ok(None) => return Some(None),
            Err(_) => return None,
        };

        let symmetric = reflection.active_record() == klass.name()
            && reflection
                .active_record_primary_key(schema)
                .map(|key| key == klass.primary_key())
                .unwrap_or(false)
            && reflection.can_find_inverse_automatically();

        if symmetric {
            tracing::trace!(
                "Detected inverse {}#{} for {}#{}",
                klass.name(),
                candidate,
                self.active_record,
                self.name
            );
            Some(Some(candidate))
        } else {
            Some(None)
        }
    }

    fn can_find_inverse_automatically(&self) -> bool {
        self.options.inverse_of != InverseOf::Disabled
            && matches!(
                self.macro_kind,
                MacroKind::HasMany | MacroKind::HasOne | MacroKind::BelongsTo
            )
            && self.scope.is_none()
            && !self.is_through()
            && !self.is_polymorphic()
            && self.options.foreign_key.is_none()
    }

    fn polymorphic_through_error(&self) -> OrmError {
        OrmError::HasManyThroughAssociationPolymorphicThrough {
            model: self.active_record.clone(),
            name: self.name.clone(),
            through: self.options.through.clone().unwrap_or_default(),
        }
    }

    fn cyclic_chain_error(&self) -> OrmError {
        OrmError::Configuration(format!(
            "Through association '{}#{}' forms a cycle",
            self.active_record, self.name
        ))
    }
}

/// Join table name for two (decorated) table names
///
/// The undecorated names are ordered byte-wise, so a name sorts after any of its
/// prefixes, joined with `_` and decorated again.
pub fn derive_join_table(config: &AssociationConfig, first: &str, second: &str) -> String {
    let first = config.undecorate_table_name(first);
    let second = config.undecorate_table_name(second);
    let (low, high) = if first < second { (first, second) } else { (second, first) };
    config.decorate_table_name(&format!("{}_{}", low, high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelBuilder;

    fn blog() -> Schema {
        let schema = Schema::default();
        schema
            .define(
                ModelBuilder::new("Author")
                    .columns(["id", "name"])
                    .has_many("posts", AssociationOptions::new())
                    .has_many("comments", AssociationOptions::new().through("posts"))
                    .has_one("first_post", AssociationOptions::new().class_name("Post").no_inverse()),
            )
            .unwrap();
        schema
            .define(
                ModelBuilder::new("Post")
                    .columns(["id", "author_id", "title"])
                    .belongs_to("author", AssociationOptions::new())
                    .has_many("comments", AssociationOptions::new().as_("commentable"))
                    .has_many("taggings", AssociationOptions::new())
                    .has_many("tags", AssociationOptions::new().through("taggings"))
                    .has_and_belongs_to_many("categories", AssociationOptions::new()),
            )
            .unwrap();
        schema
            .define(
                ModelBuilder::new("Comment")
                    .columns(["id", "commentable_id", "commentable_type", "body"])
                    .belongs_to("commentable", AssociationOptions::new().polymorphic()),
            )
            .unwrap();
        schema
            .define(
                ModelBuilder::new("Tagging")
                    .columns(["id", "post_id", "tag_id"])
                    .belongs_to("post", AssociationOptions::new())
                    .belongs_to("tag", AssociationOptions::new()),
            )
            .unwrap();
        schema
            .define(ModelBuilder::new("Tag").columns(["id", "name"]))
            .unwrap();
        schema
            .define(
                ModelBuilder::new("Category")
                    .columns(["id", "name"])
                    .has_and_belongs_to_many("posts", AssociationOptions::new()),
            )
            .unwrap();
        schema
    }

    fn reflection(schema: &Schema, model: &str, name: &str) -> Arc<Reflection> {
        let model = schema.model(model).unwrap();
        schema.reflect_on_association(&model, name).unwrap()
    }

    #[test]
    fn test_foreign_key_derivation() {
        let schema = blog();
        assert_eq!(reflection(&schema, "Post", "author").foreign_key(&schema).unwrap(), "author_id");
        assert_eq!(reflection(&schema, "Author", "posts").foreign_key(&schema).unwrap(), "author_id");
        assert_eq!(
            reflection(&schema, "Post", "comments").foreign_key(&schema).unwrap(),
            "commentable_id"
        );
        assert_eq!(
            reflection(&schema, "Post", "comments").type_column(&schema).unwrap().as_deref(),
            Some("commentable_type")
        );
    }

    #[test]
    fn test_join_table_ordering() {
        let config = AssociationConfig::default();
        assert_eq!(derive_join_table(&config, "posts", "categories"), "categories_posts");
        assert_eq!(derive_join_table(&config, "paper_boxes", "papers"), "paper_boxes_papers");
        assert_eq!(derive_join_table(&config, "papers", "paper"), "paper_papers");

        let schema = blog();
        let categories = reflection(&schema, "Post", "categories");
        assert_eq!(categories.join_table(&schema).unwrap(), "categories_posts");
        assert_eq!(categories.association_foreign_key(&schema).unwrap(), "category_id");
        assert_eq!(categories.foreign_key(&schema).unwrap(), "post_id");
    }

    #[test]
    fn test_join_table_keeps_decoration() {
        let config = AssociationConfig::default().with_table_name_prefix("app_");
        assert_eq!(
            derive_join_table(&config, "app_posts", "app_categories"),
            "app_categories_posts"
        );
    }

    #[test]
    fn test_through_delegates_keys_to_source() {
        let schema = blog();
        let tags = reflection(&schema, "Post", "tags");
        let source = tags.source_reflection(&schema).unwrap();
        assert_eq!(source.name(), "tag");
        assert_eq!(tags.foreign_key(&schema).unwrap(), "tag_id");
        assert_eq!(tags.source_macro(&schema).unwrap(), MacroKind::BelongsTo);
        assert_eq!(tags.klass(&schema).unwrap().name(), "Tag");
    }

    #[test]
    fn test_chain_replaces_head_with_self() {
        let schema = blog();
        let tags = reflection(&schema, "Post", "tags");
        let chain = tags.chain(&schema).unwrap();
        let names: Vec<_> = chain.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["tags", "taggings"]);
        assert!(Arc::ptr_eq(&chain[0], &tags));

        let comments = reflection(&schema, "Author", "comments");
        assert_eq!(comments.chain(&schema).unwrap().len(), 2);
        assert_eq!(comments.conditions(&schema).unwrap().len(), 2);
    }

    #[test]
    fn test_automatic_inverse() {
        let schema = blog();
        let posts = reflection(&schema, "Author", "posts");
        let inverse = posts.inverse_of(&schema).unwrap().unwrap();
        assert_eq!(inverse.name(), "author");

        // belongs_to :author finds no `post` association on Author
        let author = reflection(&schema, "Post", "author");
        assert!(author.inverse_of(&schema).unwrap().is_none());

        // disabled explicitly
        let first_post = reflection(&schema, "Author", "first_post");
        assert!(first_post.inverse_of(&schema).unwrap().is_none());

        // polymorphic `as:` targets have no conventional inverse
        let comments = reflection(&schema, "Post", "comments");
        assert!(comments.inverse_of(&schema).unwrap().is_none());
    }

    #[test]
    fn test_missing_explicit_inverse_fails_validation() {
        let schema = blog();
        schema
            .define(
                ModelBuilder::new("Publisher")
                    .has_many("books", AssociationOptions::new().class_name("Post").inverse_of("publisher")),
            )
            .unwrap();
        let books = reflection(&schema, "Publisher", "books");
        let err = books.check_validity(&schema).unwrap_err();
        assert!(matches!(err, OrmError::InverseOfAssociationNotFound { .. }));
    }

    #[test]
    fn test_validity_errors() {
        let schema = blog();
        schema
            .define(
                ModelBuilder::new("Reader")
                    .has_many("posts", AssociationOptions::new())
                    .has_many("missing", AssociationOptions::new().through("nothing"))
                    .has_many("wrong", AssociationOptions::new().through("posts").source("nope"))
                    .has_one("one_tag", AssociationOptions::new().through("posts").source("tags"))
                    .has_many("typed", AssociationOptions::new().through("posts").source("author").source_type("Author")),
            )
            .unwrap();

        let err = reflection(&schema, "Reader", "missing").check_validity(&schema).unwrap_err();
        assert!(matches!(err, OrmError::HasManyThroughAssociationNotFound { .. }));

        let err = reflection(&schema, "Reader", "wrong").check_validity(&schema).unwrap_err();
        assert!(matches!(err, OrmError::HasManyThroughSourceAssociationNotFound { .. }));

        let err = reflection(&schema, "Reader", "one_tag").check_validity(&schema).unwrap_err();
        assert!(matches!(err, OrmError::HasOneThroughCantAssociateThroughCollection { .. }));

        let err = reflection(&schema, "Reader", "typed").check_validity(&schema).unwrap_err();
        assert!(matches!(err, OrmError::HasManyThroughAssociationPointlessSourceType { .. }));
    }

    #[test]
    fn test_polymorphic_source_requires_source_type() {
        let schema = blog();
        schema
            .define(
                ModelBuilder::new("Moderator")
                    .has_many("comments", AssociationOptions::new())
                    .has_many("commentables", AssociationOptions::new().through("comments"))
                    .has_many(
                        "commented_posts",
                        AssociationOptions::new()
                            .through("comments")
                            .source("commentable")
                            .source_type("Post"),
                    ),
            )
            .unwrap();

        let err = reflection(&schema, "Moderator", "commentables")
            .check_validity(&schema)
            .unwrap_err();
        assert!(matches!(err, OrmError::HasManyThroughAssociationPolymorphicSource { .. }));

        let typed = reflection(&schema, "Moderator", "commented_posts");
        typed.check_validity(&schema).unwrap();
        assert_eq!(typed.klass(&schema).unwrap().name(), "Post");
        let conditions = typed.conditions(&schema).unwrap();
        let fragment = conditions[1][0].evaluate(None, "commented_posts").unwrap();
        assert_eq!(fragment.conditions, vec![Condition::eq("commentable_type", "Post")]);
    }

    #[test]
    fn test_ambiguous_source() {
        let schema = blog();
        schema
            .define(
                ModelBuilder::new("Shelf")
                    .has_many("slots", AssociationOptions::new())
                    .has_many("books", AssociationOptions::new().through("slots")),
            )
            .unwrap();
        schema
            .define(
                ModelBuilder::new("Slot")
                    .belongs_to("book", AssociationOptions::new())
                    .has_many("books", AssociationOptions::new()),
            )
            .unwrap();
        let err = reflection(&schema, "Shelf", "books").check_validity(&schema).unwrap_err();
        assert!(matches!(err, OrmError::AmbiguousSourceReflection { .. }));
    }
}
