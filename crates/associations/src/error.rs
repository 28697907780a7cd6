//! Error types for the association engine
//!
//! Configuration errors describe a mistake in a static association declaration and are
//! never retried; runtime errors come from the query executor or from invalid
//! assignments.

/// Result type alias for association operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for association declaration, loading and assignment
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrmError {
    /// Association name does not resolve on the model
    #[error("Association named '{name}' was not found on {model}; perhaps you misspelled it?")]
    AssociationNotFound { model: String, name: String },

    /// Model name does not resolve in the schema
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("Could not find the association '{through}' in model {model} (used by {model}#{name})")]
    HasManyThroughAssociationNotFound {
        model: String,
        name: String,
        through: String,
    },

    #[error("Cannot have a has_many :through association '{model}#{name}' on the polymorphic object '{through}'")]
    HasManyThroughAssociationPolymorphicThrough {
        model: String,
        name: String,
        through: String,
    },

    #[error("Could not find the source association(s) {candidates} in model {through_model}. Try `source` with one of {available}")]
    HasManyThroughSourceAssociationNotFound {
        through_model: String,
        candidates: String,
        available: String,
    },

    #[error("Ambiguous source reflection for through association '{model}#{name}': {candidates}. Specify `source`")]
    AmbiguousSourceReflection {
        model: String,
        name: String,
        candidates: String,
    },

    #[error("Cannot have a has_many :through association '{model}#{name}' with a source_type option if '{through_model}#{source}' is not polymorphic")]
    HasManyThroughAssociationPointlessSourceType {
        model: String,
        name: String,
        through_model: String,
        r#source: String,
    },

    #[error("Cannot have a has_many :through association '{model}#{name}' on the polymorphic object '{through_model}#{source}' without source_type")]
    HasManyThroughAssociationPolymorphicSource {
        model: String,
        name: String,
        through_model: String,
        r#source: String,
    },

    #[error("Cannot have a has_one :through association '{model}#{name}' where the through association '{model}#{through}' is a collection")]
    HasOneThroughCantAssociateThroughCollection {
        model: String,
        name: String,
        through: String,
    },

    #[error("Cannot modify association '{model}#{name}' because the source reflection '{source}' is not a belongs_to on a has_many join model")]
    HasManyThroughCantAssociateThroughHasOneOrManyReflection {
        model: String,
        name: String,
        r#source: String,
    },

    /// Polymorphic belongs-to associations have no statically known table to join
    #[error("Cannot eagerly load the polymorphic association '{0}'")]
    EagerLoadPolymorphic(String),

    #[error("Could not find the inverse association for {name} ({inverse} in {model})")]
    InverseOfAssociationNotFound {
        name: String,
        inverse: String,
        model: String,
    },

    /// Owner-dependent scopes can only be evaluated against a single owner
    #[error("The association scope '{0}' is instance dependent and cannot be eagerly loaded")]
    InstanceDependentScope(String),

    /// Any other invalid declaration
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{expected} expected, got {actual}")]
    AssociationTypeMismatch { expected: String, actual: String },

    /// Primary key is missing or null where one is required
    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,

    /// Invalid query plan
    #[error("Query error: {0}")]
    Query(String),

    /// Failure reported by the query executor
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation the executor cannot perform
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Callback vetoed an association change
    #[error("Callback aborted: {0}")]
    CallbackAborted(String),
}

impl OrmError {
    /// Returns true for errors caused by a static declaration mistake
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OrmError::AssociationNotFound { .. }
                | OrmError::UnknownModel(_)
                | OrmError::HasManyThroughAssociationNotFound { .. }
                | OrmError::HasManyThroughAssociationPolymorphicThrough { .. }
                | OrmError::HasManyThroughSourceAssociationNotFound { .. }
                | OrmError::AmbiguousSourceReflection { .. }
                | OrmError::HasManyThroughAssociationPointlessSourceType { .. }
                | OrmError::HasManyThroughAssociationPolymorphicSource { .. }
                | OrmError::HasOneThroughCantAssociateThroughCollection { .. }
                | OrmError::HasManyThroughCantAssociateThroughHasOneOrManyReflection { .. }
                | OrmError::EagerLoadPolymorphic(_)
                | OrmError::InverseOfAssociationNotFound { .. }
                | OrmError::InstanceDependentScope(_)
                | OrmError::Configuration(_)
        )
    }

    pub(crate) fn association_not_found(model: &str, name: &str) -> Self {
        OrmError::AssociationNotFound {
            model: model.to_string(),
            name: name.to_string(),
        }
    }
}

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        OrmError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}
