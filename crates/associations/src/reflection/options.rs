//! Association declaration options and scopes

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::association::AssociationCallback;
use crate::error::{OrmError, OrmResult};
use crate::query::{Condition, OrderDirection};
use crate::record::Record;

/// The kind of a declared association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroKind {
    BelongsTo,
    HasOne,
    HasMany,
    HasAndBelongsToMany,
}

impl MacroKind {
    pub fn is_collection(self) -> bool {
        matches!(self, MacroKind::HasMany | MacroKind::HasAndBelongsToMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MacroKind::BelongsTo => "belongs_to",
            MacroKind::HasOne => "has_one",
            MacroKind::HasMany => "has_many",
            MacroKind::HasAndBelongsToMany => "has_and_belongs_to_many",
        }
    }
}

impl fmt::Display for MacroKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the inverse of an association is found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InverseOf {
    /// Derive it by naming convention when no disqualifying option is present
    #[default]
    Auto,
    /// Never wire an inverse
    Disabled,
    /// Use the named association on the target model
    Named(String),
}

/// Conditions and ordering contributed by a scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFragment {
    pub conditions: Vec<Condition>,
    pub order: Vec<(String, OrderDirection)>,
}

impl ScopeFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn merge(&mut self, other: ScopeFragment) {
        self.conditions.extend(other.conditions);
        for order in other.order {
            if !self.order.contains(&order) {
                self.order.push(order);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.order.is_empty()
    }
}

type StaticScopeFn = dyn Fn() -> ScopeFragment + Send + Sync;
type InstanceScopeFn = dyn Fn(&Record) -> ScopeFragment + Send + Sync;

/// A closure-typed association scope
///
/// Static scopes can be applied to any number of owners at once. Instance scopes read
/// the owner record and can therefore only be used when loading a single association.
#[derive(Clone)]
pub enum Scope {
    Static(Arc<StaticScopeFn>),
    Instance(Arc<InstanceScopeFn>),
}

impl Scope {
    pub fn new<F>(scope: F) -> Self
    where
        F: Fn() -> ScopeFragment + Send + Sync + 'static,
    {
        Scope::Static(Arc::new(scope))
    }

    pub fn instance<F>(scope: F) -> Self
    where
        F: Fn(&Record) -> ScopeFragment + Send + Sync + 'static,
    {
        Scope::Instance(Arc::new(scope))
    }

    /// A static scope made of fixed conditions
    pub fn conditions(conditions: Vec<Condition>) -> Self {
        Scope::new(move || ScopeFragment {
            conditions: conditions.clone(),
            order: Vec::new(),
        })
    }

    pub fn is_instance_dependent(&self) -> bool {
        matches!(self, Scope::Instance(_))
    }

    /// Evaluate the scope; instance scopes need an owner
    pub fn evaluate(&self, owner: Option<&Record>, association: &str) -> OrmResult<ScopeFragment> {
        match (self, owner) {
            (Scope::Static(scope), _) => Ok(scope()),
            (Scope::Instance(scope), Some(owner)) => Ok(scope(owner)),
            (Scope::Instance(_), None) => Err(OrmError::InstanceDependentScope(association.to_string())),
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Static(_) => f.write_str("Scope::Static"),
            Scope::Instance(_) => f.write_str("Scope::Instance"),
        }
    }
}

/// Callbacks fired around collection changes
#[derive(Clone, Default)]
pub struct Callbacks(pub(crate) Vec<Arc<dyn AssociationCallback>>);

impl Callbacks {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AssociationCallback>> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callbacks({})", self.0.len())
    }
}

/// Options accepted by association declarations
#[derive(Debug, Clone, Default)]
pub struct AssociationOptions {
    pub class_name: Option<String>,
    pub foreign_key: Option<String>,
    pub primary_key: Option<String>,
    pub foreign_type: Option<String>,
    pub polymorphic: bool,
    pub as_: Option<String>,
    pub through: Option<String>,
    pub source: Option<String>,
    pub source_type: Option<String>,
    pub inverse_of: InverseOf,
    pub join_table: Option<String>,
    pub association_foreign_key: Option<String>,
    pub scope: Option<Scope>,
    pub order: Vec<(String, OrderDirection)>,
    pub callbacks: Callbacks,
}

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = Some(foreign_key.into());
        self
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key.into());
        self
    }

    pub fn foreign_type(mut self, foreign_type: impl Into<String>) -> Self {
        self.foreign_type = Some(foreign_type.into());
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    /// The polymorphic interface name on the target (`as: :commentable`)
    pub fn as_(mut self, interface: impl Into<String>) -> Self {
        self.as_ = Some(interface.into());
        self
    }

    pub fn through(mut self, through: impl Into<String>) -> Self {
        self.through = Some(through.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn inverse_of(mut self, inverse: impl Into<String>) -> Self {
        self.inverse_of = InverseOf::Named(inverse.into());
        self
    }

    pub fn no_inverse(mut self) -> Self {
        self.inverse_of = InverseOf::Disabled;
        self
    }

    pub fn join_table(mut self, join_table: impl Into<String>) -> Self {
        self.join_table = Some(join_table.into());
        self
    }

    pub fn association_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.association_foreign_key = Some(key.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn callback(mut self, callback: Arc<dyn AssociationCallback>) -> Self {
        self.callbacks.0.push(callback);
        self
    }

    /// Reject options that make no sense for `kind`
    pub(crate) fn validate(&self, kind: MacroKind, owner: &str, name: &str) -> OrmResult<()> {
        let mut invalid = Vec::new();
        let mut check = |present: bool, option: &str, allowed: bool| {
            if present && !allowed {
                invalid.push(option.to_string());
            }
        };

        let belongs_to = kind == MacroKind::BelongsTo;
        let habtm = kind == MacroKind::HasAndBelongsToMany;
        let has = matches!(kind, MacroKind::HasOne | MacroKind::HasMany);

        check(self.polymorphic, "polymorphic", belongs_to);
        check(self.foreign_type.is_some(), "foreign_type", belongs_to);
        check(self.as_.is_some(), "as", has);
        check(self.through.is_some(), "through", has);
        check(self.source.is_some(), "source", has);
        check(self.source_type.is_some(), "source_type", has);
        check(self.join_table.is_some(), "join_table", habtm);
        check(self.association_foreign_key.is_some(), "association_foreign_key", habtm);
        check(!self.order.is_empty(), "order", !belongs_to);
        check(!self.callbacks.is_empty(), "callbacks", kind.is_collection());

        if !invalid.is_empty() {
            return Err(OrmError::Configuration(format!(
                "Unknown option(s) for {} '{}#{}': {}",
                kind,
                owner,
                name,
                invalid.join(", ")
            )));
        }

        if self.through.as_deref() == Some(name) {
            return Err(OrmError::Configuration(format!(
                "Association '{}#{}' cannot go through itself",
                owner, name
            )));
        }
        if self.source.is_some() && self.through.is_none() {
            return Err(OrmError::Configuration(format!(
                "Association '{}#{}' declares a source without a through association",
                owner, name
            )));
        }
        if self.polymorphic && self.class_name.is_some() {
            return Err(OrmError::Configuration(format!(
                "Polymorphic association '{}#{}' cannot declare a class name",
                owner, name
            )));
        }

        Ok(())
    }
}
