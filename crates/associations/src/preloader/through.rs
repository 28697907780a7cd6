//! Preloading through an intermediate association
//!
//! The through association is loaded on the owners first, then the source association
//! on the through records; each owner collects the source targets of its own through
//! records. Scoped lookups on either side are fetched without caching them on the
//! intermediate records.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::OrmResult;
use crate::query::Condition;
use crate::record::{unique_records, unique_records_by_value, Record};
use crate::reflection::{Reflection, Scope};

use super::Preloader;

impl Preloader<'_> {
    pub(super) async fn through_records_by_owner(
        &self,
        reflection: &Arc<Reflection>,
        owners: &[Record],
        preload_scope: &[Scope],
    ) -> OrmResult<Vec<Vec<Record>>> {
        let schema = self.schema;
        let through = reflection.through_reflection(schema)?;
        let source = reflection.source_reflection(schema)?;
        let source_type = reflection.options().source_type.clone();

        // Only the through records of the requested type are loaded
        let through_scope = match &source_type {
            Some(source_type) => vec![Scope::conditions(vec![Condition::eq(
                reflection.foreign_type(schema)?,
                source_type.clone(),
            )])],
            None => Vec::new(),
        };
        let through_records_by_owner = self.targets_for(owners, through.name(), &through_scope).await?;

        let through_records = unique_records(through_records_by_owner.iter().flatten().cloned());
        let mut source_scope = reflection.own_scopes();
        source_scope.extend(preload_scope.iter().cloned());
        let source_targets = self
            .targets_for(&through_records, source.name(), &source_scope)
            .await?;
        let source_targets: HashMap<usize, Vec<Record>> = through_records
            .iter()
            .map(Record::identity)
            .zip(source_targets)
            .collect();

        let records_by_owner = through_records_by_owner
            .into_iter()
            .map(|through_records| {
                let targets = through_records
                    .iter()
                    .filter_map(|through_record| source_targets.get(&through_record.identity()))
                    .flatten()
                    .filter(|target| match &source_type {
                        Some(source_type) => schema.is_a(target.model(), source_type),
                        None => true,
                    })
                    .cloned();
                unique_records_by_value(targets)
            })
            .collect();

        tracing::trace!(
            "Preloaded {}#{} through {} for {} owner(s)",
            reflection.active_record(),
            reflection.name(),
            through.name(),
            owners.len()
        );
        Ok(records_by_owner)
    }
}
