//! Hooks fired around explicit collection changes
//!
//! Preloading and join-based eager loading never fire these; they only run when an
//! association is changed through [`AssociationHandle::replace`](super::AssociationHandle::replace).

use crate::error::OrmResult;
use crate::record::Record;

/// Before/after hooks for records added to or removed from a collection
///
/// Returning an error from a `before_*` hook aborts the change before anything is
/// written.
pub trait AssociationCallback: Send + Sync {
    fn before_add(&self, _owner: &Record, _record: &Record) -> OrmResult<()> {
        Ok(())
    }

    fn after_add(&self, _owner: &Record, _record: &Record) -> OrmResult<()> {
        Ok(())
    }

    fn before_remove(&self, _owner: &Record, _record: &Record) -> OrmResult<()> {
        Ok(())
    }

    fn after_remove(&self, _owner: &Record, _record: &Record) -> OrmResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackKind {
    BeforeAdd,
    AfterAdd,
    BeforeRemove,
    AfterRemove,
}

pub(crate) fn fire(
    callbacks: &crate::reflection::Callbacks,
    kind: CallbackKind,
    owner: &Record,
    record: &Record,
) -> OrmResult<()> {
    for callback in callbacks.iter() {
        match kind {
            CallbackKind::BeforeAdd => callback.before_add(owner, record)?,
            CallbackKind::AfterAdd => callback.after_add(owner, record)?,
            CallbackKind::BeforeRemove => callback.before_remove(owner, record)?,
            CallbackKind::AfterRemove => callback.after_remove(owner, record)?,
        }
    }
    Ok(())
}
