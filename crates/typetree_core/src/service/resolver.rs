//! Name-to-id resolution for types and enums.
//!
//! # Invariants
//! - Lookup spans every row of the kind, not a subtree.
//! - Names are assumed unique per kind; storage does not enforce it, so the
//!   lowest id wins when several rows share a name.

use crate::model::kind::EntityKind;
use crate::model::record::{FieldValue, RowId};
use crate::repo::kind_repo::KindRepository;
use crate::service::tree_service::{TreeService, TreeServiceResult};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// A human-authored name that matched no row.
///
/// Non-fatal: the caller stores a null foreign key and logs this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceError {
    pub kind: EntityKind,
    pub name: String,
}

impl Display for ReferenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "no {} named `{}`", self.kind, self.name)
    }
}

impl Error for ReferenceError {}

/// Resolves type and enum names through a tree service.
pub struct ReferenceResolver<'s, R: KindRepository> {
    service: &'s TreeService<R>,
}

impl<'s, R: KindRepository> ReferenceResolver<'s, R> {
    pub fn new(service: &'s TreeService<R>) -> Self {
        Self { service }
    }

    /// Id of the first Type named `name`, or `None` when unresolved.
    pub fn resolve_type_id(&self, name: &str) -> TreeServiceResult<Option<RowId>> {
        self.resolve(EntityKind::Type, name)
    }

    /// Id of the first Enum named `name`, or `None` when unresolved.
    pub fn resolve_enum_id(&self, name: &str) -> TreeServiceResult<Option<RowId>> {
        self.resolve(EntityKind::Enum, name)
    }

    /// Like `resolve`, but turns a miss into a `ReferenceError`.
    pub fn require(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> TreeServiceResult<Result<RowId, ReferenceError>> {
        Ok(self.resolve(kind, name)?.ok_or_else(|| ReferenceError {
            kind,
            name: name.to_string(),
        }))
    }

    fn resolve(&self, kind: EntityKind, name: &str) -> TreeServiceResult<Option<RowId>> {
        let matches = self
            .service
            .find_by(kind, "name", &FieldValue::Text(name.to_string()))?;
        Ok(matches.first().map(|record| record.id))
    }
}
