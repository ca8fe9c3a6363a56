//! Kind-dispatching tree service.
//!
//! # Responsibility
//! - Expose create/read/patch/delete for every `EntityKind` through one
//!   operation family.
//! - Validate payloads against the static kind descriptors before any
//!   repository write.
//! - Enforce the descriptor rules: one parentless `root` per tree, and
//!   enum-named property kinds linked to that enum.
//!
//! # Invariants
//! - `get_by_id` reports absence as `Ok(None)`, never as an error.
//! - `patch` never changes `id` or structural links.
//! - Cascades belong to storage; this layer only forwards deletes.

use crate::model::kind::{EntityKind, KindRule};
use crate::model::record::{validate_create, FieldValue, Payload, Record, RowId, ValidationError};
use crate::model::rows::{is_primitive_kind, EnumMemberRow, EnumView};
use crate::model::ROOT_NODE_NAME;
use crate::repo::kind_repo::{KindRepoError, KindRepository};
use crate::service::resolver::ReferenceResolver;
use log::{debug, info};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from tree service operations.
#[derive(Debug)]
pub enum TreeServiceError {
    /// Payload does not satisfy the kind's schema.
    Validation(ValidationError),
    /// Target row does not exist.
    NotFound { kind: EntityKind, id: RowId },
    /// Storage transport or transaction failure, cause preserved.
    Storage(KindRepoError),
}

impl Display for TreeServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
        }
    }
}

impl Error for TreeServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<ValidationError> for TreeServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<KindRepoError> for TreeServiceError {
    fn from(value: KindRepoError) -> Self {
        match value {
            KindRepoError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Storage(other),
        }
    }
}

pub type TreeServiceResult<T> = Result<T, TreeServiceError>;

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    /// `batch_has_root`: an earlier payload of the same batch is a root.
    Create { batch_has_root: bool },
    Patch,
}

/// Tree service facade over one repository handle.
pub struct TreeService<R: KindRepository> {
    repo: R,
}

impl<R: KindRepository> TreeService<R> {
    /// Creates service from repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Validates and inserts one row; returns its id.
    pub fn create(&self, kind: EntityKind, payload: &Payload) -> TreeServiceResult<RowId> {
        let mut values = validate_create(kind, payload)?;
        self.enforce_rules(
            kind,
            &mut values,
            WriteMode::Create {
                batch_has_root: false,
            },
        )?;
        let id = self.repo.insert(kind, &values)?;
        debug!("event=row_create module=tree status=ok kind={kind} id={id}");
        Ok(id)
    }

    /// Validates every payload, then inserts all of them atomically.
    ///
    /// Nothing is written when any payload is invalid.
    pub fn create_many(
        &self,
        kind: EntityKind,
        payloads: &[Payload],
    ) -> TreeServiceResult<Vec<RowId>> {
        let mut rows = Vec::with_capacity(payloads.len());
        let mut batch_has_root = false;
        for payload in payloads {
            let mut values = validate_create(kind, payload)?;
            batch_has_root |= self.enforce_rules(
                kind,
                &mut values,
                WriteMode::Create { batch_has_root },
            )?;
            rows.push(values);
        }
        let ids = self.repo.insert_many(kind, &rows)?;
        debug!(
            "event=row_create_many module=tree status=ok kind={kind} count={}",
            ids.len()
        );
        Ok(ids)
    }

    /// All rows of a kind in insertion order.
    pub fn get_all(&self, kind: EntityKind) -> TreeServiceResult<Vec<Record>> {
        Ok(self.repo.get_all(kind)?)
    }

    pub fn get_by_id(&self, kind: EntityKind, id: RowId) -> TreeServiceResult<Option<Record>> {
        Ok(self.repo.get_by_id(kind, id)?)
    }

    /// Rows whose `field` equals `value`, in insertion order.
    pub fn find_by(
        &self,
        kind: EntityKind,
        field: &str,
        value: &FieldValue,
    ) -> TreeServiceResult<Vec<Record>> {
        Ok(self.repo.find_by_field(kind, field, value)?)
    }

    /// Rows attached to `owner_id` through the kind's owner field,
    /// e.g. the TypeData of one Type.
    ///
    /// Kinds without an owner resolve against their tree parent instead.
    pub fn list_attached(
        &self,
        kind: EntityKind,
        owner_id: RowId,
    ) -> TreeServiceResult<Vec<Record>> {
        let descriptor = kind.descriptor();
        let field = descriptor
            .owner
            .map(|(field, _)| field)
            .or(descriptor.tree_parent)
            .ok_or_else(|| {
                TreeServiceError::Validation(ValidationError::UnknownField {
                    kind,
                    field: "owner".to_string(),
                })
            })?;
        self.find_by(kind, field, &FieldValue::Integer(owner_id))
    }

    /// Shallow-merges `changes` onto the stored row and persists the result.
    pub fn patch(
        &self,
        kind: EntityKind,
        id: RowId,
        changes: &Payload,
    ) -> TreeServiceResult<Record> {
        let existing = self
            .repo
            .get_by_id(kind, id)?
            .ok_or(TreeServiceError::NotFound { kind, id })?;
        let mut merged = existing.overlay(changes)?;
        self.enforce_rules(kind, merged.values_mut(), WriteMode::Patch)?;
        self.repo.update(&merged)?;
        info!(
            "event=row_patch module=tree status=ok kind={kind} id={id} fields={}",
            changes.len()
        );
        Ok(merged)
    }

    /// Deletes one row with cascade; returns how many rows were removed.
    pub fn delete_by_id(&self, kind: EntityKind, id: RowId) -> TreeServiceResult<u64> {
        let removed = self.repo.delete_by_id(kind, id)?;
        info!("event=row_delete module=tree status=ok kind={kind} id={id} removed={removed}");
        Ok(removed)
    }

    /// Deletes every row of a kind with cascade.
    pub fn delete_all(&self, kind: EntityKind) -> TreeServiceResult<u64> {
        let removed = self.repo.delete_all(kind)?;
        info!("event=kind_wipe module=tree status=ok kind={kind} removed={removed}");
        Ok(removed)
    }

    /// Enums with their members, both in insertion order.
    pub fn list_enums(&self) -> TreeServiceResult<Vec<EnumView>> {
        let mut members_by_enum: BTreeMap<RowId, Vec<EnumMemberRow>> = BTreeMap::new();
        for record in self.repo.get_all(EntityKind::EnumMember)? {
            let member = EnumMemberRow::try_from(&record)?;
            members_by_enum.entry(member.enum_id).or_default().push(member);
        }

        self.repo
            .get_all(EntityKind::Enum)?
            .into_iter()
            .map(|record| -> TreeServiceResult<EnumView> {
                let name = record
                    .text("name")
                    .ok_or(ValidationError::MissingField {
                        kind: EntityKind::Enum,
                        field: "name",
                    })?
                    .to_string();
                Ok(EnumView {
                    id: record.id,
                    name,
                    members: members_by_enum.remove(&record.id).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Applies the kind's descriptor rules to validated values, filling in
    /// derivable links. Returns whether the row is a tree root.
    fn enforce_rules(
        &self,
        kind: EntityKind,
        values: &mut [FieldValue],
        mode: WriteMode,
    ) -> TreeServiceResult<bool> {
        let mut is_root = false;
        for rule in kind.descriptor().rules {
            match *rule {
                KindRule::SingleRoot => is_root = self.check_single_root(kind, values, mode)?,
                KindRule::EnumLink {
                    kind_field,
                    enum_field,
                } => self.link_enum(kind, values, kind_field, enum_field)?,
            }
        }
        Ok(is_root)
    }

    fn check_single_root(
        &self,
        kind: EntityKind,
        values: &[FieldValue],
        mode: WriteMode,
    ) -> TreeServiceResult<bool> {
        let Some(parent_field) = kind.descriptor().tree_parent else {
            return Ok(false);
        };
        if !values[field_slot(kind, parent_field)?].is_null() {
            return Ok(false);
        }

        let name = values[field_slot(kind, "name")?].as_text().unwrap_or_default();
        if name != ROOT_NODE_NAME {
            return Err(ValidationError::DetachedNode {
                kind,
                name: name.to_string(),
            }
            .into());
        }
        if let WriteMode::Create { batch_has_root } = mode {
            let existing = self.find_by(kind, parent_field, &FieldValue::Null)?;
            if batch_has_root || !existing.is_empty() {
                return Err(ValidationError::DuplicateRoot(kind).into());
            }
        }
        Ok(true)
    }

    fn link_enum(
        &self,
        kind: EntityKind,
        values: &mut [FieldValue],
        kind_field: &str,
        enum_field: &str,
    ) -> TreeServiceResult<()> {
        let enum_slot = field_slot(kind, enum_field)?;
        let declared = values[field_slot(kind, kind_field)?]
            .as_text()
            .unwrap_or_default()
            .to_string();
        let enum_id = values[enum_slot].as_integer();

        let expected = if is_primitive_kind(&declared) {
            None
        } else {
            ReferenceResolver::new(self).resolve_enum_id(&declared)?
        };
        match (enum_id, expected) {
            (None, Some(expected)) => {
                debug!(
                    "event=enum_link module=tree status=ok kind={kind} declared={declared} enum_id={expected}"
                );
                values[enum_slot] = FieldValue::Integer(expected);
                Ok(())
            }
            // An unknown enum name stays unlinked; the loader reports it.
            (None, None) => Ok(()),
            (Some(given), Some(expected)) if given == expected => Ok(()),
            (Some(_), expected) => Err(ValidationError::EnumLinkMismatch {
                declared,
                enum_id,
                expected,
            }
            .into()),
        }
    }
}

fn field_slot(kind: EntityKind, field: &str) -> Result<usize, ValidationError> {
    kind.descriptor()
        .field(field)
        .map(|(index, _)| index)
        .ok_or_else(|| ValidationError::UnknownField {
            kind,
            field: field.to_string(),
        })
}
