//! Typed read models over generic records.
//!
//! Consumers that need named fields (resolver, loader, view model, HTTP
//! projections) convert a `Record` once instead of probing it by name.

use super::kind::EntityKind;
use super::record::{Record, RowId, ValidationError};
use serde::Serialize;

/// Declared kinds that are not enum names.
pub const PRIMITIVE_KINDS: [&str; 4] = ["boolean", "number", "percent", "text"];

/// Returns whether `kind` is a primitive property tag.
pub fn is_primitive_kind(kind: &str) -> bool {
    PRIMITIVE_KINDS.contains(&kind)
}

fn expect_kind(record: &Record, expected: EntityKind) -> Result<(), ValidationError> {
    if record.kind != expected {
        return Err(ValidationError::KindMismatch {
            expected,
            actual: record.kind,
        });
    }
    Ok(())
}

fn required_text(record: &Record, field: &'static str) -> Result<String, ValidationError> {
    record
        .text(field)
        .map(str::to_string)
        .ok_or(ValidationError::MissingField {
            kind: record.kind,
            field,
        })
}

fn required_integer(record: &Record, field: &'static str) -> Result<i64, ValidationError> {
    record.integer(field).ok_or(ValidationError::MissingField {
        kind: record.kind,
        field,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumMemberRow {
    pub id: RowId,
    pub enum_id: RowId,
    pub name: String,
    pub value: i64,
}

impl TryFrom<&Record> for EnumMemberRow {
    type Error = ValidationError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        expect_kind(record, EntityKind::EnumMember)?;
        Ok(Self {
            id: record.id,
            enum_id: required_integer(record, "enumId")?,
            name: required_text(record, "name")?,
            value: required_integer(record, "value")?,
        })
    }
}

/// Enum with its members, as served by the `enums` projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumView {
    pub id: RowId,
    pub name: String,
    pub members: Vec<EnumMemberRow>,
}

impl EnumView {
    /// Member whose value equals `value`.
    pub fn member_for(&self, value: f64) -> Option<&EnumMemberRow> {
        self.members
            .iter()
            .find(|member| member.value as f64 == value)
    }
}

/// Type or Instance tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    pub id: RowId,
    pub name: String,
    pub parent_id: Option<RowId>,
    /// Always `None` for Type nodes.
    pub type_id: Option<RowId>,
}

impl TryFrom<&Record> for NodeRow {
    type Error = ValidationError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        if !matches!(record.kind, EntityKind::Type | EntityKind::Instance) {
            return Err(ValidationError::KindMismatch {
                expected: EntityKind::Instance,
                actual: record.kind,
            });
        }
        Ok(Self {
            id: record.id,
            name: required_text(record, "name")?,
            parent_id: record.integer("parentId"),
            type_id: record.integer("typeId"),
        })
    }
}

/// Property definition attached to a Type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDataRow {
    pub id: RowId,
    pub type_id: RowId,
    pub name: String,
    pub kind: String,
    pub enum_id: Option<RowId>,
}

impl TryFrom<&Record> for TypeDataRow {
    type Error = ValidationError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        expect_kind(record, EntityKind::TypeData)?;
        Ok(Self {
            id: record.id,
            type_id: required_integer(record, "typeId")?,
            name: required_text(record, "name")?,
            kind: required_text(record, "kind")?,
            enum_id: record.integer("enumId"),
        })
    }
}

/// Property value attached to an Instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDataRow {
    pub id: RowId,
    pub instance_id: RowId,
    pub data_key: String,
    pub data_value: String,
}

impl TryFrom<&Record> for InstanceDataRow {
    type Error = ValidationError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        expect_kind(record, EntityKind::InstanceData)?;
        Ok(Self {
            id: record.id,
            instance_id: required_integer(record, "instanceId")?,
            data_key: required_text(record, "dataKey")?,
            data_value: required_text(record, "dataValue")?,
        })
    }
}
