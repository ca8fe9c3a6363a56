//! Generic rows and payload validation.
//!
//! # Responsibility
//! - Hold one persisted row of any kind as values aligned with its
//!   descriptor.
//! - Validate create payloads and overlay patch payloads field by field.
//!
//! # Invariants
//! - `Record::values` has exactly one entry per descriptor field.
//! - `id` is assigned by storage and never changed by a patch.
//! - Structural fields (tree parent, owner) are never changed by a patch.

use super::kind::{EntityKind, FieldSpec, FieldType};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned row id.
pub type RowId = i64;

/// Payload shape accepted by create/patch.
pub type Payload = Map<String, Value>;

/// One stored column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Option<i64>> for FieldValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Integer)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Text(value) => serializer.serialize_str(value),
        }
    }
}

/// Malformed create/patch payload or unknown kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownKind(String),
    NotAnObject(EntityKind),
    UnknownField {
        kind: EntityKind,
        field: String,
    },
    MissingField {
        kind: EntityKind,
        field: &'static str,
    },
    BlankField {
        kind: EntityKind,
        field: &'static str,
    },
    InvalidFieldType {
        kind: EntityKind,
        field: &'static str,
        expected: FieldType,
    },
    /// `id` supplied on create, or changed on patch.
    ImmutableId(EntityKind),
    /// Patch tried to move a row to another parent/owner.
    StructuralField {
        kind: EntityKind,
        field: &'static str,
    },
    /// Record of one kind read as another.
    KindMismatch {
        expected: EntityKind,
        actual: EntityKind,
    },
    /// Node with no parent that is not the tree root.
    DetachedNode { kind: EntityKind, name: String },
    /// A second parentless node for a tree that already has its root.
    DuplicateRoot(EntityKind),
    /// `enumId` disagrees with the Enum named by `kind`.
    EnumLinkMismatch {
        declared: String,
        enum_id: Option<RowId>,
        expected: Option<RowId>,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKind(value) => write!(f, "unknown entity kind `{value}`"),
            Self::NotAnObject(kind) => write!(f, "{kind} payload must be a JSON object"),
            Self::UnknownField { kind, field } => write!(f, "{kind} has no field `{field}`"),
            Self::MissingField { kind, field } => {
                write!(f, "{kind} requires field `{field}`")
            }
            Self::BlankField { kind, field } => {
                write!(f, "{kind} field `{field}` must not be blank")
            }
            Self::InvalidFieldType {
                kind,
                field,
                expected,
            } => write!(
                f,
                "{kind} field `{field}` must be {}",
                expected.as_str()
            ),
            Self::ImmutableId(kind) => write!(f, "{kind} id is assigned by storage"),
            Self::StructuralField { kind, field } => write!(
                f,
                "{kind} field `{field}` links the row into its tree and cannot be patched"
            ),
            Self::KindMismatch { expected, actual } => {
                write!(f, "expected {expected} record, got {actual}")
            }
            Self::DetachedNode { kind, name } => write!(
                f,
                "{kind} `{name}` needs a parentId; only `root` may be parentless"
            ),
            Self::DuplicateRoot(kind) => write!(f, "{kind} tree already has a root"),
            Self::EnumLinkMismatch {
                declared,
                enum_id,
                expected: Some(expected),
            } => write!(
                f,
                "kind `{declared}` is enum {expected}, but enumId is {}",
                enum_id.map_or_else(|| "null".to_string(), |id| id.to_string())
            ),
            Self::EnumLinkMismatch {
                declared, enum_id, ..
            } => write!(
                f,
                "kind `{declared}` names no enum, but enumId is {}",
                enum_id.map_or_else(|| "null".to_string(), |id| id.to_string())
            ),
        }
    }
}

impl Error for ValidationError {}

/// One persisted row of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: EntityKind,
    pub id: RowId,
    values: Vec<FieldValue>,
}

impl Record {
    /// Builds a record from descriptor-aligned values.
    ///
    /// Returns `None` when `values` does not match the descriptor arity.
    pub fn from_values(kind: EntityKind, id: RowId, values: Vec<FieldValue>) -> Option<Self> {
        (values.len() == kind.descriptor().fields.len()).then_some(Self { kind, id, values })
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [FieldValue] {
        &mut self.values
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        let (index, _) = self.kind.descriptor().field(field)?;
        self.values.get(index)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_integer)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    /// Shallow-merges `changes` onto a copy of this record.
    ///
    /// Fields absent from `changes` keep their current value.
    pub fn overlay(&self, changes: &Payload) -> Result<Record, ValidationError> {
        let descriptor = self.kind.descriptor();
        let mut merged = self.clone();

        for (name, raw) in changes {
            if name == "id" {
                let repeated = raw.as_i64().or_else(|| {
                    raw.as_str()
                        .and_then(|text| text.trim().parse::<RowId>().ok())
                });
                if repeated != Some(self.id) {
                    return Err(ValidationError::ImmutableId(self.kind));
                }
                continue;
            }

            let (index, field) =
                descriptor
                    .field(name)
                    .ok_or_else(|| ValidationError::UnknownField {
                        kind: self.kind,
                        field: name.clone(),
                    })?;
            let value = coerce_field(self.kind, field, raw)?;

            if field.structural {
                if value != self.values[index] {
                    return Err(ValidationError::StructuralField {
                        kind: self.kind,
                        field: field.name,
                    });
                }
                continue;
            }
            merged.values[index] = value;
        }

        Ok(merged)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.kind.descriptor().fields;
        let mut map = serializer.serialize_map(Some(fields.len() + 1))?;
        map.serialize_entry("id", &self.id)?;
        for (field, value) in fields.iter().zip(&self.values) {
            map.serialize_entry(field.name, value)?;
        }
        map.end()
    }
}

/// Validates a create payload into descriptor-aligned values.
///
/// Optional fields that are absent are stored as `Null`.
pub fn validate_create(
    kind: EntityKind,
    payload: &Payload,
) -> Result<Vec<FieldValue>, ValidationError> {
    let descriptor = kind.descriptor();

    if payload.contains_key("id") {
        return Err(ValidationError::ImmutableId(kind));
    }
    if let Some(unknown) = payload.keys().find(|name| descriptor.field(name).is_none()) {
        return Err(ValidationError::UnknownField {
            kind,
            field: unknown.clone(),
        });
    }

    descriptor
        .fields
        .iter()
        .map(|field| match payload.get(field.name) {
            Some(raw) => coerce_field(kind, field, raw),
            None if field.required => Err(ValidationError::MissingField {
                kind,
                field: field.name,
            }),
            None => Ok(FieldValue::Null),
        })
        .collect()
}

/// Requires a JSON value to be an object payload.
pub fn payload_from_value(kind: EntityKind, value: Value) -> Result<Payload, ValidationError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject(kind)),
    }
}

fn coerce_field(
    kind: EntityKind,
    field: &'static FieldSpec,
    raw: &Value,
) -> Result<FieldValue, ValidationError> {
    let invalid = || ValidationError::InvalidFieldType {
        kind,
        field: field.name,
        expected: field.field_type,
    };

    let value = match (field.field_type, raw) {
        (_, Value::Null) if field.required => {
            return Err(ValidationError::MissingField {
                kind,
                field: field.name,
            })
        }
        (_, Value::Null) => FieldValue::Null,
        (FieldType::Integer, Value::Number(number)) => {
            FieldValue::Integer(number.as_i64().ok_or_else(invalid)?)
        }
        // Ids returned as response bodies come back as strings.
        (FieldType::Integer, Value::String(text)) => {
            FieldValue::Integer(text.trim().parse().map_err(|_| invalid())?)
        }
        (FieldType::Text, Value::String(text)) => FieldValue::Text(text.clone()),
        (FieldType::Text, Value::Number(number)) => FieldValue::Text(number.to_string()),
        _ => return Err(invalid()),
    };

    if field.non_blank && value.as_text().is_some_and(|text| text.trim().is_empty()) {
        return Err(ValidationError::BlankField {
            kind,
            field: field.name,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{validate_create, FieldValue, Payload, Record, ValidationError};
    use crate::model::kind::EntityKind;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn create_fills_absent_optional_fields_with_null() {
        let values = validate_create(EntityKind::Type, &payload(json!({"name": "root"}))).unwrap();
        assert_eq!(
            values,
            vec![FieldValue::Text("root".to_string()), FieldValue::Null]
        );
    }

    #[test]
    fn create_accepts_numeric_strings_for_integer_fields() {
        let values = validate_create(
            EntityKind::EnumMember,
            &payload(json!({"enumId": "7", "name": "Blue", "value": 2})),
        )
        .unwrap();
        assert_eq!(values[0], FieldValue::Integer(7));
    }

    #[test]
    fn create_rejects_id_unknown_and_blank_fields() {
        let kind = EntityKind::Enum;
        assert_eq!(
            validate_create(kind, &payload(json!({"id": 1, "name": "Color"}))),
            Err(ValidationError::ImmutableId(kind))
        );
        assert!(matches!(
            validate_create(kind, &payload(json!({"name": "Color", "color": 1}))),
            Err(ValidationError::UnknownField { field, .. }) if field == "color"
        ));
        assert_eq!(
            validate_create(kind, &payload(json!({"name": "  "}))),
            Err(ValidationError::BlankField { kind, field: "name" })
        );
    }

    #[test]
    fn overlay_rejects_changed_structural_field_but_allows_repeat() {
        let record = Record::from_values(
            EntityKind::Type,
            5,
            vec![FieldValue::Text("Pump".to_string()), FieldValue::Integer(1)],
        )
        .unwrap();

        let merged = record
            .overlay(&payload(json!({"id": 5, "name": "Valve", "parentId": 1})))
            .unwrap();
        assert_eq!(merged.text("name"), Some("Valve"));
        assert_eq!(merged.integer("parentId"), Some(1));

        let err = record.overlay(&payload(json!({"parentId": 2}))).unwrap_err();
        assert_eq!(
            err,
            ValidationError::StructuralField {
                kind: EntityKind::Type,
                field: "parentId"
            }
        );
    }

    #[test]
    fn record_serializes_as_flat_camel_case_object() {
        let record = Record::from_values(
            EntityKind::InstanceData,
            3,
            vec![
                FieldValue::Integer(9),
                FieldValue::Text("power".to_string()),
                FieldValue::Text("12.5".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": 3, "instanceId": 9, "dataKey": "power", "dataValue": "12.5"})
        );
    }
}
