//! Entity kinds and their static storage descriptors.
//!
//! # Responsibility
//! - Name the six generic entity kinds persisted by the store.
//! - Describe each kind's table, fields, and relations in one static table
//!   consulted by validation, SQL generation, and cascade accounting.
//!
//! # Invariants
//! - `KIND_DESCRIPTORS` holds exactly one entry per `EntityKind`, in
//!   declaration order.
//! - Table and column names come only from this table; they are never built
//!   from caller input.

use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use super::record::ValidationError;

/// Discriminator for the six generic entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Enum,
    EnumMember,
    Type,
    TypeData,
    Instance,
    InstanceData,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Enum,
        EntityKind::EnumMember,
        EntityKind::Type,
        EntityKind::TypeData,
        EntityKind::Instance,
        EntityKind::InstanceData,
    ];

    /// Wire identifier used in routes and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enum => "enum",
            Self::EnumMember => "enum_member",
            Self::Type => "type",
            Self::TypeData => "type_data",
            Self::Instance => "instance",
            Self::InstanceData => "instance_data",
        }
    }

    /// Static descriptor for this kind.
    pub fn descriptor(self) -> &'static KindDescriptor {
        &KIND_DESCRIPTORS[self as usize]
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownKind(value.to_string()))
    }
}

impl Serialize for EntityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Storage type of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Text,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
        }
    }
}

/// One column of a kind, as seen on the wire and in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// camelCase name used in JSON payloads.
    pub name: &'static str,
    /// snake_case column name.
    pub column: &'static str,
    pub field_type: FieldType,
    /// Must be present and non-null on create; may not be patched to null.
    pub required: bool,
    /// Text must contain a non-whitespace character.
    pub non_blank: bool,
    /// Parent/owner link. Patch may repeat it but never change it.
    pub structural: bool,
}

impl FieldSpec {
    const fn required(name: &'static str, column: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            column,
            field_type,
            required: true,
            non_blank: false,
            structural: false,
        }
    }

    const fn optional(name: &'static str, column: &'static str, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, column, field_type)
        }
    }

    const fn label(name: &'static str, column: &'static str) -> Self {
        Self {
            non_blank: true,
            ..Self::required(name, column, FieldType::Text)
        }
    }

    const fn link(self) -> Self {
        Self {
            structural: true,
            ..self
        }
    }
}

/// Cross-row rule checked on create and patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindRule {
    /// A row with no tree parent must be named `root`, and a kind holds at
    /// most one such row.
    SingleRoot,
    /// When `kind_field` is not a primitive tag it names an Enum, and
    /// `enum_field` must reference that Enum.
    EnumLink {
        kind_field: &'static str,
        enum_field: &'static str,
    },
}

/// Per-kind storage contract.
#[derive(Debug)]
pub struct KindDescriptor {
    pub kind: EntityKind,
    pub table: &'static str,
    /// Ordered fields, excluding `id`.
    pub fields: &'static [FieldSpec],
    /// Field referencing a row of the same kind (tree edge).
    pub tree_parent: Option<&'static str>,
    /// Field referencing the owning row of another kind.
    pub owner: Option<(&'static str, EntityKind)>,
    /// Kinds whose rows a delete of this kind can remove transitively,
    /// the kind itself excluded.
    pub cascades: &'static [EntityKind],
    pub rules: &'static [KindRule],
}

impl KindDescriptor {
    /// Position and spec of a field by its wire name.
    pub fn field(&self, name: &str) -> Option<(usize, &'static FieldSpec)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
    }

    /// Comma-separated column list, `id` first.
    pub fn select_columns(&self) -> String {
        std::iter::once("id")
            .chain(self.fields.iter().map(|field| field.column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Tables counted when reporting how many rows a delete removed.
    pub fn cascade_tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.table).chain(
            self.cascades
                .iter()
                .map(|kind| kind.descriptor().table)
                .filter(move |table| *table != self.table),
        )
    }
}

const ENUM_FIELDS: &[FieldSpec] = &[FieldSpec::label("name", "name")];

const ENUM_MEMBER_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("enumId", "enum_id", FieldType::Integer).link(),
    FieldSpec::label("name", "name"),
    FieldSpec::required("value", "value", FieldType::Integer),
];

const TYPE_FIELDS: &[FieldSpec] = &[
    FieldSpec::label("name", "name"),
    FieldSpec::optional("parentId", "parent_id", FieldType::Integer).link(),
];

const TYPE_DATA_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("typeId", "type_id", FieldType::Integer).link(),
    FieldSpec::label("name", "name"),
    FieldSpec::label("kind", "kind"),
    FieldSpec::optional("enumId", "enum_id", FieldType::Integer),
];

const INSTANCE_FIELDS: &[FieldSpec] = &[
    FieldSpec::label("name", "name"),
    FieldSpec::optional("parentId", "parent_id", FieldType::Integer).link(),
    FieldSpec::optional("typeId", "type_id", FieldType::Integer),
];

const INSTANCE_DATA_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("instanceId", "instance_id", FieldType::Integer).link(),
    FieldSpec::label("dataKey", "data_key"),
    FieldSpec::required("dataValue", "data_value", FieldType::Text),
];

/// One descriptor per kind, indexed by `EntityKind as usize`.
pub static KIND_DESCRIPTORS: [KindDescriptor; 6] = [
    KindDescriptor {
        kind: EntityKind::Enum,
        table: "enums",
        fields: ENUM_FIELDS,
        tree_parent: None,
        owner: None,
        cascades: &[EntityKind::EnumMember],
        rules: &[],
    },
    KindDescriptor {
        kind: EntityKind::EnumMember,
        table: "enum_members",
        fields: ENUM_MEMBER_FIELDS,
        tree_parent: None,
        owner: Some(("enumId", EntityKind::Enum)),
        cascades: &[],
        rules: &[],
    },
    KindDescriptor {
        kind: EntityKind::Type,
        table: "types",
        fields: TYPE_FIELDS,
        tree_parent: Some("parentId"),
        owner: None,
        cascades: &[EntityKind::TypeData],
        rules: &[KindRule::SingleRoot],
    },
    KindDescriptor {
        kind: EntityKind::TypeData,
        table: "type_data",
        fields: TYPE_DATA_FIELDS,
        tree_parent: None,
        owner: Some(("typeId", EntityKind::Type)),
        cascades: &[],
        rules: &[KindRule::EnumLink {
            kind_field: "kind",
            enum_field: "enumId",
        }],
    },
    KindDescriptor {
        kind: EntityKind::Instance,
        table: "instances",
        fields: INSTANCE_FIELDS,
        tree_parent: Some("parentId"),
        owner: None,
        cascades: &[EntityKind::InstanceData],
        rules: &[KindRule::SingleRoot],
    },
    KindDescriptor {
        kind: EntityKind::InstanceData,
        table: "instance_data",
        fields: INSTANCE_DATA_FIELDS,
        tree_parent: None,
        owner: Some(("instanceId", EntityKind::Instance)),
        cascades: &[],
        rules: &[],
    },
];

#[cfg(test)]
mod tests {
    use super::{EntityKind, KindRule, KIND_DESCRIPTORS};

    #[test]
    fn descriptor_table_is_indexed_by_kind() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.descriptor().kind, kind);
        }
        assert_eq!(KIND_DESCRIPTORS.len(), EntityKind::ALL.len());
    }

    #[test]
    fn wire_names_roundtrip_through_from_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("alerts".parse::<EntityKind>().is_err());
    }

    #[test]
    fn relation_fields_are_declared_structural() {
        for descriptor in &KIND_DESCRIPTORS {
            let links = descriptor
                .tree_parent
                .into_iter()
                .chain(descriptor.owner.map(|(name, _)| name));
            for name in links {
                let (_, field) = descriptor.field(name).unwrap();
                assert!(field.structural, "{}.{name}", descriptor.table);
            }
        }
    }

    #[test]
    fn rules_name_fields_of_their_kind() {
        for descriptor in &KIND_DESCRIPTORS {
            for rule in descriptor.rules {
                match *rule {
                    KindRule::SingleRoot => assert!(descriptor.tree_parent.is_some()),
                    KindRule::EnumLink {
                        kind_field,
                        enum_field,
                    } => {
                        assert!(descriptor.field(kind_field).is_some());
                        assert!(descriptor.field(enum_field).is_some());
                    }
                }
            }
        }
    }

    #[test]
    fn cascade_tables_start_with_own_table() {
        let tables: Vec<_> = EntityKind::Type.descriptor().cascade_tables().collect();
        assert_eq!(tables, vec!["types", "type_data"]);
        let tables: Vec<_> = EntityKind::TypeData.descriptor().cascade_tables().collect();
        assert_eq!(tables, vec!["type_data"]);
    }
}
