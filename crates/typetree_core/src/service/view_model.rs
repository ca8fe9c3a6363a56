//! In-memory navigation over the type and instance trees.
//!
//! # Responsibility
//! - Index Type/Instance rows by id with name-sorted children.
//! - Follow instance → type links and render stored property values by
//!   their declared kind.
//!
//! # Invariants
//! - The arenas are snapshots; only `load_type_node` adds to them.
//! - A missing value renders as `unset`, never as empty text or zero.

use crate::model::kind::EntityKind;
use crate::model::record::{Record, RowId, ValidationError};
use crate::model::rows::{EnumView, InstanceDataRow, NodeRow, TypeDataRow};
use crate::model::ROOT_NODE_NAME;
use crate::repo::kind_repo::KindRepository;
use crate::service::tree_service::{TreeService, TreeServiceError};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Kind assumed for properties the type does not declare.
pub const DEFAULT_PROPERTY_KIND: &str = "number";

#[derive(Debug)]
pub enum ViewError {
    /// Instance carries no type reference at all.
    MissingTypeId { instance_id: RowId },
    Service(TreeServiceError),
    InvalidRecord(ValidationError),
}

impl Display for ViewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTypeId { instance_id } => {
                write!(f, "instance {instance_id} has no type")
            }
            Self::Service(err) => write!(f, "{err}"),
            Self::InvalidRecord(err) => write!(f, "invalid stored row: {err}"),
        }
    }
}

impl Error for ViewError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingTypeId { .. } => None,
            Self::Service(err) => Some(err),
            Self::InvalidRecord(err) => Some(err),
        }
    }
}

impl From<TreeServiceError> for ViewError {
    fn from(value: TreeServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<ValidationError> for ViewError {
    fn from(value: ValidationError) -> Self {
        Self::InvalidRecord(value)
    }
}

pub type ViewResult<T> = Result<T, ViewError>;

/// Tree nodes of one kind indexed by id.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<RowId, NodeRow>,
    children: HashMap<RowId, Vec<RowId>>,
}

impl NodeArena {
    pub fn from_rows(rows: impl IntoIterator<Item = NodeRow>) -> Self {
        let mut arena = Self::default();
        for row in rows {
            arena.insert(row);
        }
        arena
    }

    /// Adds or replaces a node, keeping its parent's children sorted.
    pub fn insert(&mut self, node: NodeRow) {
        if let Some(previous) = self.nodes.remove(&node.id) {
            if let Some(siblings) = previous
                .parent_id
                .and_then(|parent| self.children.get_mut(&parent))
            {
                siblings.retain(|id| *id != previous.id);
            }
        }

        let id = node.id;
        let parent_id = node.parent_id;
        self.nodes.insert(id, node);
        if let Some(parent_id) = parent_id {
            let nodes = &self.nodes;
            let siblings = self.children.entry(parent_id).or_default();
            siblings.push(id);
            siblings.sort_by(|left, right| {
                let left = nodes.get(left).map(|node| (node.name.as_str(), node.id));
                let right = nodes.get(right).map(|node| (node.name.as_str(), node.id));
                left.cmp(&right)
            });
        }
    }

    pub fn get(&self, id: RowId) -> Option<&NodeRow> {
        self.nodes.get(&id)
    }

    /// Direct children of `id`, sorted by name.
    pub fn children(&self, id: RowId) -> Vec<&NodeRow> {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.nodes.get(child))
            .collect()
    }

    /// The parentless node named `root`.
    pub fn root(&self) -> Option<&NodeRow> {
        self.nodes
            .values()
            .filter(|node| node.parent_id.is_none() && node.name == ROOT_NODE_NAME)
            .min_by_key(|node| node.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// One breadcrumb segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crumb {
    pub id: RowId,
    pub name: String,
}

/// Rendered property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayValue {
    Unset,
    Boolean(bool),
    Text(String),
}

impl Display for DisplayValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => f.write_str("unset"),
            Self::Boolean(flag) => write!(f, "{flag}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl Serialize for DisplayValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Boolean(flag) => serializer.serialize_bool(*flag),
            other => serializer.collect_str(other),
        }
    }
}

/// A declared property of an instance's type with its current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyView {
    pub name: String,
    pub kind: String,
    pub raw: Option<String>,
    pub display: DisplayValue,
}

/// Renders `raw` according to the declared `kind`.
pub fn format_value(enums: &[EnumView], kind: &str, raw: Option<&str>) -> DisplayValue {
    let Some(raw) = raw else {
        return DisplayValue::Unset;
    };

    match kind {
        "boolean" => DisplayValue::Boolean(parse_flag(raw)),
        "percent" => match raw.trim().parse::<f64>() {
            Ok(value) => DisplayValue::Text(format!("{:.2}%", (value * 100.0).round() / 100.0)),
            Err(_) => DisplayValue::Text(raw.to_string()),
        },
        "number" | "text" => DisplayValue::Text(raw.to_string()),
        enum_name => match enums.iter().find(|candidate| candidate.name == enum_name) {
            None => DisplayValue::Text(raw.to_string()),
            Some(view) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|value| view.member_for(value))
                .map(|member| DisplayValue::Text(member.name.clone()))
                .unwrap_or_else(|| DisplayValue::Text(format!("bad enum value {raw}"))),
        },
    }
}

/// Truthiness of the numeric encoding; non-numeric text is false.
fn parse_flag(raw: &str) -> bool {
    raw.trim()
        .parse::<f64>()
        .map_or(false, |value| value != 0.0 && !value.is_nan())
}

/// Snapshot of both trees plus the enum projection.
pub struct ViewModel<'s, R: KindRepository> {
    service: &'s TreeService<R>,
    types: NodeArena,
    instances: NodeArena,
    enums: Vec<EnumView>,
}

impl<'s, R: KindRepository> ViewModel<'s, R> {
    pub fn load(service: &'s TreeService<R>) -> ViewResult<Self> {
        Ok(Self {
            service,
            types: NodeArena::from_rows(node_rows(service.get_all(EntityKind::Type)?)?),
            instances: NodeArena::from_rows(node_rows(service.get_all(EntityKind::Instance)?)?),
            enums: service.list_enums()?,
        })
    }

    pub fn types(&self) -> &NodeArena {
        &self.types
    }

    pub fn instances(&self) -> &NodeArena {
        &self.instances
    }

    pub fn enums(&self) -> &[EnumView] {
        &self.enums
    }

    pub fn instance_node(&self, id: RowId) -> Option<&NodeRow> {
        self.instances.get(id)
    }

    pub fn type_node(&self, id: RowId) -> Option<&NodeRow> {
        self.types.get(id)
    }

    /// Cached type of `instance`, without fetching.
    pub fn type_node_of(&self, instance: &NodeRow) -> Option<&NodeRow> {
        instance.type_id.and_then(|type_id| self.types.get(type_id))
    }

    /// Type of `instance`, fetched and cached when not yet known.
    pub fn load_type_node(&mut self, instance: &NodeRow) -> ViewResult<&NodeRow> {
        let type_id = instance.type_id.ok_or(ViewError::MissingTypeId {
            instance_id: instance.id,
        })?;

        if self.types.get(type_id).is_none() {
            let record = self
                .service
                .get_by_id(EntityKind::Type, type_id)?
                .ok_or(TreeServiceError::NotFound {
                    kind: EntityKind::Type,
                    id: type_id,
                })?;
            self.types.insert(NodeRow::try_from(&record)?);
        }

        self.types.get(type_id).ok_or(ViewError::Service(TreeServiceError::NotFound {
            kind: EntityKind::Type,
            id: type_id,
        }))
    }

    /// Path from the outermost non-root ancestor down to the instance.
    pub fn breadcrumbs(&self, instance_id: RowId) -> Vec<Crumb> {
        let mut crumbs = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(instance_id);

        while let Some(node) = current.and_then(|id| self.instances.get(id)) {
            if node.name == ROOT_NODE_NAME || !visited.insert(node.id) {
                break;
            }
            crumbs.push(Crumb {
                id: node.id,
                name: node.name.clone(),
            });
            current = node.parent_id;
        }

        crumbs.reverse();
        crumbs
    }

    pub fn format_value(&self, kind: &str, raw: Option<&str>) -> DisplayValue {
        format_value(&self.enums, kind, raw)
    }

    /// Declared kind of `property` on `type_id`.
    pub fn property_kind(&self, type_id: RowId, property: &str) -> ViewResult<String> {
        Ok(self
            .type_data(type_id)?
            .into_iter()
            .find(|row| row.name == property)
            .map(|row| row.kind)
            .unwrap_or_else(|| DEFAULT_PROPERTY_KIND.to_string()))
    }

    /// Declared properties of the instance's type, sorted by name, with the
    /// instance's stored values rendered.
    pub fn instance_properties(&self, instance_id: RowId) -> ViewResult<Vec<PropertyView>> {
        let type_id = self.type_id_of(instance_id)?;

        let mut values: BTreeMap<String, String> = BTreeMap::new();
        for record in self
            .service
            .list_attached(EntityKind::InstanceData, instance_id)?
        {
            let row = InstanceDataRow::try_from(&record)?;
            values.insert(row.data_key, row.data_value);
        }

        let mut declared = self.type_data(type_id)?;
        declared.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(declared
            .into_iter()
            .map(|row| {
                let raw = values.get(&row.name).cloned();
                let display = self.format_value(&row.kind, raw.as_deref());
                PropertyView {
                    name: row.name,
                    kind: row.kind,
                    raw,
                    display,
                }
            })
            .collect())
    }

    /// Types directly under the instance's type.
    pub fn child_types(&self, instance_id: RowId) -> ViewResult<Vec<&NodeRow>> {
        let type_id = self.type_id_of(instance_id)?;
        Ok(self.types.children(type_id))
    }

    fn type_id_of(&self, instance_id: RowId) -> ViewResult<RowId> {
        let instance = self
            .instances
            .get(instance_id)
            .ok_or(TreeServiceError::NotFound {
                kind: EntityKind::Instance,
                id: instance_id,
            })?;
        instance.type_id.ok_or(ViewError::MissingTypeId { instance_id })
    }

    fn type_data(&self, type_id: RowId) -> ViewResult<Vec<TypeDataRow>> {
        self.service
            .list_attached(EntityKind::TypeData, type_id)?
            .iter()
            .map(|record| TypeDataRow::try_from(record).map_err(ViewError::from))
            .collect()
    }
}

fn node_rows(records: Vec<Record>) -> ViewResult<Vec<NodeRow>> {
    records
        .iter()
        .map(|record| NodeRow::try_from(record).map_err(ViewError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{format_value, DisplayValue, NodeArena};
    use crate::model::rows::{EnumMemberRow, EnumView, NodeRow};

    fn color() -> Vec<EnumView> {
        vec![EnumView {
            id: 1,
            name: "Color".to_string(),
            members: vec![EnumMemberRow {
                id: 10,
                enum_id: 1,
                name: "Blue".to_string(),
                value: 2,
            }],
        }]
    }

    fn text(value: &str) -> DisplayValue {
        DisplayValue::Text(value.to_string())
    }

    #[test]
    fn percent_rounds_to_two_decimals() {
        assert_eq!(format_value(&[], "percent", Some("12.345")), text("12.35%"));
        assert_eq!(format_value(&[], "percent", Some("50")), text("50.00%"));
        assert_eq!(format_value(&[], "percent", Some("n/a")), text("n/a"));
    }

    #[test]
    fn boolean_follows_numeric_encoding() {
        assert_eq!(
            format_value(&[], "boolean", Some("0")),
            DisplayValue::Boolean(false)
        );
        assert_eq!(
            format_value(&[], "boolean", Some("1")),
            DisplayValue::Boolean(true)
        );
        assert_eq!(
            format_value(&[], "boolean", Some("2.5")),
            DisplayValue::Boolean(true)
        );
        assert_eq!(
            format_value(&[], "boolean", Some("true")),
            DisplayValue::Boolean(false)
        );
    }

    #[test]
    fn missing_value_renders_unset() {
        let value = format_value(&[], "number", None);
        assert_eq!(value, DisplayValue::Unset);
        assert_eq!(value.to_string(), "unset");
    }

    #[test]
    fn enum_kind_maps_value_to_member_name() {
        let enums = color();
        assert_eq!(format_value(&enums, "Color", Some("2")), text("Blue"));
        assert_eq!(
            format_value(&enums, "Color", Some("99")),
            text("bad enum value 99")
        );
        assert_eq!(format_value(&enums, "Shape", Some("3")), text("3"));
    }

    #[test]
    fn arena_children_sorted_by_name() {
        let node = |id, name: &str, parent_id| NodeRow {
            id,
            name: name.to_string(),
            parent_id,
            type_id: None,
        };
        let arena = NodeArena::from_rows([
            node(1, "root", None),
            node(2, "valve", Some(1)),
            node(3, "motor", Some(1)),
            node(4, "axle", Some(3)),
        ]);

        let names: Vec<_> = arena
            .children(1)
            .into_iter()
            .map(|node| node.name.as_str())
            .collect();
        assert_eq!(names, vec!["motor", "valve"]);
        assert_eq!(arena.root().map(|node| node.id), Some(1));
        assert!(arena.children(2).is_empty());
    }
}
