//! Destructive bulk load of enums, types, and instances from one JSON
//! document.
//!
//! # Responsibility
//! - Wipe the three top-level kinds, then repopulate them in dependency
//!   order: enums, types, instances.
//! - Translate human-authored type/enum names into foreign keys while
//!   descending the nested descriptors.
//!
//! # Invariants
//! - No Type insert starts before every enum member insert has returned.
//! - A node is emitted only after its parent's id is known.
//! - A failing top-level entry is logged and skipped; its siblings still
//!   load. A malformed nested descriptor drops only its own subtree.
//!   Wipe and root creation failures abort the whole run.
//! - Unresolved names become null foreign keys, never entry failures.

use crate::model::kind::EntityKind;
use crate::model::record::{Payload, RowId};
use crate::model::rows::{is_primitive_kind, TypeDataRow};
use crate::model::ROOT_NODE_NAME;
use crate::repo::kind_repo::KindRepository;
use crate::service::resolver::ReferenceResolver;
use crate::service::tree_service::{TreeService, TreeServiceError};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Parsed bulk-load input. Key order follows the source document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkDocument {
    /// Enum name → member name → integer value.
    #[serde(default)]
    pub enums: Map<String, Value>,
    /// Type name → nested type descriptor.
    #[serde(default)]
    pub types: Map<String, Value>,
    /// Instance name → type name, or `{type, children?, data?}`.
    #[serde(default)]
    pub instances: Map<String, Value>,
}

impl BulkDocument {
    pub fn from_json_str(json: &str) -> Result<Self, BulkLoadError> {
        serde_json::from_str(json).map_err(BulkLoadError::Parse)
    }

    /// Reads a UTF-8 JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BulkLoadError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| BulkLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

/// Errors from bulk load planning and execution.
#[derive(Debug)]
pub enum BulkLoadError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    /// Descriptor shape is wrong at `path` (dot-separated names).
    InvalidDescriptor {
        path: String,
        message: String,
    },
    Service(TreeServiceError),
}

impl Display for BulkLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read `{}`: {source}", path.display()),
            Self::Parse(err) => write!(f, "invalid bulk-load document: {err}"),
            Self::InvalidDescriptor { path, message } => {
                write!(f, "invalid descriptor at `{path}`: {message}")
            }
            Self::Service(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BulkLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidDescriptor { .. } => None,
            Self::Service(err) => Some(err),
        }
    }
}

impl From<TreeServiceError> for BulkLoadError {
    fn from(value: TreeServiceError) -> Self {
        Self::Service(value)
    }
}

/// The three ordered creation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPass {
    Enums,
    Types,
    Instances,
}

impl LoadPass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enums => "enums",
            Self::Types => "types",
            Self::Instances => "instances",
        }
    }
}

/// One entry, or one nested subtree, that did not load.
#[derive(Debug)]
pub struct EntryFailure {
    pub pass: LoadPass,
    /// Top-level name, or dot-separated path of a dropped subtree.
    pub name: String,
    pub error: BulkLoadError,
}

impl Display for EntryFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} `{}`: {}", self.pass.as_str(), self.name, self.error)
    }
}

/// Outcome of one bulk-load run.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Rows removed by the wipe, cascades included.
    pub wiped_rows: u64,
    pub enums_loaded: usize,
    pub types_loaded: usize,
    pub instances_loaded: usize,
    /// Rows inserted across all kinds, synthetic roots and partial entries
    /// included.
    pub rows_created: usize,
    pub failures: Vec<EntryFailure>,
}

impl LoadReport {
    /// Whether every entry loaded with all of its subtrees.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Parent {
    Existing(RowId),
    Planned(usize),
}

#[derive(Debug)]
struct PlannedType {
    name: String,
    parent: Parent,
    /// `(property name, declared kind)` in document order.
    properties: Vec<(String, String)>,
}

/// Parent-first nodes of one top-level entry, plus the nested subtrees
/// left out because their descriptors were malformed.
#[derive(Debug)]
struct EntryPlan<T> {
    nodes: Vec<T>,
    /// `(subtree path, reason)`.
    rejected: Vec<(String, BulkLoadError)>,
}

type EntryOutcome = Result<Vec<(String, BulkLoadError)>, BulkLoadError>;

#[derive(Debug)]
struct PlannedInstance {
    name: String,
    parent: Parent,
    type_name: String,
    /// `(dataKey, string-encoded value)` in document order.
    data: Vec<(String, String)>,
}

/// Bulk loader bound to one tree service.
pub struct BulkLoader<'s, R: KindRepository> {
    service: &'s TreeService<R>,
    resolver: ReferenceResolver<'s, R>,
}

impl<'s, R: KindRepository> BulkLoader<'s, R> {
    pub fn new(service: &'s TreeService<R>) -> Self {
        Self {
            service,
            resolver: ReferenceResolver::new(service),
        }
    }

    /// Replaces all enums, types, and instances with the document content.
    ///
    /// Returns `Err` only for failures that leave nothing sensible to
    /// continue with; per-entry failures are collected in the report.
    pub fn load(&self, document: &BulkDocument) -> Result<LoadReport, BulkLoadError> {
        let started_at = Instant::now();
        info!(
            "event=bulk_load module=loader status=start enums={} types={} instances={}",
            document.enums.len(),
            document.types.len(),
            document.instances.len()
        );

        let mut report = LoadReport {
            wiped_rows: self.wipe()?,
            ..LoadReport::default()
        };

        for (name, members) in &document.enums {
            let mut created = 0;
            let outcome = self
                .load_enum(name, members, &mut created)
                .map(|()| Vec::new());
            report.rows_created += created;
            if settle(&mut report, LoadPass::Enums, name, outcome) {
                report.enums_loaded += 1;
            }
        }

        let type_root = self.create_root(EntityKind::Type)?;
        report.rows_created += 1;
        for (name, descriptor) in &document.types {
            let mut created = 0;
            let outcome = plan_type_entry(name, descriptor, type_root).and_then(|plan| {
                self.emit_types(&plan.nodes, &mut created)?;
                Ok(plan.rejected)
            });
            report.rows_created += created;
            if settle(&mut report, LoadPass::Types, name, outcome) {
                report.types_loaded += 1;
            }
        }

        let instance_root = self.create_root(EntityKind::Instance)?;
        report.rows_created += 1;
        for (name, descriptor) in &document.instances {
            let mut created = 0;
            let outcome = plan_instance_entry(name, descriptor, instance_root).and_then(|plan| {
                self.emit_instances(&plan.nodes, &mut created)?;
                Ok(plan.rejected)
            });
            report.rows_created += created;
            if settle(&mut report, LoadPass::Instances, name, outcome) {
                report.instances_loaded += 1;
            }
        }

        let status = if report.is_complete() { "ok" } else { "partial" };
        info!(
            "event=bulk_load module=loader status={status} duration_ms={} wiped={} created={} failures={}",
            started_at.elapsed().as_millis(),
            report.wiped_rows,
            report.rows_created,
            report.failures.len()
        );
        Ok(report)
    }

    // Members and data rows go away with their owners.
    fn wipe(&self) -> Result<u64, BulkLoadError> {
        let mut removed = 0;
        for kind in [EntityKind::Enum, EntityKind::Instance, EntityKind::Type] {
            removed += self.service.delete_all(kind).map_err(|err| {
                error!("event=bulk_load_wipe module=loader status=error kind={kind} error={err}");
                err
            })?;
        }
        Ok(removed)
    }

    fn create_root(&self, kind: EntityKind) -> Result<RowId, BulkLoadError> {
        let id = self
            .service
            .create(kind, &object(json!({ "name": ROOT_NODE_NAME })))?;
        Ok(id)
    }

    fn load_enum(
        &self,
        name: &str,
        members: &Value,
        created: &mut usize,
    ) -> Result<(), BulkLoadError> {
        let members = members.as_object().ok_or_else(|| {
            invalid_descriptor(name, "enum must map member names to integer values")
        })?;
        let members = members
            .iter()
            .map(|(member, raw)| {
                parse_member_value(raw)
                    .map(|value| (member.as_str(), value))
                    .ok_or_else(|| {
                        invalid_descriptor(
                            &format!("{name}.{member}"),
                            "enum member value must be an integer",
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let enum_id = self
            .service
            .create(EntityKind::Enum, &object(json!({ "name": name })))?;
        *created += 1;

        let payloads = members
            .iter()
            .map(|(member, value)| {
                object(json!({ "enumId": enum_id, "name": member, "value": value }))
            })
            .collect::<Vec<_>>();
        *created += self
            .service
            .create_many(EntityKind::EnumMember, &payloads)?
            .len();
        Ok(())
    }

    fn emit_types(&self, plan: &[PlannedType], created: &mut usize) -> Result<(), BulkLoadError> {
        let mut ids = Vec::with_capacity(plan.len());
        for node in plan {
            let parent_id = parent_id(&ids, node.parent)?;
            let type_id = self.service.create(
                EntityKind::Type,
                &object(json!({ "name": node.name, "parentId": parent_id })),
            )?;
            *created += 1;

            for (property, kind) in &node.properties {
                let enum_id = self.enum_id_for(kind)?;
                self.service.create(
                    EntityKind::TypeData,
                    &object(json!({
                        "typeId": type_id,
                        "name": property,
                        "kind": kind,
                        "enumId": enum_id,
                    })),
                )?;
                *created += 1;
            }
            ids.push(type_id);
        }
        Ok(())
    }

    fn emit_instances(
        &self,
        plan: &[PlannedInstance],
        created: &mut usize,
    ) -> Result<(), BulkLoadError> {
        let mut ids = Vec::with_capacity(plan.len());
        for node in plan {
            let parent_id = parent_id(&ids, node.parent)?;
            let type_id = match self.resolver.require(EntityKind::Type, &node.type_name)? {
                Ok(type_id) => Some(type_id),
                Err(reference) => {
                    warn!(
                        "event=bulk_load_reference module=loader status=skipped instance={} error={reference}",
                        node.name
                    );
                    None
                }
            };
            let instance_id = self.service.create(
                EntityKind::Instance,
                &object(json!({ "name": node.name, "parentId": parent_id, "typeId": type_id })),
            )?;
            *created += 1;

            if !node.data.is_empty() {
                if let Some(type_id) = type_id {
                    self.warn_unknown_data_keys(node, type_id)?;
                }
                let payloads = node
                    .data
                    .iter()
                    .map(|(key, value)| {
                        object(json!({
                            "instanceId": instance_id,
                            "dataKey": key,
                            "dataValue": value,
                        }))
                    })
                    .collect::<Vec<_>>();
                *created += self
                    .service
                    .create_many(EntityKind::InstanceData, &payloads)?
                    .len();
            }
            ids.push(instance_id);
        }
        Ok(())
    }

    fn enum_id_for(&self, kind: &str) -> Result<Option<RowId>, BulkLoadError> {
        if is_primitive_kind(kind) {
            return Ok(None);
        }
        match self.resolver.require(EntityKind::Enum, kind)? {
            Ok(enum_id) => Ok(Some(enum_id)),
            Err(reference) => {
                warn!("event=bulk_load_reference module=loader status=skipped error={reference}");
                Ok(None)
            }
        }
    }

    fn warn_unknown_data_keys(
        &self,
        node: &PlannedInstance,
        type_id: RowId,
    ) -> Result<(), BulkLoadError> {
        let declared = self
            .service
            .list_attached(EntityKind::TypeData, type_id)?
            .iter()
            .map(TypeDataRow::try_from)
            .map(|row| row.map(|row| row.name))
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(TreeServiceError::from)?;
        for (key, _) in &node.data {
            if !declared.contains(key) {
                warn!(
                    "event=bulk_load_data_key module=loader status=skipped instance={} type={} key={key}",
                    node.name, node.type_name
                );
            }
        }
        Ok(())
    }
}

/// Files failures into the report; returns whether the entry's own row
/// was created.
fn settle(report: &mut LoadReport, pass: LoadPass, name: &str, outcome: EntryOutcome) -> bool {
    match outcome {
        Ok(rejected) => {
            for (path, error) in rejected {
                record_failure(report, pass, path, error);
            }
            true
        }
        Err(error) => {
            record_failure(report, pass, name.to_string(), error);
            false
        }
    }
}

fn record_failure(report: &mut LoadReport, pass: LoadPass, name: String, error: BulkLoadError) {
    error!(
        "event=bulk_load_entry module=loader status=error pass={} name={name} error={error}",
        pass.as_str()
    );
    report.failures.push(EntryFailure { pass, name, error });
}

/// Flattens one top-level type into parent-first order.
///
/// String values are property kinds; object values are child types. A
/// malformed top-level descriptor fails the entry; a malformed nested one
/// is rejected together with its subtree.
fn plan_type_entry(
    name: &str,
    descriptor: &Value,
    root_id: RowId,
) -> Result<EntryPlan<PlannedType>, BulkLoadError> {
    let mut plan = EntryPlan {
        nodes: Vec::new(),
        rejected: Vec::new(),
    };
    let mut stack = vec![(
        name.to_string(),
        name.to_string(),
        descriptor,
        Parent::Existing(root_id),
    )];

    while let Some((name, path, value, parent)) = stack.pop() {
        let (properties, children) = match split_type_descriptor(&path, value) {
            Ok(parts) => parts,
            Err(err) if matches!(parent, Parent::Existing(_)) => return Err(err),
            Err(err) => {
                plan.rejected.push((path, err));
                continue;
            }
        };

        let slot = plan.nodes.len();
        plan.nodes.push(PlannedType {
            name,
            parent,
            properties,
        });
        for (child_name, child) in children.into_iter().rev() {
            let child_path = format!("{path}.{child_name}");
            stack.push((child_name.clone(), child_path, child, Parent::Planned(slot)));
        }
    }

    Ok(plan)
}

type TypeParts<'d> = (Vec<(String, String)>, Vec<(&'d String, &'d Value)>);

fn split_type_descriptor<'d>(path: &str, value: &'d Value) -> Result<TypeParts<'d>, BulkLoadError> {
    let fields = value
        .as_object()
        .ok_or_else(|| invalid_descriptor(path, "type descriptor must be an object"))?;

    let mut properties = Vec::new();
    let mut children = Vec::new();
    for (key, value) in fields {
        match value {
            Value::String(kind) => properties.push((key.clone(), kind.clone())),
            Value::Object(_) => children.push((key, value)),
            other => {
                return Err(invalid_descriptor(
                    &format!("{path}.{key}"),
                    &format!(
                        "expected a property kind or nested type, got {}",
                        json_type_name(other)
                    ),
                ))
            }
        }
    }
    Ok((properties, children))
}

/// Flattens one top-level instance into parent-first order, with the same
/// rejection rule as [`plan_type_entry`].
fn plan_instance_entry(
    name: &str,
    descriptor: &Value,
    root_id: RowId,
) -> Result<EntryPlan<PlannedInstance>, BulkLoadError> {
    let mut plan = EntryPlan {
        nodes: Vec::new(),
        rejected: Vec::new(),
    };
    let mut stack = vec![(
        name.to_string(),
        name.to_string(),
        descriptor,
        Parent::Existing(root_id),
    )];

    while let Some((name, path, value, parent)) = stack.pop() {
        let (type_name, data, children) = match split_instance_descriptor(&path, value) {
            Ok(parts) => parts,
            Err(err) if matches!(parent, Parent::Existing(_)) => return Err(err),
            Err(err) => {
                plan.rejected.push((path, err));
                continue;
            }
        };

        let slot = plan.nodes.len();
        plan.nodes.push(PlannedInstance {
            name,
            parent,
            type_name,
            data,
        });
        for (child_name, child) in children.into_iter().flatten().rev() {
            let child_path = format!("{path}.{child_name}");
            stack.push((child_name.clone(), child_path, child, Parent::Planned(slot)));
        }
    }

    Ok(plan)
}

type InstanceParts<'d> = (String, Vec<(String, String)>, Option<&'d Map<String, Value>>);

fn split_instance_descriptor<'d>(
    path: &str,
    value: &'d Value,
) -> Result<InstanceParts<'d>, BulkLoadError> {
    let fields = match value {
        Value::String(type_name) => return Ok((type_name.clone(), Vec::new(), None)),
        Value::Object(fields) => fields,
        other => {
            return Err(invalid_descriptor(
                path,
                &format!(
                    "instance descriptor must be a type name or an object, got {}",
                    json_type_name(other)
                ),
            ))
        }
    };

    let type_name = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_descriptor(path, "instance object requires a string `type`"))?
        .to_string();
    let data = match fields.get("data") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(key, raw)| {
                encode_data_value(raw)
                    .map(|encoded| (key.clone(), encoded))
                    .ok_or_else(|| {
                        invalid_descriptor(
                            &format!("{path}.data.{key}"),
                            "data value must be a string, number, or boolean",
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid_descriptor(path, "`data` must be an object")),
    };
    let children = match fields.get("children") {
        None | Some(Value::Null) => None,
        Some(Value::Object(children)) => Some(children),
        Some(_) => return Err(invalid_descriptor(path, "`children` must be an object")),
    };
    Ok((type_name, data, children))
}

fn parent_id(ids: &[RowId], parent: Parent) -> Result<RowId, BulkLoadError> {
    match parent {
        Parent::Existing(id) => Ok(id),
        Parent::Planned(slot) => ids.get(slot).copied().ok_or_else(|| {
            invalid_descriptor(&slot.to_string(), "child planned before its parent")
        }),
    }
}

fn parse_member_value(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.fract() == 0.0)
                .map(|value| value as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Booleans use the numeric encoding the `boolean` kind formats from.
fn encode_data_value(raw: &Value) -> Option<String> {
    match raw {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(if *flag { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid_descriptor(path: &str, message: &str) -> BulkLoadError {
    BulkLoadError::InvalidDescriptor {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}
