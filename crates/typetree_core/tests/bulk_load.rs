use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeSet;
use std::io::Write;
use typetree_core::db::open_db_in_memory;
use typetree_core::{
    BulkDocument, BulkLoadError, BulkLoader, EntityKind, FieldValue, LoadPass, NodeRow, Record,
    SqliteKindRepository, TreeService, TypeDataRow,
};

type Service<'conn> = TreeService<SqliteKindRepository<'conn>>;

fn service(conn: &Connection) -> Service<'_> {
    TreeService::new(SqliteKindRepository::try_new(conn).unwrap())
}

fn document(value: serde_json::Value) -> BulkDocument {
    BulkDocument::from_json_str(&value.to_string()).unwrap()
}

fn named(service: &Service<'_>, kind: EntityKind, name: &str) -> Vec<Record> {
    service
        .find_by(kind, "name", &FieldValue::Text(name.to_string()))
        .unwrap()
}

fn single(service: &Service<'_>, kind: EntityKind, name: &str) -> NodeRow {
    let records = named(service, kind, name);
    assert_eq!(records.len(), 1, "expected one {kind} named {name}");
    NodeRow::try_from(&records[0]).unwrap()
}

fn type_data(service: &Service<'_>, type_id: i64) -> Vec<TypeDataRow> {
    service
        .list_attached(EntityKind::TypeData, type_id)
        .unwrap()
        .iter()
        .map(|record| TypeDataRow::try_from(record).unwrap())
        .collect()
}

/// Rows as comparable tuples with ids replaced by the names they point to.
fn structure(service: &Service<'_>) -> BTreeSet<String> {
    let mut rows = BTreeSet::new();
    let name_of = |kind: EntityKind, id: Option<i64>| {
        id.and_then(|id| service.get_by_id(kind, id).unwrap())
            .and_then(|record| record.text("name").map(str::to_string))
            .unwrap_or_default()
    };
    for kind in [EntityKind::Type, EntityKind::Instance] {
        for record in service.get_all(kind).unwrap() {
            let node = NodeRow::try_from(&record).unwrap();
            rows.insert(format!(
                "{kind}:{}<{}:{}",
                node.name,
                name_of(kind, node.parent_id),
                name_of(EntityKind::Type, node.type_id)
            ));
        }
    }
    for record in service.get_all(EntityKind::TypeData).unwrap() {
        let row = TypeDataRow::try_from(&record).unwrap();
        rows.insert(format!(
            "type_data:{}.{}={}:{}",
            name_of(EntityKind::Type, Some(row.type_id)),
            row.name,
            row.kind,
            name_of(EntityKind::Enum, row.enum_id)
        ));
    }
    for view in service.list_enums().unwrap() {
        for member in view.members {
            rows.insert(format!("enum:{}.{}={}", view.name, member.name, member.value));
        }
    }
    rows
}

fn plant_document() -> BulkDocument {
    document(json!({
        "enums": {"Color": {"Red": 1, "Blue": 2}},
        "types": {
            "Plant": {
                "area": "text",
                "Pump": {"power": "number", "tint": "Color", "Valve": {"open": "boolean"}}
            }
        },
        "instances": {
            "plant1": {
                "type": "Plant",
                "data": {"area": "north"},
                "children": {
                    "p1": {
                        "type": "Pump",
                        "data": {"power": 7.5, "tint": 2},
                        "children": {"v1": "Valve"}
                    }
                }
            }
        }
    }))
}

#[test]
fn loads_single_type_and_instance_under_roots() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let doc = document(json!({
        "types": {"Pump": {"power": "number"}},
        "instances": {"plant1": {"type": "Pump", "children": {}}}
    }));

    let report = BulkLoader::new(&service).load(&doc).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.types_loaded, 1);
    assert_eq!(report.instances_loaded, 1);

    let type_root = single(&service, EntityKind::Type, "root");
    let pump = single(&service, EntityKind::Type, "Pump");
    assert_eq!(type_root.parent_id, None);
    assert_eq!(pump.parent_id, Some(type_root.id));

    let properties = type_data(&service, pump.id);
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].name, "power");
    assert_eq!(properties[0].kind, "number");
    assert_eq!(properties[0].enum_id, None);

    let instance_root = single(&service, EntityKind::Instance, "root");
    let plant = single(&service, EntityKind::Instance, "plant1");
    assert_eq!(plant.parent_id, Some(instance_root.id));
    assert_eq!(plant.type_id, Some(pump.id));
}

#[test]
fn nested_types_and_instances_link_parents_and_references() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let report = BulkLoader::new(&service).load(&plant_document()).unwrap();
    assert!(report.is_complete(), "{:?}", report.failures);
    // enum + 2 members, 4 types + 4 type_data, 4 instances + 3 data rows
    assert_eq!(report.rows_created, 3 + 8 + 7);

    let plant = single(&service, EntityKind::Type, "Plant");
    let pump = single(&service, EntityKind::Type, "Pump");
    let valve = single(&service, EntityKind::Type, "Valve");
    assert_eq!(pump.parent_id, Some(plant.id));
    assert_eq!(valve.parent_id, Some(pump.id));

    let color = named(&service, EntityKind::Enum, "Color");
    let tint = type_data(&service, pump.id)
        .into_iter()
        .find(|row| row.name == "tint")
        .unwrap();
    assert_eq!(tint.kind, "Color");
    assert_eq!(tint.enum_id, Some(color[0].id));

    let p1 = single(&service, EntityKind::Instance, "p1");
    let v1 = single(&service, EntityKind::Instance, "v1");
    assert_eq!(p1.type_id, Some(pump.id));
    assert_eq!(v1.parent_id, Some(p1.id));
    assert_eq!(v1.type_id, Some(valve.id));

    let values: Vec<_> = service
        .list_attached(EntityKind::InstanceData, p1.id)
        .unwrap()
        .iter()
        .map(|record| {
            (
                record.text("dataKey").unwrap().to_string(),
                record.text("dataValue").unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        values,
        vec![
            ("power".to_string(), "7.5".to_string()),
            ("tint".to_string(), "2".to_string())
        ]
    );
}

#[test]
fn reloading_same_document_yields_same_structure() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let doc = plant_document();
    let loader = BulkLoader::new(&service);

    let first = loader.load(&doc).unwrap();
    let snapshot = structure(&service);
    let first_pump = single(&service, EntityKind::Type, "Pump").id;

    let second = loader.load(&doc).unwrap();
    assert_eq!(structure(&service), snapshot);
    assert_eq!(second.wiped_rows, first.rows_created as u64);
    assert_ne!(single(&service, EntityKind::Type, "Pump").id, first_pump);
}

#[test]
fn failing_entry_does_not_stop_siblings() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let doc = document(json!({
        "enums": {"Broken": {"Red": "not a number"}, "Color": {"Red": 1}},
        "types": {"Bad": {"weight": 5}, "Pump": {"power": "number"}},
        "instances": {"odd": [1, 2], "plant1": "Pump"}
    }));

    let report = BulkLoader::new(&service).load(&doc).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.enums_loaded, 1);
    assert_eq!(report.types_loaded, 1);
    assert_eq!(report.instances_loaded, 1);

    let failed: Vec<_> = report
        .failures
        .iter()
        .map(|failure| (failure.pass, failure.name.as_str()))
        .collect();
    assert_eq!(
        failed,
        vec![
            (LoadPass::Enums, "Broken"),
            (LoadPass::Types, "Bad"),
            (LoadPass::Instances, "odd")
        ]
    );
    assert!(report
        .failures
        .iter()
        .all(|failure| matches!(failure.error, BulkLoadError::InvalidDescriptor { .. })));

    assert!(named(&service, EntityKind::Enum, "Broken").is_empty());
    assert!(named(&service, EntityKind::Type, "Bad").is_empty());
    assert_eq!(named(&service, EntityKind::Instance, "plant1").len(), 1);
}

#[test]
fn malformed_child_drops_only_its_subtree() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let doc = document(json!({
        "types": {"Pump": {"power": "number"}},
        "instances": {"plant1": {"type": "Pump", "children": {"ok": "Pump", "bad": [1]}}}
    }));

    let report = BulkLoader::new(&service).load(&doc).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.instances_loaded, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].pass, LoadPass::Instances);
    assert_eq!(report.failures[0].name, "plant1.bad");

    let plant = single(&service, EntityKind::Instance, "plant1");
    let ok = single(&service, EntityKind::Instance, "ok");
    assert_eq!(ok.parent_id, Some(plant.id));
    assert!(named(&service, EntityKind::Instance, "bad").is_empty());
    let names: BTreeSet<_> = service
        .get_all(EntityKind::Instance)
        .unwrap()
        .iter()
        .map(|record| record.text("name").unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        BTreeSet::from(["root".to_string(), "plant1".to_string(), "ok".to_string()])
    );
}

#[test]
fn unresolved_names_become_null_links() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let doc = document(json!({
        "types": {"Pump": {"tint": "Colour"}},
        "instances": {"ghost": {"type": "Missing"}}
    }));

    let report = BulkLoader::new(&service).load(&doc).unwrap();
    assert!(report.is_complete());

    let pump = single(&service, EntityKind::Type, "Pump");
    let tint = &type_data(&service, pump.id)[0];
    assert_eq!(tint.kind, "Colour");
    assert_eq!(tint.enum_id, None);

    let ghost = single(&service, EntityKind::Instance, "ghost");
    assert_eq!(ghost.type_id, None);
}

#[test]
fn instance_object_without_type_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let doc = document(json!({"instances": {"plant1": {"children": {}}}}));

    let report = BulkLoader::new(&service).load(&doc).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(named(&service, EntityKind::Instance, "plant1").is_empty());
}

#[test]
fn load_replaces_previous_content() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let loader = BulkLoader::new(&service);
    loader.load(&plant_document()).unwrap();

    let report = loader
        .load(&document(json!({"types": {"Motor": {}}})))
        .unwrap();
    assert!(report.wiped_rows > 0);
    assert!(named(&service, EntityKind::Type, "Pump").is_empty());
    assert!(named(&service, EntityKind::Enum, "Color").is_empty());
    assert_eq!(service.get_all(EntityKind::InstanceData).unwrap().len(), 0);
    assert_eq!(service.get_all(EntityKind::Instance).unwrap().len(), 1);
    assert_eq!(service.get_all(EntityKind::Type).unwrap().len(), 2);
}

#[test]
fn document_from_path_reads_file_and_keeps_key_order() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"types": {{"Zeta": {{}}, "Alpha": {{}}}}, "instances": {{}}}}"#
    )
    .unwrap();

    let doc = BulkDocument::from_path(file.path()).unwrap();
    let keys: Vec<_> = doc.types.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["Zeta", "Alpha"]);
    assert!(doc.enums.is_empty());
}

#[test]
fn document_errors_distinguish_io_and_parse() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        BulkDocument::from_path(dir.path().join("missing.json")),
        Err(BulkLoadError::Io { .. })
    ));
    assert!(matches!(
        BulkDocument::from_json_str(r#"{"types": []}"#),
        Err(BulkLoadError::Parse(_))
    ));
}
