use rusqlite::Connection;
use serde_json::json;
use typetree_core::db::open_db_in_memory;
use typetree_core::service::view_model::Crumb;
use typetree_core::{
    BulkDocument, BulkLoader, DisplayValue, EntityKind, FieldValue, NodeRow, RowId,
    SqliteKindRepository, TreeService, ViewError, ViewModel,
};

type Service<'conn> = TreeService<SqliteKindRepository<'conn>>;

fn loaded_service(conn: &Connection) -> Service<'_> {
    let service = TreeService::new(SqliteKindRepository::try_new(conn).unwrap());
    let doc = BulkDocument::from_json_str(
        &json!({
            "enums": {"Color": {"Red": 1, "Blue": 2}},
            "types": {
                "Plant": {
                    "area": "text",
                    "Pump": {"power": "number", "load": "percent", "tint": "Color", "running": "boolean"},
                    "Tank": {}
                }
            },
            "instances": {
                "plant1": {
                    "type": "Plant",
                    "children": {
                        "p1": {
                            "type": "Pump",
                            "data": {"load": 12.345, "tint": 2, "running": 0}
                        }
                    }
                },
                "stray": {"type": "Nowhere"}
            }
        })
        .to_string(),
    )
    .unwrap();
    BulkLoader::new(&service).load(&doc).unwrap();
    service
}

fn id_of(service: &Service<'_>, kind: EntityKind, name: &str) -> RowId {
    service
        .find_by(kind, "name", &FieldValue::Text(name.to_string()))
        .unwrap()[0]
        .id
}

fn crumb_names(crumbs: &[Crumb]) -> Vec<&str> {
    crumbs.iter().map(|crumb| crumb.name.as_str()).collect()
}

#[test]
fn breadcrumbs_run_from_outermost_ancestor_to_node_excluding_root() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let p1 = id_of(&service, EntityKind::Instance, "p1");
    let v1 = service
        .create(
            EntityKind::Instance,
            json!({"name": "v1", "parentId": p1}).as_object().unwrap(),
        )
        .unwrap();

    let view = ViewModel::load(&service).unwrap();
    let crumbs = view.breadcrumbs(v1);
    assert_eq!(crumb_names(&crumbs), vec!["plant1", "p1", "v1"]);
    assert_eq!(crumbs[1].id, p1);

    let plant = id_of(&service, EntityKind::Instance, "plant1");
    assert_eq!(crumb_names(&view.breadcrumbs(plant)), vec!["plant1"]);
    let root = id_of(&service, EntityKind::Instance, "root");
    assert!(view.breadcrumbs(root).is_empty());
}

#[test]
fn instance_properties_render_declared_kinds_sorted_by_name() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let p1 = id_of(&service, EntityKind::Instance, "p1");

    let view = ViewModel::load(&service).unwrap();
    let properties = view.instance_properties(p1).unwrap();
    let rendered: Vec<_> = properties
        .iter()
        .map(|property| (property.name.as_str(), property.display.to_string()))
        .collect();
    assert_eq!(
        rendered,
        vec![
            ("load", "12.35%".to_string()),
            ("power", "unset".to_string()),
            ("running", "false".to_string()),
            ("tint", "Blue".to_string()),
        ]
    );
    assert_eq!(properties[2].display, DisplayValue::Boolean(false));
    assert_eq!(properties[1].raw, None);
}

#[test]
fn property_kind_defaults_to_number() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let pump = id_of(&service, EntityKind::Type, "Pump");

    let view = ViewModel::load(&service).unwrap();
    assert_eq!(view.property_kind(pump, "tint").unwrap(), "Color");
    assert_eq!(view.property_kind(pump, "undeclared").unwrap(), "number");
}

#[test]
fn child_types_follow_the_instance_type() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let plant = id_of(&service, EntityKind::Instance, "plant1");
    let p1 = id_of(&service, EntityKind::Instance, "p1");

    let view = ViewModel::load(&service).unwrap();
    let names: Vec<_> = view
        .child_types(plant)
        .unwrap()
        .into_iter()
        .map(|node| node.name.as_str())
        .collect();
    assert_eq!(names, vec!["Pump", "Tank"]);
    assert!(view.child_types(p1).unwrap().is_empty());
}

#[test]
fn type_lookups_follow_instance_type_id() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let p1 = id_of(&service, EntityKind::Instance, "p1");
    let pump = id_of(&service, EntityKind::Type, "Pump");

    let mut view = ViewModel::load(&service).unwrap();
    let instance = view.instance_node(p1).cloned().unwrap();
    assert_eq!(view.type_node_of(&instance).map(|node| node.id), Some(pump));
    assert_eq!(view.load_type_node(&instance).unwrap().name, "Pump");
    assert_eq!(view.type_node(pump).map(|node| node.name.as_str()), Some("Pump"));
}

#[test]
fn load_type_node_fetches_types_created_after_snapshot() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let mut view = ViewModel::load(&service).unwrap();

    let root = id_of(&service, EntityKind::Type, "root");
    let motor = service
        .create(
            EntityKind::Type,
            json!({"name": "Motor", "parentId": root}).as_object().unwrap(),
        )
        .unwrap();
    let instance = NodeRow {
        id: 900,
        name: "m1".to_string(),
        parent_id: None,
        type_id: Some(motor),
    };

    assert!(view.type_node_of(&instance).is_none());
    assert_eq!(view.load_type_node(&instance).unwrap().id, motor);
    assert!(view.type_node(motor).is_some());
}

#[test]
fn instance_without_type_fails_explicitly() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let stray = id_of(&service, EntityKind::Instance, "stray");

    let mut view = ViewModel::load(&service).unwrap();
    let instance = view.instance_node(stray).cloned().unwrap();
    assert!(matches!(
        view.load_type_node(&instance),
        Err(ViewError::MissingTypeId { instance_id }) if instance_id == stray
    ));
    assert!(matches!(
        view.instance_properties(stray),
        Err(ViewError::MissingTypeId { .. })
    ));
}

#[test]
fn view_model_formats_against_loaded_enums() {
    let conn = open_db_in_memory().unwrap();
    let service = loaded_service(&conn);
    let view = ViewModel::load(&service).unwrap();

    assert_eq!(view.enums().len(), 1);
    assert_eq!(view.format_value("Color", Some("1")).to_string(), "Red");
    assert_eq!(
        view.format_value("Color", Some("99")).to_string(),
        "bad enum value 99"
    );
    assert_eq!(view.format_value("percent", None), DisplayValue::Unset);
}
