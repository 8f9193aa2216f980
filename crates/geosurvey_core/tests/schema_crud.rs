use geosurvey_core::db::open_db_in_memory;
use geosurvey_core::{
    derive_key, AttributeKind, ChangeBus, DataTable, EntityRef, ProjectService, RepoError,
    SchemaRepository, SqliteSchemaRepository, ValidationError,
};
use rusqlite::Connection;
use std::sync::Arc;

#[test]
fn create_list_rename_project() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();

    let first = repo.create_project("  Morning Walk ").unwrap();
    let second = repo.create_project("Evening Walk").unwrap();

    let projects = repo.list_projects().unwrap();
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].id, second, "newest project comes first");
    assert_eq!(projects[1].name, "Morning Walk");

    repo.rename_project(first, "Dawn Walk").unwrap();
    assert_eq!(repo.get_project(first).unwrap().unwrap().name, "Dawn Walk");
}

#[test]
fn blank_project_name_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();

    let err = repo.create_project("   ").unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::BlankName(_))
    ));
}

#[test]
fn default_project_is_created_once() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();

    let first = repo.get_or_create_default_project().unwrap();
    let second = repo.get_or_create_default_project().unwrap();
    assert_eq!(first, second);
    assert_eq!(repo.list_projects().unwrap().len(), 1);
}

#[test]
fn object_type_order_index_grows_per_project() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let other = repo.create_project("Street").unwrap();

    repo.add_object_type(project, "Tree", Some("#7FD87F")).unwrap();
    repo.add_object_type(project, "Bench", None).unwrap();
    repo.add_object_type(other, "Lamp", Some("fc0")).unwrap();

    let park = repo.list_object_types(project).unwrap();
    let indexes = park.iter().map(|row| row.order_index).collect::<Vec<_>>();
    assert_eq!(indexes, vec![0, 1]);
    assert_eq!(park[0].color.as_deref(), Some("#7FD87F"));
    assert_eq!(park[1].color, None);

    let street = repo.list_object_types(other).unwrap();
    assert_eq!(street.len(), 1);
    assert_eq!(street[0].order_index, 0);
    assert_eq!(street[0].color.as_deref(), Some("#fc0"));
}

#[test]
fn invalid_color_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();

    let err = repo
        .add_object_type(project, "Tree", Some("green"))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::InvalidColor(_))
    ));
}

#[test]
fn object_type_on_missing_project_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();

    let err = repo.add_object_type(77, "Tree", None).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(EntityRef::Project(77))));
}

#[test]
fn attribute_key_is_derived_and_unique_per_object_type() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let tree = repo.add_object_type(project, "Tree", None).unwrap();
    let bench = repo.add_object_type(project, "Bench", None).unwrap();

    let id = repo
        .add_attribute(tree, " Trunk Diameter (cm) ", AttributeKind::Number, None)
        .unwrap();
    let attribute = repo.get_attribute(id).unwrap().unwrap();
    assert_eq!(attribute.label, "Trunk Diameter (cm)");
    assert_eq!(attribute.key, "trunk_diameter_cm");
    assert_eq!(attribute.order_index, 0);
    assert!(!attribute.required);

    let err = repo
        .add_attribute(tree, "trunk-diameter cm", AttributeKind::Text, None)
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::DuplicateKey(ref key)) if key == "trunk_diameter_cm"
    ));

    repo.add_attribute(bench, "Trunk Diameter (cm)", AttributeKind::Number, None)
        .unwrap();
}

#[test]
fn punctuation_only_label_cannot_form_a_key() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let tree = repo.add_object_type(project, "Tree", None).unwrap();

    assert_eq!(derive_key("?!"), "");
    let err = repo
        .add_attribute(tree, "?!", AttributeKind::Text, None)
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::EmptyKey(_))
    ));
}

#[test]
fn load_project_tree_orders_children() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let tree = repo.add_object_type(project, "Tree", Some("#7FD87F")).unwrap();
    let condition = repo
        .add_attribute(tree, "Condition", AttributeKind::Select, None)
        .unwrap();
    repo.add_attribute(tree, "Height", AttributeKind::Number, None)
        .unwrap();
    for option in ["Good", "Medium", "Bad"] {
        repo.add_option(condition, option).unwrap();
    }

    let loaded = repo.load_project_tree(project).unwrap();
    assert_eq!(loaded.len(), 1);
    let labels = loaded[0]
        .attributes
        .iter()
        .map(|item| item.attribute.label.as_str())
        .collect::<Vec<_>>();
    assert_eq!(labels, vec!["Condition", "Height"]);
    let options = loaded[0].attributes[0]
        .options
        .iter()
        .map(|option| option.value_text.as_str())
        .collect::<Vec<_>>();
    assert_eq!(options, vec!["Good", "Medium", "Bad"]);
    assert!(loaded[0].attributes[1].options.is_empty());
}

#[test]
fn deleting_project_cascades_to_every_child_table() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let keep = repo.create_project("Street").unwrap();
    let tree = repo.add_object_type(project, "Tree", None).unwrap();
    let condition = repo
        .add_attribute(tree, "Condition", AttributeKind::Select, None)
        .unwrap();
    repo.add_option(condition, "Good").unwrap();
    conn.execute_batch(&format!(
        "INSERT INTO survey_sessions (id, project_id, started_at) VALUES (1, {project}, 1);
         INSERT INTO observations (id, session_id, object_type_id, latitude, longitude, captured_at)
         VALUES (1, 1, {tree}, 52.0, 6.0, 1);
         INSERT INTO attribute_coordinate_values (observation_id, attribute_id, value_text)
         VALUES (1, {condition}, 'Good');"
    ))
    .unwrap();

    repo.delete_project(project).unwrap();

    for table in [
        "object_types",
        "attributes",
        "attribute_values",
        "survey_sessions",
        "observations",
        "attribute_coordinate_values",
    ] {
        assert_eq!(row_count(&conn, table), 0, "{table} kept orphan rows");
    }
    assert!(repo.get_project(keep).unwrap().is_some());
    assert!(matches!(
        repo.delete_project(project),
        Err(RepoError::NotFound(EntityRef::Project(_)))
    ));
}

#[test]
fn wipe_all_empties_the_store() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    repo.add_object_type(project, "Tree", None).unwrap();

    repo.wipe_all().unwrap();

    assert_eq!(row_count(&conn, "projects"), 0);
    assert_eq!(row_count(&conn, "object_types"), 0);
}

#[test]
fn service_publishes_only_after_successful_writes() {
    let conn = open_db_in_memory().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let service = ProjectService::new(SqliteSchemaRepository::try_new(&conn).unwrap(), bus.clone());

    let project = service.create_project("Park").unwrap();
    assert_eq!(bus.revision(DataTable::Projects), 1);

    assert!(service.create_project(" ").is_err());
    assert_eq!(bus.revision(DataTable::Projects), 1);

    let tree = service.add_object_type(project.id, "Tree", None).unwrap();
    assert_eq!(bus.revision(DataTable::ObjectTypes), 1);

    service.delete_object_type(tree).unwrap();
    assert_eq!(bus.revision(DataTable::ObjectTypes), 2);
    assert_eq!(bus.revision(DataTable::Observations), 1);
    assert_eq!(bus.revision(DataTable::Projects), 1);
}

#[test]
fn service_update_attribute_rekeys_and_drops_options_when_leaving_select() {
    let conn = open_db_in_memory().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let service = ProjectService::new(SqliteSchemaRepository::try_new(&conn).unwrap(), bus.clone());
    let project = service.create_project("Park").unwrap();
    let tree = service.add_object_type(project.id, "Tree", None).unwrap();
    let kind = service
        .add_attribute(tree, "Leaf Type", AttributeKind::Select)
        .unwrap();
    service.add_option(kind, "Needle").unwrap();
    service.add_option(kind, "Broad").unwrap();

    let updated = service
        .update_attribute(kind, "Leaf Shape", AttributeKind::Text, true)
        .unwrap();
    assert_eq!(updated.key, "leaf_shape");
    assert!(updated.required);

    let tree_rows = service.load_tree(project.id).unwrap();
    assert!(tree_rows[0].attributes[0].options.is_empty());
    assert_eq!(bus.revision(DataTable::AttributeOptions), 3);
}

#[test]
fn service_rejects_options_on_non_select_attribute() {
    let conn = open_db_in_memory().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let service = ProjectService::new(SqliteSchemaRepository::try_new(&conn).unwrap(), bus);
    let project = service.create_project("Park").unwrap();
    let tree = service.add_object_type(project.id, "Tree", None).unwrap();
    let height = service
        .add_attribute(tree, "Height", AttributeKind::Number)
        .unwrap();

    let err = service.add_option(height, "Tall").unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::OptionsNotAllowed("number"))
    ));
}

#[test]
fn repository_rejects_options_on_boolean_attribute() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Street").unwrap();
    let car = repo.add_object_type(project, "Car", None).unwrap();
    let parked = repo
        .add_attribute(car, "Parked Legal", AttributeKind::Boolean, None)
        .unwrap();

    let err = repo.add_option(parked, "maybe").unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::OptionsNotAllowed("boolean"))
    ));
    assert!(repo.list_options(parked).unwrap().is_empty());
    assert!(matches!(
        repo.add_option(404, "x").unwrap_err(),
        RepoError::NotFound(_)
    ));
}

fn row_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}
