use geosurvey_core::db::open_db_in_memory;
use geosurvey_core::service::form_sync::{AttributeDraft, ObjectDraft, OptionDraft};
use geosurvey_core::{
    AttributeKind, ChangeBus, DataTable, FormSyncService, FormTree, GeoPoint,
    ObservationRepository, ProjectLocks, SchemaRepository, SqliteObservationRepository,
    SqliteSchemaRepository, SurveyService, SyncError,
};
use rusqlite::Connection;
use std::sync::Arc;

fn service(conn: &Connection) -> (FormSyncService<'_>, Arc<ChangeBus>) {
    let bus = Arc::new(ChangeBus::new());
    let service =
        FormSyncService::try_new(conn, Arc::new(ProjectLocks::new()), bus.clone()).unwrap();
    (service, bus)
}

fn attribute(label: &str, kind: AttributeKind, options: &[&str]) -> AttributeDraft {
    AttributeDraft {
        id: None,
        label: label.to_string(),
        kind,
        required: false,
        options: options
            .iter()
            .map(|text| OptionDraft {
                id: None,
                text: text.to_string(),
            })
            .collect(),
    }
}

fn object(name: &str, color: Option<&str>, attributes: Vec<AttributeDraft>) -> ObjectDraft {
    ObjectDraft {
        id: None,
        name: name.to_string(),
        color: color.map(str::to_string),
        attributes,
    }
}

fn tree_form() -> FormTree {
    FormTree {
        objects: vec![object(
            "Tree",
            Some("#7FD87F"),
            vec![
                attribute("Condition", AttributeKind::Select, &["Good", "Medium", "Bad"]),
                attribute("Height", AttributeKind::Number, &[]),
            ],
        )],
    }
}

#[test]
fn first_sync_inserts_everything_and_writes_ids_back() {
    let conn = open_db_in_memory().unwrap();
    let project = SqliteSchemaRepository::try_new(&conn)
        .unwrap()
        .create_project("Park")
        .unwrap();
    let (sync, bus) = service(&conn);

    let mut form = tree_form();
    let report = sync.sync(project, &mut form).unwrap();

    assert_eq!(report.inserted, 6);
    assert_eq!(report.updated, 0);
    assert_eq!(report.deleted, 0);
    let tree = &form.objects[0];
    assert!(tree.id.is_some());
    assert!(tree.attributes.iter().all(|draft| draft.id.is_some()));
    assert!(tree.attributes[0]
        .options
        .iter()
        .all(|draft| draft.id.is_some()));
    assert_eq!(bus.revision(DataTable::ObjectTypes), 1);
    assert_eq!(bus.revision(DataTable::Observations), 0);
}

#[test]
fn unchanged_tree_performs_zero_writes() {
    let conn = open_db_in_memory().unwrap();
    let project = SqliteSchemaRepository::try_new(&conn)
        .unwrap()
        .create_project("Park")
        .unwrap();
    let (sync, bus) = service(&conn);

    let mut form = tree_form();
    sync.sync(project, &mut form).unwrap();
    let revision = bus.global_revision();

    let report = sync.sync(project, &mut form).unwrap();
    assert_eq!(report.writes(), 0);
    assert_eq!(bus.global_revision(), revision, "no-op pass must not publish");

    let mut loaded = sync.load_tree(project).unwrap();
    assert_eq!(loaded, form);
    assert_eq!(sync.sync(project, &mut loaded).unwrap().writes(), 0);
}

#[test]
fn drafts_without_ids_match_existing_rows_by_name() {
    let conn = open_db_in_memory().unwrap();
    let project = SqliteSchemaRepository::try_new(&conn)
        .unwrap()
        .create_project("Park")
        .unwrap();
    let (sync, _bus) = service(&conn);

    let mut first = tree_form();
    sync.sync(project, &mut first).unwrap();

    let mut fresh = tree_form();
    let report = sync.sync(project, &mut fresh).unwrap();
    assert_eq!(report.writes(), 0);
    assert_eq!(fresh, first);
}

#[test]
fn edits_update_reorder_and_delete() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let (sync, _bus) = service(&conn);

    let mut form = tree_form();
    form.objects
        .push(object("Bench", None, vec![attribute("Material", AttributeKind::Text, &[])]));
    sync.sync(project, &mut form).unwrap();

    let tree = &mut form.objects[0];
    tree.color = Some("#336699".to_string());
    tree.attributes.swap(0, 1);
    tree.attributes[1].options.retain(|option| option.text != "Medium");
    tree.attributes[1].options.push(OptionDraft {
        id: None,
        text: "Dead".to_string(),
    });
    form.objects.remove(1);

    let report = sync.sync(project, &mut form).unwrap();
    // Tree color + two attribute reorders; Dead option.
    assert_eq!(report.updated, 3);
    assert_eq!(report.inserted, 1);
    // Bench (its attribute cascades) + Medium option.
    assert_eq!(report.deleted, 2);

    let stored = repo.load_project_tree(project).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].object_type.color.as_deref(), Some("#336699"));
    assert_eq!(stored[0].attributes[0].attribute.label, "Height");
    let options = stored[0].attributes[1]
        .options
        .iter()
        .map(|option| option.value_text.as_str())
        .collect::<Vec<_>>();
    assert_eq!(options, vec!["Good", "Bad", "Dead"]);
}

#[test]
fn label_swap_between_two_attributes_succeeds() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let (sync, _bus) = service(&conn);

    let mut form = FormTree {
        objects: vec![object(
            "Tree",
            None,
            vec![
                attribute("Height", AttributeKind::Number, &[]),
                attribute("Width", AttributeKind::Number, &[]),
            ],
        )],
    };
    sync.sync(project, &mut form).unwrap();
    let height_id = form.objects[0].attributes[0].id;

    form.objects[0].attributes[0].label = "Width".to_string();
    form.objects[0].attributes[1].label = "Height".to_string();
    sync.sync(project, &mut form).unwrap();

    let stored = repo
        .list_attributes(form.objects[0].id.unwrap())
        .unwrap();
    assert_eq!(Some(stored[0].id), height_id);
    assert_eq!(stored[0].key, "width");
    assert_eq!(stored[1].key, "height");
}

#[test]
fn leaving_select_kind_drops_the_option_catalog() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let (sync, _bus) = service(&conn);

    let mut form = tree_form();
    sync.sync(project, &mut form).unwrap();

    form.objects[0].attributes[0].kind = AttributeKind::Text;
    let report = sync.sync(project, &mut form).unwrap();

    assert_eq!(report.deleted, 3);
    assert!(form.objects[0].attributes[0].options.is_empty());
    let attribute_id = form.objects[0].attributes[0].id.unwrap();
    assert!(repo.list_options(attribute_id).unwrap().is_empty());
}

#[test]
fn duplicate_derived_keys_are_rejected_without_writes() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let (sync, bus) = service(&conn);

    let mut form = FormTree {
        objects: vec![object(
            "Tree",
            None,
            vec![
                attribute("Leaf Type", AttributeKind::Text, &[]),
                attribute("leaf-type", AttributeKind::Text, &[]),
            ],
        )],
    };
    let before = form.clone();
    let err = sync.sync(project, &mut form).unwrap_err();

    assert!(matches!(err, SyncError::DuplicateKey { ref key, .. } if key == "leaf_type"));
    assert_eq!(form, before);
    assert!(repo.list_object_types(project).unwrap().is_empty());
    assert_eq!(bus.global_revision(), 0);
}

#[test]
fn failure_late_in_the_pass_rolls_back_earlier_writes() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let (sync, _bus) = service(&conn);

    let mut form = tree_form();
    form.objects.push(object("   ", None, Vec::new()));
    let before = form.clone();

    assert!(matches!(
        sync.sync(project, &mut form),
        Err(SyncError::Repo(_))
    ));
    assert_eq!(form, before);
    assert!(repo.list_object_types(project).unwrap().is_empty());
}

#[test]
fn deleting_an_object_type_publishes_observation_tables() {
    let conn = open_db_in_memory().unwrap();
    let project = SqliteSchemaRepository::try_new(&conn)
        .unwrap()
        .create_project("Park")
        .unwrap();
    let (sync, bus) = service(&conn);

    let mut form = tree_form();
    sync.sync(project, &mut form).unwrap();

    form.objects.clear();
    let report = sync.sync(project, &mut form).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(bus.revision(DataTable::Observations), 1);
    assert_eq!(bus.revision(DataTable::ObservationAnswers), 1);
}

#[test]
fn other_projects_are_never_touched() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let park = repo.create_project("Park").unwrap();
    let street = repo.create_project("Street").unwrap();
    let lamp = repo.add_object_type(street, "Lamp", None).unwrap();
    let (sync, _bus) = service(&conn);

    let mut form = FormTree {
        objects: vec![ObjectDraft {
            id: Some(lamp),
            ..object("Lamp", None, Vec::new())
        }],
    };
    let report = sync.sync(park, &mut form).unwrap();

    assert_eq!(report.inserted, 1);
    assert_ne!(form.objects[0].id, Some(lamp));
    assert_eq!(repo.list_object_types(street).unwrap().len(), 1);
}

#[test]
fn unknown_project_is_reported() {
    let conn = open_db_in_memory().unwrap();
    let (sync, _bus) = service(&conn);

    let mut form = tree_form();
    assert!(matches!(
        sync.sync(42, &mut form),
        Err(SyncError::ProjectNotFound(42))
    ));
    assert!(matches!(
        sync.load_tree(42),
        Err(SyncError::ProjectNotFound(42))
    ));
}

#[test]
fn renamed_card_keeps_its_row_when_a_same_named_card_is_added_above() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let project = repo.create_project("Park").unwrap();
    let (sync, _bus) = service(&conn);

    let mut form = tree_form();
    sync.sync(project, &mut form).unwrap();
    let tree_id = form.objects[0].id.unwrap();
    let height_id = form.objects[0].attributes[1].id.unwrap();
    let survey = SurveyService::try_new(&conn, Arc::new(ChangeBus::new())).unwrap();
    let saved = survey
        .save_observation(project, tree_id, GeoPoint::new(52.0, 6.0), &[])
        .unwrap();

    form.objects[0].name = "Oak".to_string();
    form.objects[0].attributes[1].label = "Size".to_string();
    form.objects[0]
        .attributes
        .insert(0, attribute("Height", AttributeKind::Number, &[]));
    form.objects.insert(0, object("Tree", None, vec![]));
    let report = sync.sync(project, &mut form).unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(form.objects[1].id, Some(tree_id));
    assert_ne!(form.objects[0].id, Some(tree_id));
    assert_eq!(form.objects[1].attributes[2].id, Some(height_id));
    assert_ne!(form.objects[1].attributes[0].id, Some(height_id));

    let oak = repo.get_object_type(tree_id).unwrap().unwrap();
    assert_eq!(oak.name, "Oak");
    let size = repo.get_attribute(height_id).unwrap().unwrap();
    assert_eq!(size.key, "size");
    let observation = SqliteObservationRepository::try_new(&conn)
        .unwrap()
        .get_observation(saved.observation_id)
        .unwrap()
        .unwrap();
    assert_eq!(observation.object_type_id, tree_id);
}
