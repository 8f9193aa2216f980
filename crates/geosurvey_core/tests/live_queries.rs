use geosurvey_core::db::open_db_in_memory;
use geosurvey_core::live::{
    load_observation_feed, observation_feed_query, observations_by_object_type,
    project_list_query, project_tree_query,
};
use geosurvey_core::service::survey_service::AnswerInput;
use geosurvey_core::{
    AttributeKind, ChangeBus, DataTable, GeoPoint, LiveQuery, ProjectService, SchemaRepository,
    SqliteSchemaRepository, SurveyService, VisibilityFilter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn project_list_reloads_only_after_a_publish() {
    let conn = open_db_in_memory().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let service = ProjectService::new(SqliteSchemaRepository::try_new(&conn).unwrap(), bus.clone());
    let mut query = project_list_query();

    assert!(query.is_stale(&bus));
    assert!(query.get(&conn, &bus).unwrap().is_empty());
    assert!(!query.is_stale(&bus));

    service.create_project("Park").unwrap();
    assert!(query.is_stale(&bus));
    let names = query
        .get(&conn, &bus)
        .unwrap()
        .iter()
        .map(|project| project.name.clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Park"]);
}

#[test]
fn unrelated_tables_do_not_trigger_reload() {
    let conn = open_db_in_memory().unwrap();
    let bus = ChangeBus::new();
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let mut query = LiveQuery::new(&[DataTable::Projects], move |_conn| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    query.get(&conn, &bus).unwrap();
    query.get(&conn, &bus).unwrap();
    bus.publish(&[DataTable::Observations]);
    query.get(&conn, &bus).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    bus.publish(&[DataTable::Projects]);
    query.get(&conn, &bus).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);

    query.invalidate();
    assert!(query.is_stale(&bus));
    query.get(&conn, &bus).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 3);
}

#[test]
fn project_tree_follows_schema_edits() {
    let conn = open_db_in_memory().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let service = ProjectService::new(SqliteSchemaRepository::try_new(&conn).unwrap(), bus.clone());
    let project = service.create_project("Park").unwrap();
    let mut query = project_tree_query(project.id);

    assert!(query.get(&conn, &bus).unwrap().is_empty());
    let tree = service.add_object_type(project.id, "Tree", None).unwrap();
    service
        .add_attribute(tree, "Condition", AttributeKind::Select)
        .unwrap();

    let loaded = query.get(&conn, &bus).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].attributes[0].attribute.key, "condition");
}

#[test]
fn feed_filters_hidden_markers_and_scopes_by_project() {
    let conn = open_db_in_memory().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let park = repo.create_project("Park").unwrap();
    let street = repo.create_project("Street").unwrap();
    let tree = repo.add_object_type(park, "Tree", Some("#7FD87F")).unwrap();
    let height = repo
        .add_attribute(tree, "Height", AttributeKind::Number, None)
        .unwrap();
    let lamp = repo.add_object_type(street, "Lamp", None).unwrap();
    let survey = SurveyService::try_new(&conn, bus.clone()).unwrap();

    let shown = survey
        .save_observation(
            park,
            tree,
            GeoPoint::new(52.0, 6.0),
            &[AnswerInput::new(height, "12")],
        )
        .unwrap();
    let hidden = survey
        .save_observation(park, tree, GeoPoint::new(52.1, 6.1), &[])
        .unwrap();
    survey.set_map_visible(hidden.observation_id, false).unwrap();
    survey
        .save_observation(street, lamp, GeoPoint::new(52.2, 6.2), &[])
        .unwrap();

    let all = load_observation_feed(&conn, park, VisibilityFilter::All).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].observation.id, hidden.observation_id, "newest first");

    let mut visible = observation_feed_query(park, VisibilityFilter::MapVisibleOnly);
    let items = visible.get(&conn, &bus).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].observation.id, shown.observation_id);
    assert_eq!(items[0].object_type_name, "Tree");
    assert_eq!(items[0].color.as_deref(), Some("#7FD87F"));
    assert_eq!(items[0].marker_color(), "#7FD87F");
    assert_eq!(items[0].answers[0].value_text.as_deref(), Some("12"));

    survey.set_map_visible(hidden.observation_id, true).unwrap();
    assert!(visible.is_stale(&bus));
    assert_eq!(visible.get(&conn, &bus).unwrap().len(), 2);
}

#[test]
fn feed_groups_by_object_type_in_first_seen_order() {
    let conn = open_db_in_memory().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let repo = SqliteSchemaRepository::try_new(&conn).unwrap();
    let park = repo.create_project("Park").unwrap();
    let tree = repo.add_object_type(park, "Tree", None).unwrap();
    let bench = repo.add_object_type(park, "Bench", None).unwrap();
    let survey = SurveyService::try_new(&conn, bus).unwrap();
    for object_type in [tree, bench, tree] {
        survey
            .save_observation(park, object_type, GeoPoint::new(52.0, 6.0), &[])
            .unwrap();
    }

    let feed = load_observation_feed(&conn, park, VisibilityFilter::All).unwrap();
    let groups = observations_by_object_type(feed);

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].object_type_name, "Tree");
    assert_eq!(groups[0].items.len(), 2);
    assert_eq!(groups[0].color, None);
    assert_eq!(groups[0].marker_color(), "#cccccc");
    assert_eq!(groups[0].items[0].marker_color(), "#cccccc");
    assert_eq!(groups[1].object_type_id, bench);
    assert_eq!(groups[1].items.len(), 1);
}
