//! End-to-end scenarios over a small two-entity graph (`Scene` -> `Performer`),
//! exercising the identity map, dirty tracking, `to_input`, and populate
//! against a scripted transport.

use std::sync::Arc;

use entitygraph::field::FieldValue;
use entitygraph::{Entity, Store};
use entitygraph_macros::Entity as DeriveEntity;
use serde_json::json;

#[derive(Default, DeriveEntity)]
#[entity(type_name = "Performer", create_input = "PerformerCreateInput", update_input = "PerformerUpdateInput")]
struct PerformerFields {
    #[entity(id)]
    id: Option<String>,
    #[entity(tracked)]
    name: FieldValue<String>,
    #[entity(
        relationship,
        target = "SceneFields",
        target_field = "scene_ids",
        query_field = "scenes",
        list,
        inverse_query_field = "performers"
    )]
    scenes: FieldValue<Vec<Entity<SceneFields>>>,
}

#[derive(Default, DeriveEntity)]
#[entity(type_name = "Scene", create_input = "SceneCreateInput", update_input = "SceneUpdateInput")]
struct SceneFields {
    #[entity(id)]
    id: Option<String>,
    #[entity(tracked, input_key = "title")]
    title: FieldValue<String>,
    #[entity(tracked, input_key = "rating100")]
    rating: FieldValue<i32>,
    #[entity(
        relationship,
        target = "PerformerFields",
        target_field = "performer_ids",
        query_field = "performers",
        list,
        inverse_query_field = "scenes"
    )]
    performers: FieldValue<Vec<Entity<PerformerFields>>>,
}

#[derive(Default, DeriveEntity)]
#[entity(type_name = "Studio", create_input = "StudioCreateInput", update_input = "StudioUpdateInput")]
struct StudioFields {
    #[entity(id)]
    id: Option<String>,
    #[entity(tracked)]
    name: FieldValue<String>,
    #[entity(
        relationship,
        target = "SceneFields",
        target_field = "scene_ids",
        query_field = "scenes",
        list,
        inverse_query_field = "studio",
        strategy = "filter_query"
    )]
    scenes: FieldValue<Vec<Entity<SceneFields>>>,
}

fn store() -> Arc<Store> {
    Arc::new(Store::default())
}

#[test]
fn materialize_hoists_nested_entities_and_assigns_identity() {
    let store = store();
    let payload = json!({
        "id": "1",
        "title": "Pilot",
        "rating100": 80,
        "performers": [
            { "id": "p1", "name": "Alex" },
            { "id": "p2", "name": "Jordan" },
        ],
    });

    let scene: Entity<SceneFields> = store.materialize(payload).expect("materializes");
    assert_eq!(scene.id().as_deref(), Some("1"));
    assert!(!scene.is_new());
    assert!(!scene.is_dirty());

    let cached_performer: Entity<PerformerFields> = store.get_cached("p1").expect("performer is cached");
    assert_eq!(cached_performer.name(), FieldValue::Value("Alex".to_string()));
}

#[test]
fn repeated_materialize_of_same_id_returns_identical_instance() {
    let store = store();
    let payload = json!({ "id": "1", "title": "Pilot", "rating100": 80 });
    let first: Entity<SceneFields> = store.materialize(payload.clone()).unwrap();
    let second: Entity<SceneFields> = store.materialize(payload).unwrap();
    assert!(first.is_same_instance(&second));
}

#[test]
fn partial_merge_preserves_unrelated_local_edit() {
    let store = store();
    let initial = json!({ "id": "1", "title": "Pilot", "rating100": 80 });
    let scene: Entity<SceneFields> = store.materialize(initial).unwrap();

    // Local edit to `title`, never sent to the server yet.
    scene.set_title(FieldValue::Value("Pilot (Director's Cut)".to_string()));
    assert!(scene.is_dirty());

    // A server payload arrives that only reports `rating100`.
    let partial = json!({ "id": "1", "rating100": 95 });
    let merged: Entity<SceneFields> = store.materialize(partial).unwrap();
    assert!(scene.is_same_instance(&merged));

    let changed = scene.changed_fields();
    assert!(changed.contains_key("title"), "local title edit must survive the merge");
    assert!(!changed.contains_key("rating"), "freshly merged rating100 must read as clean");
}

#[test]
fn to_input_for_new_entity_emits_every_set_field() {
    let scene = Entity::new(SceneFields {
        id: None,
        title: FieldValue::Value("Brand New".to_string()),
        rating: FieldValue::Null,
        performers: FieldValue::Unset,
    });

    let input = scene.to_input().expect("builds input");
    assert_eq!(input["title"], json!("Brand New"));
    assert_eq!(input["rating100"], json!(null));
    assert!(input.get("performer_ids").is_none(), "unset relationship must be omitted");
}

#[test]
fn to_input_for_existing_entity_emits_only_id_and_changes() {
    let store = store();
    let scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 }))
        .unwrap();

    scene.set_rating(FieldValue::Value(90));
    let input = scene.to_input().expect("builds input");
    assert_eq!(input["id"], json!("1"));
    assert_eq!(input["rating100"], json!(90));
    assert!(input.get("title").is_none(), "unchanged field must not be re-emitted");
}

#[tokio::test]
async fn populate_fetches_only_missing_fields_and_is_idempotent() {
    let store = store();
    let transport = entitygraph::testing::StubTransport::new();
    let scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 }))
        .unwrap();

    transport.script(
        "GetScenePerformers",
        json!({ "id": "1", "title": "Pilot", "rating100": 80, "performers": [{ "id": "p1", "name": "Alex" }] }),
    );

    store
        .populate(&transport, "GetScenePerformers", &scene, &["performers"], false)
        .await
        .expect("populates");
    assert_eq!(transport.call_count("GetScenePerformers"), 1);
    assert!(scene.has_received("performers"));

    // Second call with the same requirement makes no further transport call.
    store
        .populate(&transport, "GetScenePerformers", &scene, &["performers"], false)
        .await
        .expect("no-op populate");
    assert_eq!(transport.call_count("GetScenePerformers"), 1);
}

#[test]
fn filter_strict_reports_missing_fields_instead_of_fetching() {
    let store = store();
    let _scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 }))
        .unwrap();

    let result = store.filter_strict::<SceneFields, _>(&["performers"], |_| true);
    assert!(result.is_err(), "an un-populated required field must fail strict filtering");
}

#[test]
fn add_to_mirrors_onto_already_loaded_peer_with_inverse_received() {
    let store = store();
    let scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80, "performers": [] }))
        .unwrap();
    let performer: Entity<PerformerFields> = store
        .materialize(json!({ "id": "p1", "name": "Alex", "scenes": [] }))
        .unwrap();
    assert!(performer.has_received("scenes"));

    scene.add_to_performers(performer.clone());

    assert!(scene.performers().as_option().unwrap().iter().any(|p| p.id().as_deref() == Some("p1")));
    let mirrored = performer.scenes().as_option().unwrap().clone();
    assert!(mirrored.iter().any(|s| s.is_same_instance(&scene)), "add_to_performers must mirror onto performer.scenes");
}

#[test]
fn add_to_does_not_mirror_onto_a_peer_that_has_not_received_the_inverse_field() {
    let store = store();
    let scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 }))
        .unwrap();
    // This performer never received its "scenes" field.
    let performer: Entity<PerformerFields> = store.materialize(json!({ "id": "p1", "name": "Alex" })).unwrap();
    assert!(!performer.has_received("scenes"));

    scene.add_to_performers(performer.clone());

    assert!(performer.scenes().is_unset(), "inverse sync must never fetch or fabricate an unreceived field");
}

#[test]
fn remove_from_mirrors_unlink_onto_loaded_peer() {
    let store = store();
    let scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80, "performers": [{ "id": "p1", "name": "Alex" }] }))
        .unwrap();
    let performer: Entity<PerformerFields> = store
        .materialize(json!({ "id": "p1", "name": "Alex", "scenes": [{ "id": "1", "title": "Pilot", "rating100": 80 }] }))
        .unwrap();

    scene.remove_from_performers(&performer);

    assert!(scene.performers().as_option().unwrap().is_empty());
    assert!(performer.scenes().as_option().unwrap().is_empty(), "remove_from_performers must mirror the unlink");
}

#[tokio::test]
async fn save_of_new_entity_adopts_server_id_and_becomes_clean() {
    let transport = entitygraph::testing::StubTransport::new();
    transport.script("CreateScene", json!({ "id": "456" }));

    let scene = Entity::new(SceneFields {
        id: None,
        title: FieldValue::Value("X".to_string()),
        rating: FieldValue::Unset,
        performers: FieldValue::Unset,
    });
    assert!(scene.is_new());
    let minted_id = scene.id().expect("local id minted");
    assert_eq!(minted_id.len(), 32);

    scene.save(&transport, "CreateScene", "UpdateScene").await.expect("saves");

    assert_eq!(scene.id().as_deref(), Some("456"));
    assert!(!scene.is_new());
    assert!(!scene.is_dirty());
    assert_eq!(transport.call_count("CreateScene"), 1);
}

#[tokio::test]
async fn save_of_existing_entity_calls_update_and_marks_clean() {
    let store = store();
    let transport = entitygraph::testing::StubTransport::new();
    transport.script("UpdateScene", json!({ "id": "1" }));

    let scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 }))
        .unwrap();
    scene.set_rating(FieldValue::Value(90));
    assert!(scene.is_dirty());

    scene.save(&transport, "CreateScene", "UpdateScene").await.expect("saves");

    assert!(!scene.is_dirty());
    assert_eq!(transport.call_count("UpdateScene"), 1);
    assert_eq!(transport.call_count("CreateScene"), 0);
}

#[tokio::test]
async fn delete_invalidates_the_store_entry() {
    let store = store();
    let transport = entitygraph::testing::StubTransport::new();
    transport.script("DeleteScene", json!(null));

    let scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 }))
        .unwrap();

    scene.delete(&transport, "DeleteScene", &store).await.expect("deletes");

    assert!(store.get_cached::<SceneFields>("1").is_none());
}

#[test]
fn reachable_entities_walks_every_relationship_edge_without_revisiting() {
    let store = store();
    let scene: Entity<SceneFields> = store
        .materialize(json!({
            "id": "1",
            "title": "Pilot",
            "rating100": 80,
            "performers": [
                { "id": "p1", "name": "Alex", "scenes": [] },
                { "id": "p2", "name": "Jordan", "scenes": [] },
            ],
        }))
        .unwrap();
    // Mirror the inverse edge so the graph is actually cyclic: p1 -> scene -> p1.
    let performer: Entity<PerformerFields> = store.get_cached("p1").unwrap();
    performer.set_scenes(FieldValue::Value(vec![scene.clone()]));

    let reached = entitygraph::relationship::reachable_entities(scene.as_erased());
    let ids: Vec<String> = reached.iter().filter_map(|e| e.entity_id()).collect();

    assert!(ids.contains(&"1".to_string()));
    assert!(ids.contains(&"p1".to_string()));
    assert!(ids.contains(&"p2".to_string()));
    assert_eq!(ids.len(), 3, "each entity must appear exactly once despite the p1 <-> scene cycle");
}

#[tokio::test]
async fn find_remote_pages_through_every_result_and_materializes_into_the_store() {
    let store = store();
    let transport = entitygraph::testing::StubTransport::new();
    transport.script(
        "FindScenes",
        json!({
            "items": [{ "id": "1", "title": "Pilot", "rating100": 80 }],
            "has_more": true,
        }),
    );
    transport.script(
        "FindScenes",
        json!({
            "items": [{ "id": "2", "title": "Finale", "rating100": 95 }],
            "has_more": false,
        }),
    );

    let criteria = vec![entitygraph::filter::Criterion::new(
        "rating",
        |_: &SceneFields| entitygraph::filter::FilterOperand::Null,
        entitygraph::filter::gte(50.0),
    )];

    let results: Vec<Entity<SceneFields>> =
        entitygraph::filter::find_remote(&transport, "FindScenes", &criteria, &store, 1).await.expect("pages through");

    assert_eq!(transport.call_count("FindScenes"), 2);
    let ids: Vec<String> = results.iter().filter_map(|e| e.id()).collect();
    assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);

    // The second page's request must ask for the next page number.
    let second_call = &transport.calls()[1];
    assert_eq!(second_call.variables["page"], json!(2));
}

#[tokio::test]
async fn find_iter_remote_yields_pages_lazily_and_stops_on_last_page() {
    let store = store();
    let transport = entitygraph::testing::StubTransport::new();
    transport.script(
        "FindScenes",
        json!({
            "items": [{ "id": "1", "title": "Pilot", "rating100": 80 }],
            "has_more": false,
        }),
    );

    let criteria: Vec<entitygraph::filter::Criterion<SceneFields>> = Vec::new();
    let stream = entitygraph::filter::find_iter_remote(&transport, "FindScenes", &criteria, &store, 10);
    tokio::pin!(stream);

    let mut ids = Vec::new();
    while let Some(entity) = futures_util::StreamExt::next(&mut stream).await {
        ids.push(entity.expect("materializes").id().unwrap());
    }
    assert_eq!(ids, vec!["1".to_string()]);
    assert_eq!(transport.call_count("FindScenes"), 1);
}

#[tokio::test]
async fn resolve_filter_query_issues_a_remote_find_keyed_by_owner_id() {
    let store = store();
    let transport = entitygraph::testing::StubTransport::new();
    transport.script(
        "FindStudioScenes",
        json!({
            "items": [{ "id": "1", "title": "Pilot", "rating100": 80 }],
            "has_more": false,
        }),
    );

    let studio = Entity::new(StudioFields {
        id: Some("99".to_string()),
        name: FieldValue::Value("Acme".to_string()),
        scenes: FieldValue::Unset,
    });

    let scenes: Vec<Entity<SceneFields>> =
        entitygraph::relationship::resolve_filter_query(&transport, &studio, "scenes", "FindStudioScenes", &store, 10)
            .await
            .expect("resolves");

    assert_eq!(scenes.len(), 1);
    assert_eq!(scenes[0].id().as_deref(), Some("1"));
    let call = &transport.calls()[0];
    assert_eq!(call.variables["filter"][0]["field"], json!("studio"));
    assert_eq!(call.variables["filter"][0]["modifier"], json!({ "eq": "99" }));
}

#[tokio::test]
async fn resolve_filter_query_rejects_a_relationship_not_declared_as_filter_query() {
    let store = store();
    let scene: Entity<SceneFields> =
        store.materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 })).unwrap();
    let transport = entitygraph::testing::StubTransport::new();

    let result = entitygraph::relationship::resolve_filter_query::<SceneFields, PerformerFields>(
        &transport, &scene, "performers", "Op", &store, 10,
    )
    .await;

    assert!(result.is_err(), "performers is a direct_field relationship, not filter_query");
}

#[test]
fn clear_type_drops_only_that_type() {
    let store = store();
    let _scene: Entity<SceneFields> = store
        .materialize(json!({ "id": "1", "title": "Pilot", "rating100": 80 }))
        .unwrap();
    let _performer: Entity<PerformerFields> = store.materialize(json!({ "id": "p1", "name": "Alex" })).unwrap();

    store.clear_type::<SceneFields>();
    assert!(store.get_cached::<SceneFields>("1").is_none());
    assert!(store.get_cached::<PerformerFields>("p1").is_some());
}
