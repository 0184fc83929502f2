use std::{collections::BTreeMap, sync::Arc};

use axum::{extract::State, http::StatusCode, Extension, Json};
use rust_decimal_macros::dec;
use serde_json::json;
use time::macros::date;

use boter::auth::CallerIdentity;
use boter::backend::{BackendError, CollectionRef, FilterOp, MemoryBackend, Query, SeedData};
use boter::config::CollectionsConfig;
use boter::http::{self, AppState, NewPlayer};
use boter::models::{Entry, EntryLine, FineType, Player};
use boter::store::{CacheError, ReadOptions, WithId};
use boter::stores::Stores;
use boter::summary::summarize;
use boter::views::{self, FineForm};

fn setup() -> (Arc<MemoryBackend>, Stores) {
    let backend = Arc::new(MemoryBackend::new());
    let stores = Stores::new(backend.clone(), &CollectionsConfig::default()).expect("Failed to build stores");
    (backend, stores)
}

fn seed(backend: &MemoryBackend, value: serde_json::Value) {
    let seed: SeedData = serde_json::from_value(value).expect("Invalid seed");
    backend.import(seed).expect("Failed to import seed");
}

fn team(backend: &MemoryBackend) {
    seed(backend, json!({
        "players": {
            "p1": {"name": "Anna"},
            "p2": {"name": "Bertil"}
        },
        "categories": {
            "match": {"name": "Match", "ordinal": 1},
            "training": {"name": "Träning", "ordinal": 0}
        },
        "types": {
            "late": {"name": "Sen", "amount": 50, "categoryRef": "categories/training"},
            "phone": {"name": "Telefon", "amount": 20, "categoryRef": "categories/training"},
            "card": {"name": "Gult kort", "amount": 100, "categoryRef": "categories/match"}
        }
    }));
}

fn form(date: time::Date, picks: &[(&str, &str)]) -> FineForm {
    let mut players: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();
    for (player, fine_type) in picks {
        players.entry(player.to_string()).or_default().insert(fine_type.to_string(), true);
    }
    FineForm { date, players }
}

fn total(view: &views::SummaryView, id: &str) -> rust_decimal::Decimal {
    view.summary.players.iter().find(|p| &*p.player.id == id).expect("Player missing").total
}

fn player(id: &str, name: &str) -> WithId<Player> {
    WithId { id: Arc::from(id), data: Player { name: name.to_string() } }
}

#[test]
fn test_same_key_and_mode_share_cache_entry() {
    let (backend, stores) = setup();
    team(&backend);

    let query = stores.players.query();
    let first = stores.players.get_collection("players", query.clone(), ReadOptions::default());
    let second = stores.players.get_collection("players", query.clone(), ReadOptions::default());
    let once = stores.players.get_collection("players", query, ReadOptions::once());

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &once));
    assert_eq!(once.key().to_string(), "players-once");
    assert_eq!(stores.players.cached_queries(), 2);
    // One live query listener; the one-shot read registers nothing.
    assert_eq!(backend.listener_count(), 1);
}

#[test]
fn test_document_in_two_queries_is_one_entry() {
    let (backend, stores) = setup();
    team(&backend);

    let training = stores.types.get_collection(
        "training",
        stores.types.query().filter("categoryRef", FilterOp::Equal, json!("categories/training")),
        ReadOptions::default(),
    );
    let cheap = stores.types.get_collection(
        "cheap",
        stores.types.query().filter("amount", FilterOp::LessThan, 60),
        ReadOptions::default(),
    );
    stores.types.apply_pending();

    let late_a = training.documents().into_iter().find(|d| d.reference().id() == "late").unwrap();
    let late_b = cheap.documents().into_iter().find(|d| d.reference().id() == "late").unwrap();
    assert!(Arc::ptr_eq(&late_a, &late_b));

    let direct = stores.types.get_document(&stores.types.doc("late").unwrap(), ReadOptions::default());
    assert!(Arc::ptr_eq(&late_a, &direct));
}

#[test]
fn test_missing_document_reports_not_found() {
    let (_backend, stores) = setup();
    let ghost = stores.players.doc("ghost").unwrap();

    let view = stores.players.use_document(Some(&ghost), ReadOptions::default());

    assert_eq!(view.data, None);
    assert_eq!(view.error, Some(CacheError::NotFound("players/ghost".to_string())));
    assert!(!view.loading);
    assert!(!view.is_ready);
}

#[test]
fn test_malformed_document_is_left_out() {
    let (backend, stores) = setup();
    seed(&backend, json!({
        "players": {
            "ok": {"name": "Anna"},
            "bad": {"nickname": 7}
        }
    }));

    let view = stores.players.use_collection("players", Some(stores.players.query()), ReadOptions::default());
    assert_eq!(view.data.len(), 1);
    assert_eq!(view.data[0].name, "Anna");

    let bad = stores.players.use_document(Some(&stores.players.doc("bad").unwrap()), ReadOptions::default());
    assert!(matches!(bad.error, Some(CacheError::Malformed { .. })));
}

#[test]
fn test_unresolved_query_is_not_fetched() {
    let (backend, stores) = setup();
    team(&backend);

    let view = views::fine_types(&stores, None).unwrap();
    assert!(view.loading);
    assert!(!view.is_ready);
    assert!(view.data.is_empty());
    assert_eq!(stores.types.cached_queries(), 0);
    assert_eq!(backend.listener_count(), 0);

    let skipped = stores.types.use_collection("types", Some(stores.types.query()), ReadOptions::skip());
    assert!(!skipped.is_ready);
    assert_eq!(stores.types.cached_queries(), 0);

    let idle = stores.types.use_document(None, ReadOptions::default());
    assert!(!idle.loading && !idle.is_ready);
}

#[test]
fn test_fine_types_filtered_by_category() {
    let (backend, stores) = setup();
    team(&backend);

    let view = views::fine_types(&stores, Some("training")).unwrap();
    assert!(view.is_ready);
    let names: Vec<&str> = view.data.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Telefon", "Sen"]);

    let categories = views::categories(&stores);
    let names: Vec<&str> = categories.data.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Träning", "Match"]);
}

#[test]
fn test_live_and_one_shot_reads() {
    let (backend, stores) = setup();
    team(&backend);
    let anna = stores.players.doc("p1").unwrap();

    let live = stores.players.get_document(&anna, ReadOptions::default());
    let once = stores.players.get_document(&anna, ReadOptions::once());
    stores.players.apply_pending();
    assert_eq!(live.data().unwrap().name, "Anna");
    assert_eq!(once.data().unwrap().name, "Anna");

    let mut fields = serde_json::Map::new();
    fields.insert("name".to_string(), json!("Anna K"));
    stores.players.update("p1", fields, None).unwrap();
    stores.players.apply_pending();

    assert_eq!(live.data().unwrap().name, "Anna K");
    assert_eq!(once.data().unwrap().name, "Anna");
    assert!(once.is_once());
}

#[test]
fn test_query_values_are_memoized() {
    let (backend, stores) = setup();
    team(&backend);

    let players = stores.players.get_collection("players", stores.players.query(), ReadOptions::default());
    stores.players.apply_pending();

    let first = players.data_items();
    let second = players.data_items();
    assert!(Arc::ptr_eq(&first, &second));

    stores.players.set("p2", &Player { name: "Bertil B".to_string() }, None).unwrap();
    stores.players.apply_pending();

    let third = players.data_items();
    assert!(!Arc::ptr_eq(&first, &third));
    assert!(third.iter().any(|p| p.name == "Bertil B"));
}

#[test]
fn test_deleted_document_leaves_query() {
    let (backend, stores) = setup();
    team(&backend);

    let view = stores.players.use_collection("players", Some(stores.players.query()), ReadOptions::default());
    assert_eq!(view.data.len(), 2);

    stores.players.delete("p2", None).unwrap();
    let view = stores.players.use_collection("players", Some(stores.players.query()), ReadOptions::default());
    assert_eq!(view.data.len(), 1);

    let gone = stores.players.use_document(Some(&stores.players.doc("p2").unwrap()), ReadOptions::default());
    assert!(matches!(gone.error, Some(CacheError::NotFound(_))));
}

#[test]
fn test_backend_outage_keeps_loading_until_reconnect() {
    let (backend, stores) = setup();
    team(&backend);
    backend.set_offline(true);

    let view = stores.players.use_collection("players", Some(stores.players.query()), ReadOptions::default());
    assert!(view.loading);
    assert!(!view.is_ready);

    let once = stores.players.use_collection("players", Some(stores.players.query()), ReadOptions::once());
    assert!(once.loading);

    backend.set_offline(false);
    let view = stores.players.use_collection("players", Some(stores.players.query()), ReadOptions::default());
    assert!(view.is_ready);
    assert_eq!(view.data.len(), 2);

    assert!(stores.players.add(&Player { name: "Cecilia".to_string() }, None).is_ok());
}

#[test]
fn test_subcollection_mutations() {
    let (backend, stores) = setup();
    team(&backend);
    let anna = stores.players.doc("p1").unwrap();

    let guest = stores.players.add(&Player { name: "Guest".to_string() }, Some(&anna)).unwrap();
    assert!(guest.path().starts_with("players/p1/players/"));
    stores.players.set("fixed", &Player { name: "Fixed".to_string() }, Some(&anna)).unwrap();

    let nested = anna.collection("players").unwrap();
    let view = stores.players.use_collection("p1-guests", Some(Query::new(nested.clone())), ReadOptions::default());
    assert_eq!(view.data.len(), 2);

    stores.players.delete("fixed", Some(&anna)).unwrap();
    let view = stores.players.use_collection("p1-guests", Some(Query::new(nested.clone())), ReadOptions::default());
    assert_eq!(view.data.len(), 1);
    assert_eq!(backend.document_count(&nested), 1);
    assert_eq!(backend.document_count(&CollectionRef::parse("players").unwrap()), 2);
}

#[test]
fn test_totals_accumulate_per_player() {
    let (backend, stores) = setup();
    team(&backend);

    views::record_fines(&stores, &form(date!(2023 - 05 - 01), &[("p1", "late")])).unwrap();
    let view = views::summary(&stores);
    assert!(view.is_ready);
    assert_eq!(total(&view, "p1"), dec!(50));
    assert_eq!(total(&view, "p2"), dec!(0));

    views::record_fines(&stores, &form(date!(2023 - 05 - 08), &[("p1", "late")])).unwrap();
    let view = views::summary(&stores);
    assert_eq!(total(&view, "p1"), dec!(100));
    assert_eq!(total(&view, "p2"), dec!(0));

    let anna = &view.summary.players[0];
    assert_eq!(&*anna.player.id, "p1");
    let dates: Vec<time::Date> = anna.fines.iter().map(|f| f.date).collect();
    assert_eq!(dates, vec![date!(2023 - 05 - 01), date!(2023 - 05 - 08)]);
    assert_eq!(anna.fines[0].fine_type, "Sen");
}

#[test]
fn test_one_event_covers_several_players_and_types() {
    let (backend, stores) = setup();
    team(&backend);

    let picks = [("p1", "late"), ("p1", "phone"), ("p2", "card")];
    let entry = views::build_entry(&stores, &form(date!(2023 - 06 - 01), &picks)).unwrap();
    assert_eq!(entry.entries.len(), 3);
    assert_eq!(entry.entries[0].player_ref.path(), "players/p1");

    views::record_fines(&stores, &form(date!(2023 - 06 - 01), &picks)).unwrap();
    let view = views::summary(&stores);
    assert_eq!(total(&view, "p1"), dec!(70));
    assert_eq!(total(&view, "p2"), dec!(100));
    assert_eq!(&*view.summary.players[0].player.id, "p2");
}

#[test]
fn test_dangling_references_are_counted_not_summed() {
    let (backend, stores) = setup();
    team(&backend);

    views::record_fines(&stores, &form(date!(2023 - 05 - 01), &[("p1", "late"), ("p1", "removed"), ("gone", "late")])).unwrap();
    let view = views::summary(&stores);

    assert_eq!(total(&view, "p1"), dec!(50));
    assert_eq!(view.summary.unresolved, 2);
    assert_eq!(view.summary.players.len(), 2);
}

#[test]
fn test_summary_order_is_descending_and_stable() {
    let players = vec![player("a", "A"), player("b", "B"), player("c", "C"), player("d", "D")];
    let fine = FineType { name: "Sen".to_string(), amount: dec!(50), category_ref: None };
    let line = |p: &str| EntryLine {
        player_ref: boter::backend::DocumentRef::parse(&format!("players/{}", p)).unwrap(),
        type_ref: boter::backend::DocumentRef::parse("types/late").unwrap(),
    };
    let entries = vec![WithId {
        id: Arc::from("e1"),
        data: Entry { date: date!(2023 - 01 - 01), entries: vec![line("c"), line("b"), line("c")] },
    }];

    let summary = summarize(&players, &entries, |_| Some(fine.clone()));

    // Unspecified tie-break: equal totals keep their input order.
    let order: Vec<&str> = summary.players.iter().map(|p| &*p.player.id).collect();
    assert_eq!(order, vec!["c", "b", "a", "d"]);
    assert_eq!(summary.players[0].total, dec!(100));

    let table = summary.to_string();
    assert!(table.contains("100 kr"));
    assert!(summary.players[0].history().contains("Sen"));
}

#[test]
fn test_roster_sorted_by_name() {
    let (backend, stores) = setup();
    seed(&backend, json!({"players": {"x": {"name": "Östen"}, "y": {"name": "Bo"}, "z": {"name": "Alva"}}}));

    let view = views::roster(&stores);
    let names: Vec<&str> = view.data.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Alva", "Bo", "Östen"]);
}

#[test]
fn test_unknown_category_is_refused() {
    let (backend, stores) = setup();
    team(&backend);

    let result = views::fine_types(&stores, Some("nope"));
    assert!(matches!(result, Err(BackendError::NotFound(_))));
    assert_eq!(stores.types.cached_queries(), 0);

    assert!(matches!(views::fine_types(&stores, Some("match/x")), Err(BackendError::InvalidPath(_))));
}

#[test]
fn test_one_shot_query_keeps_its_members() {
    let (backend, stores) = setup();
    team(&backend);

    let once = stores.players.get_collection("players", stores.players.query(), ReadOptions::once());
    stores.players.apply_pending();
    assert_eq!(once.data_items().len(), 2);

    stores.players.add(&Player { name: "Cecilia".to_string() }, None).unwrap();
    stores.players.apply_pending();
    assert_eq!(once.data_items().len(), 2);

    // Members are the shared live document entries, so their values follow writes.
    stores.players.set("p1", &Player { name: "Anna K".to_string() }, None).unwrap();
    stores.players.apply_pending();
    let names: Vec<String> = once.data_items().iter().map(|p| p.name.clone()).collect();
    assert_eq!(names, vec!["Anna K".to_string(), "Bertil".to_string()]);
}

#[test]
fn test_nested_ids_in_fine_form_are_refused() {
    let (backend, stores) = setup();
    team(&backend);

    let result = views::build_entry(&stores, &form(date!(2023 - 05 - 01), &[("x/players/p1", "late")]));
    assert!(matches!(result, Err(BackendError::InvalidPath(_))));

    let result = views::build_entry(&stores, &form(date!(2023 - 05 - 01), &[("p1", "x/types/late")]));
    assert!(matches!(result, Err(BackendError::InvalidPath(_))));
}

#[test]
fn test_views_serialize_with_ids() {
    let (backend, stores) = setup();
    team(&backend);
    views::record_fines(&stores, &form(date!(2023 - 05 - 01), &[("p1", "late")])).unwrap();

    let roster = serde_json::to_value(views::roster(&stores)).unwrap();
    assert_eq!(roster["data"][0], json!({"id": "p1", "name": "Anna"}));
    assert_eq!(roster["is_ready"], json!(true));

    let summary = serde_json::to_value(views::summary(&stores)).unwrap();
    assert_eq!(summary["players"][0]["id"], json!("p1"));
    assert_eq!(summary["players"][0]["fines"][0]["date"], json!("2023-05-01"));
}

#[tokio::test]
async fn test_http_reader_cannot_write() {
    let (_backend, stores) = setup();
    let state = AppState { stores: Arc::new(stores), metrics: None };
    let reader = CallerIdentity { name: "team".to_string(), role: "reader".to_string() };

    let result = http::create_player(State(state), Extension(reader), Json(NewPlayer { name: "X".to_string() })).await;
    assert_eq!(result.unwrap_err().status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_http_admin_records_fines() {
    let (backend, stores) = setup();
    team(&backend);
    let state = AppState { stores: Arc::new(stores), metrics: None };
    let admin = CallerIdentity { name: "coach".to_string(), role: "admin".to_string() };

    let (status, Json(created)) = http::create_player(
        State(state.clone()),
        Extension(admin.clone()),
        Json(NewPlayer { name: "Cecilia".to_string() }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert!(created.path.starts_with("players/"));

    let (status, _) = http::create_entry(
        State(state.clone()),
        Extension(admin.clone()),
        Json(form(date!(2023 - 09 - 01), &[(created.id.as_str(), "card")])),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);

    let Json(view) = http::get_summary(State(state.clone())).await;
    assert_eq!(&*view.summary.players[0].player.id, created.id.as_str());
    assert_eq!(view.summary.players[0].total, dec!(100));

    let table = http::get_summary_table(State(state.clone())).await;
    assert!(table.contains("Cecilia"));

    let bad = http::create_entry(State(state), Extension(admin), Json(form(date!(2023 - 09 - 01), &[("a/b", "card")]))).await;
    assert_eq!(bad.unwrap_err().status(), StatusCode::BAD_REQUEST);
}
