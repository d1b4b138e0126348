use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use super::{COMPACT_DIM, StubEmbedding, memory, meta};
use fedmem_service::{DanglingRef, Error, IndexPayload, Module, ModuleRegistry, RouteOptions, profiles};
use fedmem_storage::memory::MemoryRecordStore;

fn payload(title: &str, compact: Vec<f32>) -> IndexPayload {
	IndexPayload { title: title.to_string(), summary: title.to_string(), compact_embedding: compact }
}

#[tokio::test]
async fn member_outranks_donation_for_a_member_query() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let technical = fm.module("technical").expect("technical module");
	let donation = technical.store("u1", "Donation of $500", serde_json::Map::new()).await.expect("store");
	let john = church
		.store("u1", "Person: John Doe, Status: member", meta(json!({ "status": "member" })))
		.await
		.expect("store");
	let resolution = fm
		.search("u1", "find member named John", &RouteOptions::default())
		.await
		.expect("search");
	let ids: Vec<Uuid> = resolution.memories.iter().map(|memory| memory.record.id).collect();

	assert_eq!(ids, vec![john.id, donation.id]);
	assert_eq!(resolution.memories[0].module_id, "church");
	assert!(resolution.memories[0].score > resolution.memories[1].score);
	assert!(resolution.dangling.is_empty());
	assert!(resolution.memories.iter().all(|memory| memory.record.access_count == 1));
}

#[tokio::test]
async fn routing_never_crosses_owners() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");

	church.store("u1", "John Doe member", serde_json::Map::new()).await.expect("store");
	church.store("u2", "John Doe member", serde_json::Map::new()).await.expect("store");

	let options = RouteOptions { min_score: Some(-1.0), ..RouteOptions::default() };
	let hits = fm.index.route("u1", "John", &options).await.expect("route");

	assert_eq!(hits.len(), 1);
	assert!(hits.iter().all(|hit| hit.entry.owner_id == "u1"));
	assert!(fm.index.route("u3", "John", &options).await.expect("route").is_empty());
}

#[tokio::test]
async fn routing_honours_modules_limit_and_floor() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let technical = fm.module("technical").expect("technical module");

	church.store("u1", "John Doe", serde_json::Map::new()).await.expect("store");
	church.store("u1", "John Doe member", serde_json::Map::new()).await.expect("store");
	technical.store("u1", "Rust notes", serde_json::Map::new()).await.expect("store");

	let all = fm.index.route("u1", "John", &RouteOptions::default()).await.expect("route");

	assert_eq!(all.len(), 3);
	assert!(all.windows(2).all(|pair| pair[0].score >= pair[1].score));

	let only_technical = RouteOptions {
		modules: Some(vec!["technical".to_string()]),
		..RouteOptions::default()
	};
	let hits = fm.index.route("u1", "John", &only_technical).await.expect("route");

	assert_eq!(hits.len(), 1);
	assert_eq!(hits[0].entry.module_id, "technical");

	let limited = RouteOptions { limit: Some(1), ..RouteOptions::default() };

	assert_eq!(fm.index.route("u1", "John", &limited).await.expect("route").len(), 1);

	let strict = RouteOptions { min_score: Some(0.9), ..RouteOptions::default() };

	assert!(
		fm.index
			.route("u1", "John", &strict)
			.await
			.expect("route")
			.iter()
			.all(|hit| hit.entry.module_id == "church")
	);
}

#[tokio::test]
async fn resolve_drops_dangling_pointers() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let live = church.store("u1", "John Doe", serde_json::Map::new()).await.expect("store");
	let ghost = Uuid::new_v4();
	let compact = fm.embedding.generate_compact("John Doe").await.expect("compact");

	fm.index.upsert_index("u1", "church", ghost, payload("ghost", compact.clone())).await.expect("upsert");
	fm.index
		.upsert_index("u1", "retired", Uuid::new_v4(), payload("retired", compact))
		.await
		.expect("upsert");

	let resolution = fm.search("u1", "John Doe", &RouteOptions::default()).await.expect("search");

	assert_eq!(resolution.memories.len(), 1);
	assert_eq!(resolution.memories[0].record.id, live.id);
	assert_eq!(resolution.dangling.len(), 2);
	assert!(
		resolution
			.dangling
			.contains(&DanglingRef { module_id: "church".to_string(), remote_memory_id: ghost })
	);
}

#[tokio::test]
async fn resolved_entries_move_ahead_on_ties() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let first = church.store("u1", "John Doe", serde_json::Map::new()).await.expect("store");
	let second = church.store("u1", "John Doe", serde_json::Map::new()).await.expect("store");
	let options = RouteOptions::default();
	let hits = fm.index.route("u1", "John Doe", &options).await.expect("route");

	assert_eq!(hits.len(), 2);
	assert_eq!(hits[0].score, hits[1].score);

	let trailing = hits[1].clone();
	let trailing_id = trailing.entry.remote_memory_id;

	fm.index.resolve(&fm.registry, "u1", &[trailing]).await.expect("resolve");

	let hits = fm.index.route("u1", "John Doe", &options).await.expect("route");

	assert_eq!(hits[0].entry.remote_memory_id, trailing_id);
	assert!(hits[0].entry.last_accessed.is_some());
	assert!([first.id, second.id].contains(&trailing_id));
}

#[tokio::test]
async fn compact_dimension_is_enforced() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;

	assert!(matches!(
		fm.index.upsert_index("u1", "church", Uuid::new_v4(), payload("bad", vec![1.0; 3])).await,
		Err(Error::DimensionMismatch { expected: COMPACT_DIM, actual: 3 })
	));
	assert!(matches!(
		fm.index.route_vector("u1", &[1.0; 5], &RouteOptions::default()).await,
		Err(Error::DimensionMismatch { expected: COMPACT_DIM, actual: 5 })
	));
}

#[tokio::test]
async fn registry_rejects_duplicates() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let mut registry = ModuleRegistry::new();
	let module = || {
		Arc::new(Module::new(
			"church".to_string(),
			profiles::for_kind("people").expect("known kind"),
			Arc::new(MemoryRecordStore::new()),
			fm.embedding.clone(),
			None,
		))
	};

	registry.register(module()).expect("first registration");

	assert!(matches!(registry.register(module()), Err(Error::InvalidRequest { .. })));
	assert!(matches!(registry.require("people"), Err(Error::UnknownModule { .. })));
	assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["church"]);
	assert!(profiles::for_kind("finance").is_err());
	assert_eq!(fm.registry.len(), 3);
}
