use serde_json::json;
use uuid::Uuid;

use super::{FULL_DIM, StubEmbedding, memory, meta, stub_vector};
use fedmem_service::{Error, RecordPatch, SearchOptions};

#[tokio::test]
async fn store_then_get_round_trips_and_counts_access() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let stored = church
		.store("u1", "Person: John Doe, Status: member", meta(json!({ "status": "member" })))
		.await
		.expect("store");
	let loaded = church.get("u1", stored.id).await.expect("get").expect("present");

	assert_eq!(loaded.content, stored.content);
	assert_eq!(loaded.metadata, stored.metadata);
	assert_eq!(loaded.embedding.as_deref(), Some(stub_vector(&stored.content, FULL_DIM).as_slice()));
	assert_eq!(stored.access_count, 0);
	assert_eq!(loaded.access_count, 1);
	assert!(loaded.last_accessed.is_some());
	assert_eq!(church.get("u1", stored.id).await.expect("get").expect("present").access_count, 2);
}

#[tokio::test]
async fn records_are_scoped_by_owner() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let stored = church.store("u1", "John Doe", serde_json::Map::new()).await.expect("store");

	assert!(church.get("u2", stored.id).await.expect("get").is_none());
	assert!(!church.delete("u2", stored.id).await.expect("delete"));
	assert!(
		!church
			.update("u2", stored.id, RecordPatch { content: Some("x".to_string()), metadata: None })
			.await
			.expect("update")
	);
	assert!(church.get("u1", stored.id).await.expect("get").is_some());
}

#[tokio::test]
async fn missing_records_report_false() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let missing = Uuid::new_v4();

	assert!(!church.delete("u1", missing).await.expect("delete"));
	assert!(!church.update("u1", missing, RecordPatch::default()).await.expect("update"));
	assert!(church.get("u1", missing).await.expect("get").is_none());
}

#[tokio::test]
async fn store_enriches_metadata_and_indexes() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let stored = church
		.store(
			"u1",
			"Visitor from the spring picnic",
			meta(json!({ "firstName": "Jane", "lastName": "Roe" })),
		)
		.await
		.expect("store");

	assert_eq!(stored.metadata["type"], "person");
	assert_eq!(stored.metadata["fullName"], "Jane Roe");
	assert_eq!(stored.metadata["status"], "visitor");
	assert_eq!(stored.metadata["version"], 1);

	let entry = fm.index.entry("u1", "church", stored.id).await.expect("entry").expect("indexed");

	assert_eq!(entry.title, "Jane Roe");
	assert_eq!(entry.summary, "Visitor from the spring picnic");
	assert_eq!(entry.compact_embedding, fm.embedding.reduce(stored.embedding.as_deref().unwrap_or_default()));
	assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn unindexed_modules_skip_the_central_index() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let scratch = fm.module("scratch").expect("scratch module");
	let stored = scratch.store("u1", "loose thought", serde_json::Map::new()).await.expect("store");

	assert!(!scratch.is_indexed());
	assert_eq!(stored.metadata["type"], "memory");
	assert!(fm.index.entry("u1", "scratch", stored.id).await.expect("entry").is_none());
}

#[tokio::test]
async fn store_rejects_unindexable_input() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let technical = fm.module("technical").expect("technical module");

	assert!(matches!(
		technical.store("u1", "  ", serde_json::Map::new()).await,
		Err(Error::InvalidRequest { .. })
	));
	assert!(matches!(
		technical.store("", "fn main() {}", serde_json::Map::new()).await,
		Err(Error::InvalidRequest { .. })
	));
	assert_eq!(stub.calls(), 0);

	let typed_only = technical.store("u1", "", meta(json!({ "type": "snippet" }))).await.expect("store");

	assert_eq!(typed_only.embedding.as_deref(), Some(stub_vector("snippet", FULL_DIM).as_slice()));
	assert!(matches!(fm.module("missing"), Err(Error::UnknownModule { .. })));
}

#[tokio::test]
async fn content_update_reembeds_and_refreshes_the_index() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let technical = fm.module("technical").expect("technical module");
	let stored = technical
		.store("u1", "Rust borrow checker notes", meta(json!({ "tags": ["Rust"] })))
		.await
		.expect("store");
	let updated = technical
		.update(
			"u1",
			stored.id,
			RecordPatch { content: Some("Donation ledger SQL".to_string()), metadata: None },
		)
		.await
		.expect("update");

	assert!(updated);
	assert_eq!(stub.calls(), 2);

	let loaded = technical.get("u1", stored.id).await.expect("get").expect("present");

	assert_eq!(loaded.content, "Donation ledger SQL");
	assert_eq!(loaded.metadata["version"], 2);
	assert_eq!(loaded.metadata["tags"], json!(["rust"]));
	assert_eq!(loaded.created_at, stored.created_at);
	assert_eq!(loaded.embedding.as_deref(), Some(stub_vector("Donation ledger SQL", FULL_DIM).as_slice()));

	let entry = fm.index.entry("u1", "technical", stored.id).await.expect("entry").expect("indexed");

	assert_eq!(entry.summary, "Donation ledger SQL");
	assert_eq!(entry.compact_embedding, fm.embedding.reduce(&stub_vector("Donation ledger SQL", FULL_DIM)));
}

#[tokio::test]
async fn metadata_update_keeps_the_embedding() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let stored = church
		.store("u1", "Sings in the choir", meta(json!({ "firstName": "John", "lastName": "Doe" })))
		.await
		.expect("store");
	let patch = RecordPatch { content: None, metadata: Some(meta(json!({ "firstName": "Johnny" }))) };

	assert!(church.update("u1", stored.id, patch).await.expect("update"));
	assert_eq!(stub.calls(), 1);

	let loaded = church.get("u1", stored.id).await.expect("get").expect("present");

	assert_eq!(loaded.metadata["fullName"], "Johnny Doe");
	assert_eq!(loaded.metadata["lastName"], "Doe");
	assert_eq!(loaded.metadata["version"], 2);
	assert_eq!(loaded.embedding, stored.embedding);

	let entry = fm.index.entry("u1", "church", stored.id).await.expect("entry").expect("indexed");

	assert_eq!(entry.title, "Johnny Doe");
}

#[tokio::test]
async fn delete_removes_record_and_index_entry() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let stored = church.store("u1", "John Doe", serde_json::Map::new()).await.expect("store");

	assert!(church.delete("u1", stored.id).await.expect("delete"));
	assert!(church.get("u1", stored.id).await.expect("get").is_none());
	assert!(fm.index.entry("u1", "church", stored.id).await.expect("entry").is_none());
	assert!(!church.delete("u1", stored.id).await.expect("delete again"));
}

#[tokio::test]
async fn vector_search_ranks_filters_and_counts_access() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");
	let john = church
		.store("u1", "Person: John Doe, Status: member", meta(json!({ "status": "member" })))
		.await
		.expect("store");
	let donation = church
		.store("u1", "Donation of $500", meta(json!({ "status": "member" })))
		.await
		.expect("store");

	church.store("u2", "Person: John Doe, Status: member", serde_json::Map::new()).await.expect("store");

	let query = stub_vector("john member", FULL_DIM);
	let hits = church.search_by_embedding("u1", &query, &SearchOptions::default()).await.expect("search");

	assert_eq!(hits.iter().map(|hit| hit.record.id).collect::<Vec<_>>(), vec![john.id, donation.id]);
	assert!(hits[0].score > hits[1].score);
	assert!(hits.iter().all(|hit| hit.record.access_count == 1));

	let floor = SearchOptions { min_score: Some(0.5), ..SearchOptions::default() };
	let hits = church.search_by_embedding("u1", &query, &floor).await.expect("search");

	assert_eq!(hits.len(), 1);
	assert_eq!(hits[0].record.access_count, 2);

	let filtered = SearchOptions { filters: meta(json!({ "status": "visitor" })), ..SearchOptions::default() };

	assert!(church.search_by_embedding("u1", &query, &filtered).await.expect("search").is_empty());
	assert!(matches!(
		church.search_by_embedding("u1", &[1.0, 0.0], &SearchOptions::default()).await,
		Err(Error::DimensionMismatch { expected: FULL_DIM, actual: 2 })
	));
}

#[tokio::test]
async fn text_search_falls_back_to_metadata_when_the_provider_fails() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let church = fm.module("church").expect("church module");

	church.store("u1", "Person: John Doe", meta(json!({ "status": "member" }))).await.expect("store");
	church.store("u1", "Person: Jane Roe", serde_json::Map::new()).await.expect("store");

	let options = SearchOptions { filters: meta(json!({ "status": "member" })), ..SearchOptions::default() };
	let semantic = church.search("u1", "john", &options).await.expect("search");

	assert_eq!(semantic.len(), 1);
	assert!(semantic[0].score > 0.0);

	stub.set_failing(true);

	let fallback = church.search("u1", "a query nobody has embedded", &options).await.expect("fallback");

	assert_eq!(fallback.len(), 1);
	assert_eq!(fallback[0].record.content, "Person: John Doe");
	assert_eq!(fallback[0].score, 0.0);
}

#[tokio::test]
async fn metadata_search_is_exact_containment() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let technical = fm.module("technical").expect("technical module");

	technical.store("u1", "Rust lifetimes", meta(json!({ "tags": ["rust"] }))).await.expect("store");
	technical.store("u1", "SQL joins", meta(json!({ "language": "sql" }))).await.expect("store");

	let rust = technical
		.search_by_metadata("u1", &meta(json!({ "tags": ["rust"] })), None)
		.await
		.expect("search");

	assert_eq!(rust.len(), 1);
	assert_eq!(rust[0].content, "Rust lifetimes");

	let all_text = technical
		.search_by_metadata("u1", &meta(json!({ "type": "note" })), Some(1))
		.await
		.expect("search");

	assert_eq!(all_text.len(), 1);
	assert_eq!(all_text[0].content, "SQL joins");
}

#[tokio::test]
async fn stats_summarize_access_and_categories() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;
	let technical = fm.module("technical").expect("technical module");
	let first = technical
		.store("u1", "Rust lifetimes", meta(json!({ "category": "rust" })))
		.await
		.expect("store");

	technical.store("u1", "Rust traits", meta(json!({ "category": "rust" }))).await.expect("store");
	technical.store("u1", "SQL joins", serde_json::Map::new()).await.expect("store");
	technical.get("u1", first.id).await.expect("get");
	technical.get("u1", first.id).await.expect("get");
	technical.get("u1", first.id).await.expect("get");

	let stats = technical.calculate_stats("u1").await.expect("stats");

	assert_eq!(stats.total_memories, 3);
	assert!((stats.average_access_count - 1.0).abs() < 1e-9);
	assert_eq!(
		stats
			.most_frequent_categories
			.iter()
			.map(|c| (c.category.as_str(), c.count))
			.collect::<Vec<_>>(),
		vec![("rust", 2), ("note", 1)]
	);
	assert!(stats.last_accessed.is_some());
	assert_eq!(technical.calculate_stats("u2").await.expect("stats").total_memories, 0);
}
