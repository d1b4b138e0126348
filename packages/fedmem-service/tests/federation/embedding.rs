use std::{
	error::Error as _,
	sync::Arc,
	time::{Duration as StdDuration, Instant},
};

use time::Duration;

use super::{
	BrokenCache, COMPACT_DIM, FULL_DIM, STUB_PROVIDER_ID, SlowCache, StubEmbedding, memory, service,
	settings, stub_vector,
};
use fedmem_config::EmbeddingProviderConfig;
use fedmem_domain::vector;
use fedmem_service::{
	EmbeddingCache, EmbeddingProvider, EmbeddingService, Error, HASHED_PROVIDER_ID,
	HashedEmbeddingProvider, embedding::cache,
};
use fedmem_storage::{CacheBackend, memory::MemoryCache};

fn texts(items: &[&str]) -> Vec<String> {
	items.iter().map(|item| item.to_string()).collect()
}

#[tokio::test]
async fn warm_cache_returns_identical_vector_with_one_provider_call() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), Some(Arc::new(MemoryCache::new())), 16);
	let first = svc.generate_full("John Doe, member").await.expect("first call");
	let second = svc.generate_full("John Doe, member").await.expect("second call");

	assert_eq!(first, second);
	assert_eq!(first, stub_vector("John Doe, member", FULL_DIM));
	assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn equivalent_whitespace_shares_a_cache_entry() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), Some(Arc::new(MemoryCache::new())), 16);

	svc.generate_full("John   Doe").await.expect("first call");
	svc.generate_full("  John Doe\n").await.expect("second call");

	assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn batch_preserves_order_dedupes_and_chunks() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), None, 2);
	let input = texts(&["john", "member", "john", "donation", "rust", " john "]);
	let out = svc.generate_batch(&input).await.expect("batch");

	assert_eq!(out.len(), input.len());

	for (text, vec) in input.iter().zip(&out) {
		assert_eq!(vec, &stub_vector(text, FULL_DIM));
	}

	assert_eq!(out[0], out[2]);
	assert_eq!(out[0], out[5]);
	assert_eq!(stub.calls(), 2);
	assert_eq!(stub.batch_sizes(), vec![2, 2]);
}

#[tokio::test]
async fn batch_only_sends_cache_misses() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), Some(Arc::new(MemoryCache::new())), 16);

	svc.generate_full("john").await.expect("warm");

	let out = svc.generate_batch(&texts(&["john", "member"])).await.expect("batch");

	assert_eq!(out[1], stub_vector("member", FULL_DIM));
	assert_eq!(stub.calls(), 2);
	assert_eq!(stub.batch_sizes(), vec![1, 1]);
}

#[tokio::test]
async fn slow_cache_lookups_and_writes_overlap() {
	let stub = StubEmbedding::new();
	let slow = SlowCache::new(StdDuration::from_millis(200));
	let cache = EmbeddingCache::new(slow.clone(), Duration::hours(1))
		.with_timeout(StdDuration::from_secs(1));
	let svc = EmbeddingService::new(stub.clone(), Some(cache), settings(16));
	let input: Vec<String> = (0..10).map(|i| format!("note {i}")).collect();
	let started = Instant::now();
	let out = svc.generate_batch(&input).await.expect("batch");
	let elapsed = started.elapsed();

	assert_eq!(out.len(), input.len());
	assert_eq!(stub.calls(), 1);
	assert!(slow.peak_concurrent_reads() > 1);
	// Ten serial reads plus ten serial writes would take four seconds.
	assert!(elapsed < StdDuration::from_millis(1_500), "batch took {elapsed:?}");
}

#[tokio::test]
async fn hanging_cache_times_out_as_a_miss() {
	let stub = StubEmbedding::new();
	let hanging = SlowCache::new(StdDuration::from_secs(30));
	let cache = EmbeddingCache::new(hanging, Duration::hours(1))
		.with_timeout(StdDuration::from_millis(50));
	let svc = EmbeddingService::new(stub.clone(), Some(cache), settings(16));
	let started = Instant::now();
	let vec = svc.generate_full("John Doe, member").await.expect("generation survives the cache");

	assert_eq!(vec, stub_vector("John Doe, member", FULL_DIM));
	assert_eq!(stub.calls(), 1);
	assert!(started.elapsed() < StdDuration::from_secs(2), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn empty_batch_makes_no_provider_call() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), None, 4);

	assert!(svc.generate_batch(&[]).await.expect("empty batch").is_empty());
	assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn failing_cache_degrades_to_provider() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), Some(Arc::new(BrokenCache)), 16);
	let first = svc.generate_full("john").await.expect("cache errors must not fail generation");
	let second = svc.generate_full("john").await.expect("cache errors must not fail generation");

	assert_eq!(first, second);
	assert_eq!(stub.calls(), 2);
	assert!(svc.clear_cache().await.is_err());
}

#[tokio::test]
async fn undecodable_cache_payload_is_a_miss() {
	let stub = StubEmbedding::new();
	let backend = Arc::new(MemoryCache::new());
	let key = cache::cache_key(STUB_PROVIDER_ID, FULL_DIM, "john");

	backend.set(&key, "not json".to_string(), Duration::hours(1)).await.expect("seed");
	backend.set(&cache::cache_key(STUB_PROVIDER_ID, FULL_DIM, "doe"), "[1.0]".to_string(), Duration::hours(1))
		.await
		.expect("seed");

	let svc = service(stub.clone(), Some(backend.clone()), 16);

	assert_eq!(svc.generate_full("john").await.expect("miss"), stub_vector("john", FULL_DIM));
	assert_eq!(svc.generate_full("doe").await.expect("miss"), stub_vector("doe", FULL_DIM));
	assert_eq!(stub.calls(), 2);

	svc.generate_full("john").await.expect("hit");

	assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn provider_failure_surfaces_as_embedding_generation() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), None, 16);

	stub.set_failing(true);

	let err = svc.generate_full("john").await.expect_err("provider failure must propagate");

	assert!(matches!(err, Error::EmbeddingGeneration(_)));
	assert!(err.source().is_some());
	assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn wrong_vector_width_is_rejected() {
	let stub = StubEmbedding::with_dimensions(FULL_DIM - 1);
	let svc = service(stub, Some(Arc::new(MemoryCache::new())), 16);
	let err = svc.generate_full("john").await.expect_err("width mismatch");

	assert!(matches!(err, Error::EmbeddingGeneration(_)));
}

#[tokio::test]
async fn blank_text_never_reaches_the_provider() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), None, 16);

	assert!(matches!(svc.generate_full("  \n").await, Err(Error::InvalidRequest { .. })));
	assert!(matches!(
		svc.generate_batch(&texts(&["john", ""])).await,
		Err(Error::InvalidRequest { .. })
	));
	assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn oversized_single_batch_is_refused() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), None, 2);
	let err = svc.embed_batch(&texts(&["a", "b", "c"])).await.expect_err("too large");

	assert!(matches!(err, Error::InvalidRequest { .. }));
	assert_eq!(stub.calls(), 0);
	assert_eq!(svc.embed_batch(&texts(&["a", "b"])).await.expect("fits").len(), 2);
}

#[tokio::test]
async fn compact_vector_is_reduced_and_unit_length() {
	let stub = StubEmbedding::new();
	let svc = service(stub.clone(), Some(Arc::new(MemoryCache::new())), 16);
	let (full, compact) = svc.generate_pair("John Doe member").await.expect("pair");

	assert_eq!(full.len(), FULL_DIM);
	assert_eq!(compact.len(), COMPACT_DIM);
	assert_eq!(compact, vector::reduce(&full, COMPACT_DIM));
	assert!((vector::l2_norm(&compact) - 1.0).abs() < 1e-5);
	assert_eq!(svc.generate_compact("John Doe member").await.expect("compact"), compact);
	assert_eq!(stub.calls(), 1);
}

#[test]
fn top_k_ranks_by_similarity() {
	let svc = service(StubEmbedding::new(), None, 16);
	let query = vec![1.0, 0.0];
	let candidate = |cos: f32| vec![cos, (1.0 - cos * cos).sqrt()];
	let ranked = svc
		.top_k(&query, vec![(candidate(0.9), "a"), (candidate(0.95), "b"), (candidate(0.2), "c")], 2)
		.expect("same dimensions");

	assert_eq!(ranked.iter().map(|r| r.item).collect::<Vec<_>>(), vec!["b", "a"]);
	assert!((ranked[0].score - 0.95).abs() < 1e-5);
	assert!((ranked[1].score - 0.9).abs() < 1e-5);
	assert!(matches!(
		svc.top_k(&query, vec![(vec![1.0, 0.0, 0.0], "bad")], 1),
		Err(Error::DimensionMismatch { expected: 2, actual: 3 })
	));
}

#[test]
fn cosine_similarity_contract() {
	let svc = service(StubEmbedding::new(), None, 16);
	let v = vec![0.2, -0.4, 0.9];

	assert!((svc.cosine_similarity(&v, &v).expect("same length") - 1.0).abs() < 1e-6);
	assert_eq!(svc.cosine_similarity(&v, &[0.0, 0.0, 0.0]).expect("same length"), 0.0);
	assert!(matches!(
		svc.cosine_similarity(&v, &[1.0]),
		Err(Error::DimensionMismatch { expected: 3, actual: 1 })
	));
}

#[tokio::test]
async fn clear_cache_only_drops_the_active_provider() {
	let stub = StubEmbedding::new();
	let backend = Arc::new(MemoryCache::new());

	backend
		.set("emb:v1:other:8:0000000000000000", "[0.0]".to_string(), Duration::hours(1))
		.await
		.expect("seed");

	let svc = service(stub.clone(), Some(backend.clone()), 16);

	svc.generate_batch(&texts(&["john", "member"])).await.expect("batch");

	assert_eq!(backend.len(), 3);
	assert_eq!(svc.clear_cache().await.expect("clear"), 2);
	assert_eq!(backend.len(), 1);

	svc.generate_full("john").await.expect("regenerate");

	assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn hashed_provider_is_deterministic() {
	let provider = Arc::new(HashedEmbeddingProvider::new(FULL_DIM));
	let svc = service(provider.clone(), None, 16);
	let a = svc.generate_full("John Doe").await.expect("hashed");
	let b = svc.generate_full("John Doe").await.expect("hashed");

	assert_eq!(provider.provider_id(), HASHED_PROVIDER_ID);
	assert_eq!(a, b);
	assert_eq!(a.len(), FULL_DIM);
	assert!((vector::l2_norm(&a) - 1.0).abs() < 1e-5);
}

#[test]
fn provider_selection_follows_the_api_key() {
	let mut cfg = EmbeddingProviderConfig {
		provider_id: "openai".to_string(),
		api_base: "http://127.0.0.1:1".to_string(),
		api_key: None,
		path: "/v1/embeddings".to_string(),
		model: "text-embedding-3-small".to_string(),
		dimensions: 16,
		timeout_ms: 1_000,
		default_headers: serde_json::Map::new(),
	};

	assert_eq!(
		fedmem_service::provider_from_config(&cfg).expect("fallback").provider_id(),
		HASHED_PROVIDER_ID
	);

	cfg.api_key = Some("sk-test".to_string());

	assert_eq!(fedmem_service::provider_from_config(&cfg).expect("http").provider_id(), "openai");
}

#[tokio::test]
async fn maintenance_clears_and_purges_the_configured_cache() {
	let stub = StubEmbedding::new();
	let fm = memory(&stub).await;

	fm.embedding.generate_batch(&texts(&["john", "member"])).await.expect("batch");

	assert_eq!(fm.purge_cache().await.expect("purge"), 0);
	assert_eq!(fm.clear_cache(false).await.expect("clear"), 2);

	fm.embedding.generate_full("john").await.expect("regenerate");

	assert_eq!(fm.clear_cache(true).await.expect("clear all"), 1);
	assert_eq!(stub.calls(), 2);
}
