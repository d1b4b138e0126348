//! Process-local stores with the same observable semantics as the Postgres ones.

use std::{
	cmp::Ordering,
	collections::{BTreeMap, HashMap},
	future,
	sync::{Mutex, MutexGuard},
};

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	BoxFuture, CacheBackend, Error, IndexStore, RecordStore, Result,
	models::{IndexEntry, MemoryRecord, RecordStats, ScoredRecord, VectorQuery},
};

type IndexKey = (String, String, Uuid);

#[derive(Default)]
pub struct MemoryRecordStore {
	rows: Mutex<Vec<MemoryRecord>>,
}
impl MemoryRecordStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn rows(&self) -> MutexGuard<'_, Vec<MemoryRecord>> {
		self.rows.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn insert_record(&self, record: &MemoryRecord) -> Result<()> {
		let mut rows = self.rows();

		if rows.iter().any(|row| row.id == record.id) {
			return Err(Error::InvalidArgument(format!("Record {} already exists.", record.id)));
		}

		rows.push(record.clone());

		Ok(())
	}

	fn replace_record(&self, record: &MemoryRecord) -> bool {
		let mut rows = self.rows();
		let Some(row) =
			rows.iter_mut().find(|row| row.id == record.id && row.owner_id == record.owner_id)
		else {
			return false;
		};

		row.content = record.content.clone();
		row.metadata = record.metadata.clone();
		row.embedding = record.embedding.clone();
		row.updated_at = record.updated_at;

		true
	}

	fn delete_record(&self, owner_id: &str, id: Uuid) -> bool {
		let mut rows = self.rows();
		let before = rows.len();

		rows.retain(|row| !(row.id == id && row.owner_id == owner_id));

		rows.len() != before
	}

	fn touch_records(&self, owner_id: &str, ids: &[Uuid], at: OffsetDateTime) -> u64 {
		let mut touched = 0;

		for row in self.rows().iter_mut() {
			if row.owner_id == owner_id && ids.contains(&row.id) {
				row.access_count += 1;
				row.last_accessed = Some(at);
				touched += 1;
			}
		}

		touched
	}

	fn search_records(
		&self,
		owner_id: &str,
		vector: &[f32],
		query: &VectorQuery,
	) -> Result<Vec<ScoredRecord>> {
		let mut scored = Vec::new();

		for row in self.rows().iter() {
			if row.owner_id != owner_id || !metadata_contains(&row.metadata, &query.filters) {
				continue;
			}

			let Some(embedding) = row.embedding.as_deref() else {
				continue;
			};
			let score = fedmem_domain::vector::cosine_similarity(vector, embedding)
				.map_err(|err| Error::InvalidArgument(err.to_string()))?;

			if query.min_score.is_some_and(|min| score < min) {
				continue;
			}

			scored.push(ScoredRecord { record: row.clone(), score });
		}

		scored.sort_by(|a, b| {
			b.score
				.partial_cmp(&a.score)
				.unwrap_or(Ordering::Equal)
				.then_with(|| a.record.created_at.cmp(&b.record.created_at))
				.then_with(|| a.record.id.cmp(&b.record.id))
		});
		scored.truncate(query.limit as usize);

		Ok(scored)
	}

	fn filter_records(
		&self,
		owner_id: &str,
		predicate: &Map<String, Value>,
		limit: Option<u32>,
	) -> Vec<MemoryRecord> {
		let mut out: Vec<MemoryRecord> = self
			.rows()
			.iter()
			.filter(|row| row.owner_id == owner_id && metadata_contains(&row.metadata, predicate))
			.cloned()
			.collect();

		out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

		if let Some(limit) = limit {
			out.truncate(limit as usize);
		}

		out
	}

	fn record_stats(&self, owner_id: &str, top_categories: u32) -> RecordStats {
		let rows = self.rows();
		let owned: Vec<&MemoryRecord> = rows.iter().filter(|row| row.owner_id == owner_id).collect();

		if owned.is_empty() {
			return RecordStats::default();
		}

		let total = owned.len() as i64;
		let access_sum: i64 = owned.iter().map(|row| row.access_count).sum();
		let last_accessed = owned.iter().filter_map(|row| row.last_accessed).max();
		let mut counts: HashMap<String, i64> = HashMap::new();

		for row in &owned {
			let category = ["category", "type"]
				.iter()
				.find_map(|key| row.metadata.get(*key).and_then(Value::as_str))
				.filter(|category| !category.is_empty());

			if let Some(category) = category {
				*counts.entry(category.to_string()).or_default() += 1;
			}
		}

		let mut categories: Vec<(String, i64)> = counts.into_iter().collect();

		categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
		categories.truncate(top_categories as usize);

		RecordStats {
			total,
			average_access_count: access_sum as f64 / total as f64,
			categories,
			last_accessed,
		}
	}

	fn list_records(&self, owner_id: Option<&str>) -> Vec<MemoryRecord> {
		let mut out: Vec<MemoryRecord> = self
			.rows()
			.iter()
			.filter(|row| owner_id.is_none_or(|owner_id| row.owner_id == owner_id))
			.cloned()
			.collect();

		out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

		out
	}
}

impl RecordStore for MemoryRecordStore {
	fn insert<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, Result<()>> {
		Box::pin(future::ready(self.insert_record(record)))
	}

	fn get<'a>(
		&'a self,
		owner_id: &'a str,
		id: Uuid,
	) -> BoxFuture<'a, Result<Option<MemoryRecord>>> {
		let found =
			self.rows().iter().find(|row| row.id == id && row.owner_id == owner_id).cloned();

		Box::pin(future::ready(Ok(found)))
	}

	fn replace<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, Result<bool>> {
		Box::pin(future::ready(Ok(self.replace_record(record))))
	}

	fn delete<'a>(&'a self, owner_id: &'a str, id: Uuid) -> BoxFuture<'a, Result<bool>> {
		Box::pin(future::ready(Ok(self.delete_record(owner_id, id))))
	}

	fn touch<'a>(
		&'a self,
		owner_id: &'a str,
		ids: &'a [Uuid],
		at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(future::ready(Ok(self.touch_records(owner_id, ids, at))))
	}

	fn search_by_embedding<'a>(
		&'a self,
		owner_id: &'a str,
		vector: &'a [f32],
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<ScoredRecord>>> {
		Box::pin(future::ready(self.search_records(owner_id, vector, query)))
	}

	fn search_by_metadata<'a>(
		&'a self,
		owner_id: &'a str,
		predicate: &'a Map<String, Value>,
		limit: Option<u32>,
	) -> BoxFuture<'a, Result<Vec<MemoryRecord>>> {
		Box::pin(future::ready(Ok(self.filter_records(owner_id, predicate, limit))))
	}

	fn stats<'a>(
		&'a self,
		owner_id: &'a str,
		top_categories: u32,
	) -> BoxFuture<'a, Result<RecordStats>> {
		Box::pin(future::ready(Ok(self.record_stats(owner_id, top_categories))))
	}

	fn list<'a>(&'a self, owner_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<MemoryRecord>>> {
		Box::pin(future::ready(Ok(self.list_records(owner_id))))
	}
}

#[derive(Default)]
pub struct MemoryIndexStore {
	entries: Mutex<BTreeMap<IndexKey, IndexEntry>>,
}
impl MemoryIndexStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn entries(&self) -> MutexGuard<'_, BTreeMap<IndexKey, IndexEntry>> {
		self.entries.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn upsert_entry(&self, entry: &IndexEntry) {
		let key = (entry.owner_id.clone(), entry.module_id.clone(), entry.remote_memory_id);
		let mut entries = self.entries();
		let mut next = entry.clone();

		if let Some(existing) = entries.get(&key) {
			next.created_at = existing.created_at;
			next.last_accessed = entry.last_accessed.or(existing.last_accessed);
		}

		entries.insert(key, next);
	}

	fn touch_entries(&self, owner_id: &str, keys: &[(String, Uuid)], at: OffsetDateTime) -> u64 {
		let mut entries = self.entries();
		let mut touched = 0;

		for (module_id, remote_memory_id) in keys {
			let key = (owner_id.to_string(), module_id.clone(), *remote_memory_id);

			if let Some(entry) = entries.get_mut(&key) {
				entry.last_accessed = Some(at);
				touched += 1;
			}
		}

		touched
	}
}

impl IndexStore for MemoryIndexStore {
	fn upsert<'a>(&'a self, entry: &'a IndexEntry) -> BoxFuture<'a, Result<()>> {
		self.upsert_entry(entry);

		Box::pin(future::ready(Ok(())))
	}

	fn remove<'a>(
		&'a self,
		owner_id: &'a str,
		module_id: &'a str,
		remote_memory_id: Uuid,
	) -> BoxFuture<'a, Result<bool>> {
		let key = (owner_id.to_string(), module_id.to_string(), remote_memory_id);
		let removed = self.entries().remove(&key).is_some();

		Box::pin(future::ready(Ok(removed)))
	}

	fn get<'a>(
		&'a self,
		owner_id: &'a str,
		module_id: &'a str,
		remote_memory_id: Uuid,
	) -> BoxFuture<'a, Result<Option<IndexEntry>>> {
		let key = (owner_id.to_string(), module_id.to_string(), remote_memory_id);
		let found = self.entries().get(&key).cloned();

		Box::pin(future::ready(Ok(found)))
	}

	fn list<'a>(
		&'a self,
		owner_id: &'a str,
		modules: Option<&'a [String]>,
	) -> BoxFuture<'a, Result<Vec<IndexEntry>>> {
		let found = self
			.entries()
			.values()
			.filter(|entry| entry.owner_id == owner_id)
			.filter(|entry| modules.is_none_or(|modules| modules.contains(&entry.module_id)))
			.cloned()
			.collect();

		Box::pin(future::ready(Ok(found)))
	}

	fn list_module<'a>(
		&'a self,
		module_id: &'a str,
		owner_id: Option<&'a str>,
	) -> BoxFuture<'a, Result<Vec<IndexEntry>>> {
		let found = self
			.entries()
			.values()
			.filter(|entry| entry.module_id == module_id)
			.filter(|entry| owner_id.is_none_or(|owner_id| entry.owner_id == owner_id))
			.cloned()
			.collect();

		Box::pin(future::ready(Ok(found)))
	}

	fn touch<'a>(
		&'a self,
		owner_id: &'a str,
		keys: &'a [(String, Uuid)],
		at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(future::ready(Ok(self.touch_entries(owner_id, keys, at))))
	}
}

/// Size at which the first sweep of expired cache entries runs.
pub const CACHE_SWEEP_THRESHOLD: usize = 64;

/// Expiring string cache. Expired entries are evicted when read, and swept whenever the map
/// grows past twice its size after the previous sweep.
pub struct MemoryCache {
	state: Mutex<CacheState>,
}
impl MemoryCache {
	pub fn new() -> Self {
		let state = CacheState { entries: HashMap::new(), sweep_at: CACHE_SWEEP_THRESHOLD };

		Self { state: Mutex::new(state) }
	}

	pub fn len(&self) -> usize {
		self.state().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn state(&self) -> MutexGuard<'_, CacheState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}
}
impl Default for MemoryCache {
	fn default() -> Self {
		Self::new()
	}
}

struct CacheState {
	entries: HashMap<String, (String, OffsetDateTime)>,
	sweep_at: usize,
}
impl CacheState {
	fn sweep(&mut self, now: OffsetDateTime) -> u64 {
		let before = self.entries.len();

		self.entries.retain(|_, (_, expires_at)| *expires_at > now);
		self.sweep_at = (self.entries.len() * 2).max(CACHE_SWEEP_THRESHOLD);

		(before - self.entries.len()) as u64
	}
}

impl CacheBackend for MemoryCache {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
		let now = OffsetDateTime::now_utc();
		let mut state = self.state();
		let found = state
			.entries
			.get(key)
			.filter(|(_, expires_at)| *expires_at > now)
			.map(|(value, _)| value.clone());

		if found.is_none() {
			state.entries.remove(key);
		}

		Box::pin(future::ready(Ok(found)))
	}

	fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BoxFuture<'a, Result<()>> {
		let now = OffsetDateTime::now_utc();
		let mut state = self.state();

		if state.entries.len() >= state.sweep_at && !state.entries.contains_key(key) {
			state.sweep(now);
		}

		state.entries.insert(key.to_string(), (value, now + ttl));

		Box::pin(future::ready(Ok(())))
	}

	fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<u64>> {
		let mut state = self.state();
		let before = state.entries.len();

		state.entries.retain(|key, _| !key.starts_with(prefix));

		let removed = (before - state.entries.len()) as u64;

		Box::pin(future::ready(Ok(removed)))
	}

	fn purge_expired(&self) -> BoxFuture<'_, Result<u64>> {
		let removed = self.state().sweep(OffsetDateTime::now_utc());

		Box::pin(future::ready(Ok(removed)))
	}
}

/// JSONB `@>` semantics restricted to what metadata filters need: objects match key by key,
/// arrays match when every expected element is contained in some actual element, scalars match by
/// equality.
pub fn metadata_contains(metadata: &Map<String, Value>, predicate: &Map<String, Value>) -> bool {
	predicate
		.iter()
		.all(|(key, expected)| metadata.get(key).is_some_and(|actual| json_contains(actual, expected)))
}

fn json_contains(actual: &Value, expected: &Value) -> bool {
	match (actual, expected) {
		(Value::Object(actual), Value::Object(expected)) => metadata_contains(actual, expected),
		(Value::Array(actual), Value::Array(expected)) =>
			expected.iter().all(|e| actual.iter().any(|a| json_contains(a, e))),
		_ => actual == expected,
	}
}
