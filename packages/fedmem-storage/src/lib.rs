pub mod cache;
pub mod db;
pub mod index;
pub mod memory;
pub mod models;
pub mod records;
pub mod schema;
pub mod vector;

mod error;

pub use error::Error;

use std::{future::Future, pin::Pin};

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::models::{IndexEntry, MemoryRecord, RecordStats, ScoredRecord, VectorQuery};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence for one module table.
///
/// Every read and write is scoped by `owner_id`; a row belonging to another owner behaves exactly
/// like a missing row.
pub trait RecordStore
where
	Self: Send + Sync,
{
	fn insert<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, Result<()>>;

	fn get<'a>(&'a self, owner_id: &'a str, id: Uuid)
	-> BoxFuture<'a, Result<Option<MemoryRecord>>>;

	/// Overwrites content, metadata, embedding, and `updated_at`. Returns `false` when no row
	/// matched.
	fn replace<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, Result<bool>>;

	fn delete<'a>(&'a self, owner_id: &'a str, id: Uuid) -> BoxFuture<'a, Result<bool>>;

	/// Increments `access_count` and sets `last_accessed` for each listed row.
	fn touch<'a>(
		&'a self,
		owner_id: &'a str,
		ids: &'a [Uuid],
		at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>>;

	fn search_by_embedding<'a>(
		&'a self,
		owner_id: &'a str,
		vector: &'a [f32],
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<ScoredRecord>>>;

	/// Metadata containment filter, newest first.
	fn search_by_metadata<'a>(
		&'a self,
		owner_id: &'a str,
		predicate: &'a Map<String, Value>,
		limit: Option<u32>,
	) -> BoxFuture<'a, Result<Vec<MemoryRecord>>>;

	fn stats<'a>(&'a self, owner_id: &'a str, top_categories: u32)
	-> BoxFuture<'a, Result<RecordStats>>;

	/// All rows, optionally restricted to one owner, oldest first.
	fn list<'a>(&'a self, owner_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<MemoryRecord>>>;
}

/// Persistence for central index entries, keyed by `(owner_id, module_id, remote_memory_id)`.
pub trait IndexStore
where
	Self: Send + Sync,
{
	fn upsert<'a>(&'a self, entry: &'a IndexEntry) -> BoxFuture<'a, Result<()>>;

	fn remove<'a>(
		&'a self,
		owner_id: &'a str,
		module_id: &'a str,
		remote_memory_id: Uuid,
	) -> BoxFuture<'a, Result<bool>>;

	fn get<'a>(
		&'a self,
		owner_id: &'a str,
		module_id: &'a str,
		remote_memory_id: Uuid,
	) -> BoxFuture<'a, Result<Option<IndexEntry>>>;

	/// Entries for one owner, optionally restricted to a module subset.
	fn list<'a>(
		&'a self,
		owner_id: &'a str,
		modules: Option<&'a [String]>,
	) -> BoxFuture<'a, Result<Vec<IndexEntry>>>;

	/// Every entry of one module across owners, or only `owner_id`'s when given.
	fn list_module<'a>(
		&'a self,
		module_id: &'a str,
		owner_id: Option<&'a str>,
	) -> BoxFuture<'a, Result<Vec<IndexEntry>>>;

	fn touch<'a>(
		&'a self,
		owner_id: &'a str,
		keys: &'a [(String, Uuid)],
		at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>>;
}

/// String key-value store with per-entry expiry.
pub trait CacheBackend
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

	fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BoxFuture<'a, Result<()>>;

	fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<u64>>;

	fn purge_expired(&self) -> BoxFuture<'_, Result<u64>>;
}
