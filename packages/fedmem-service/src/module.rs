use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{CentralIndex, EmbeddingService, Error, IndexPayload, Result};
use fedmem_domain::text;
use fedmem_storage::{
	RecordStore,
	models::{MemoryRecord, ScoredRecord, VectorQuery},
};

pub const TITLE_MAX_CHARS: usize = 80;
pub const SUMMARY_MAX_CHARS: usize = 240;
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
pub const TOP_CATEGORIES: u32 = 5;

/// Inputs to metadata enrichment besides the content and the raw metadata.
#[derive(Debug, Clone, Copy)]
pub struct MetadataContext<'a> {
	pub now: OffsetDateTime,
	/// Stored metadata when enriching an update.
	pub previous: Option<&'a Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
	pub title: String,
	pub summary: String,
}

/// Domain hooks of one module kind. Every hook is pure.
pub trait ModuleProfile
where
	Self: Send + Sync,
{
	fn kind(&self) -> &'static str;

	/// `type` assigned when the caller supplies none.
	fn default_type(&self) -> &'static str;

	/// Kind-specific derived fields.
	fn enrich(&self, content: &str, metadata: &mut Map<String, Value>, ctx: &MetadataContext<'_>);

	/// Deterministic text projection of a structured entity.
	fn generate_content(&self, entity: &Value) -> String;

	fn process_metadata(
		&self,
		content: &str,
		raw: Map<String, Value>,
		ctx: &MetadataContext<'_>,
	) -> Map<String, Value> {
		let mut metadata = raw;

		if metadata_str(&metadata, "type").is_none() {
			metadata.insert("type".to_string(), Value::from(self.default_type()));
		}

		let version = ctx
			.previous
			.and_then(|previous| previous.get("version"))
			.and_then(Value::as_i64)
			.map_or(1, |version| version + 1);

		metadata.insert("version".to_string(), Value::from(version));

		self.enrich(content, &mut metadata, ctx);

		metadata
	}

	fn summarize(&self, content: &str, metadata: &Map<String, Value>) -> IndexSummary {
		default_summary(content, metadata)
	}
}

#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
	pub content: Option<String>,
	/// Merged shallowly over the stored metadata.
	pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
	pub limit: u32,
	pub min_score: Option<f32>,
	pub filters: Map<String, Value>,
}
impl Default for SearchOptions {
	fn default() -> Self {
		Self { limit: DEFAULT_SEARCH_LIMIT, min_score: None, filters: Map::new() }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
	pub category: String,
	pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleStats {
	pub total_memories: i64,
	pub average_access_count: f64,
	pub most_frequent_categories: Vec<CategoryCount>,
	pub last_accessed: Option<OffsetDateTime>,
}

/// One domain module: its profile, its table, and its link to the central index.
pub struct Module {
	module_id: String,
	profile: Arc<dyn ModuleProfile>,
	store: Arc<dyn RecordStore>,
	embedding: Arc<EmbeddingService>,
	index: Option<Arc<CentralIndex>>,
}
impl Module {
	pub fn new(
		module_id: String,
		profile: Arc<dyn ModuleProfile>,
		store: Arc<dyn RecordStore>,
		embedding: Arc<EmbeddingService>,
		index: Option<Arc<CentralIndex>>,
	) -> Self {
		Self { module_id, profile, store, embedding, index }
	}

	pub fn module_id(&self) -> &str {
		&self.module_id
	}

	pub fn profile(&self) -> &dyn ModuleProfile {
		self.profile.as_ref()
	}

	pub fn is_indexed(&self) -> bool {
		self.index.is_some()
	}

	pub async fn store(
		&self,
		owner_id: &str,
		content: &str,
		raw_metadata: Map<String, Value>,
	) -> Result<MemoryRecord> {
		ensure_owner(owner_id)?;
		ensure_indexable(content, &raw_metadata)?;

		let now = OffsetDateTime::now_utc();
		let metadata = self.profile.process_metadata(
			content,
			raw_metadata,
			&MetadataContext { now, previous: None },
		);
		let (full, compact) =
			self.embedding.generate_pair(embedding_text(content, &metadata)).await?;
		let record = MemoryRecord {
			id: Uuid::new_v4(),
			owner_id: owner_id.to_string(),
			content: content.to_string(),
			metadata,
			embedding: Some(full),
			access_count: 0,
			last_accessed: None,
			created_at: now,
			updated_at: now,
		};

		self.store.insert(&record).await?;
		self.refresh_index(&record, compact).await;

		tracing::debug!(module_id = self.module_id.as_str(), record_id = %record.id, "Record stored.");

		Ok(record)
	}

	pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Option<MemoryRecord>> {
		let Some(mut record) = self.store.get(owner_id, id).await? else {
			return Ok(None);
		};
		let now = OffsetDateTime::now_utc();

		self.store.touch(owner_id, &[id], now).await?;

		record.access_count += 1;
		record.last_accessed = Some(now);

		Ok(Some(record))
	}

	/// Applies `patch`. Returns `false` when the record does not exist for `owner_id`.
	pub async fn update(&self, owner_id: &str, id: Uuid, patch: RecordPatch) -> Result<bool> {
		let Some(existing) = self.store.get(owner_id, id).await? else {
			return Ok(false);
		};

		if patch.content.is_none() && patch.metadata.is_none() {
			return Ok(true);
		}

		let content = patch.content.unwrap_or_else(|| existing.content.clone());
		let mut merged = existing.metadata.clone();

		if let Some(fields) = patch.metadata {
			merged.extend(fields);
		}

		ensure_indexable(&content, &merged)?;

		let now = OffsetDateTime::now_utc();
		let metadata = self.profile.process_metadata(
			&content,
			merged,
			&MetadataContext { now, previous: Some(&existing.metadata) },
		);
		let text_changed =
			embedding_text(&content, &metadata) != embedding_text(&existing.content, &existing.metadata);
		let (full, compact) = match existing.embedding.as_deref() {
			Some(full) if !text_changed => (full.to_vec(), self.embedding.reduce(full)),
			_ => self.embedding.generate_pair(embedding_text(&content, &metadata)).await?,
		};
		let record = MemoryRecord {
			content,
			metadata,
			embedding: Some(full),
			updated_at: now,
			..existing
		};

		if !self.store.replace(&record).await? {
			return Ok(false);
		}

		self.refresh_index(&record, compact).await;

		Ok(true)
	}

	/// Removes the record and its index entry. Returns `false` when nothing was deleted.
	pub async fn delete(&self, owner_id: &str, id: Uuid) -> Result<bool> {
		if !self.store.delete(owner_id, id).await? {
			return Ok(false);
		}

		if let Some(index) = self.index.as_ref()
			&& let Err(err) = index.remove_index(owner_id, &self.module_id, id).await
		{
			tracing::warn!(
				error = %err,
				module_id = self.module_id.as_str(),
				record_id = %id,
				"Failed to remove index entry."
			);
		}

		Ok(true)
	}

	pub async fn search_by_embedding(
		&self,
		owner_id: &str,
		vector: &[f32],
		options: &SearchOptions,
	) -> Result<Vec<ScoredRecord>> {
		let expected = self.embedding.full_dimensions();

		if vector.len() != expected {
			return Err(Error::DimensionMismatch { expected, actual: vector.len() });
		}

		let query = VectorQuery {
			limit: options.limit,
			min_score: options.min_score,
			filters: options.filters.clone(),
		};
		let mut hits = self.store.search_by_embedding(owner_id, vector, &query).await?;

		if hits.is_empty() {
			return Ok(hits);
		}

		let now = OffsetDateTime::now_utc();
		let ids: Vec<Uuid> = hits.iter().map(|hit| hit.record.id).collect();

		self.store.touch(owner_id, &ids, now).await?;

		for hit in &mut hits {
			hit.record.access_count += 1;
			hit.record.last_accessed = Some(now);
		}

		Ok(hits)
	}

	pub async fn search_by_metadata(
		&self,
		owner_id: &str,
		predicate: &Map<String, Value>,
		limit: Option<u32>,
	) -> Result<Vec<MemoryRecord>> {
		Ok(self.store.search_by_metadata(owner_id, predicate, limit).await?)
	}

	/// Semantic search over this module. When the query cannot be embedded the metadata filters
	/// are applied alone and every hit scores `0.0`.
	pub async fn search(
		&self,
		owner_id: &str,
		query_text: &str,
		options: &SearchOptions,
	) -> Result<Vec<ScoredRecord>> {
		match self.embedding.generate_full(query_text).await {
			Ok(vector) => self.search_by_embedding(owner_id, &vector, options).await,
			Err(Error::EmbeddingGeneration(err)) => {
				tracing::warn!(
					error = %err,
					module_id = self.module_id.as_str(),
					"Query embedding failed. Falling back to metadata search."
				);

				let records =
					self.search_by_metadata(owner_id, &options.filters, Some(options.limit)).await?;

				Ok(records.into_iter().map(|record| ScoredRecord { record, score: 0.0 }).collect())
			},
			Err(err) => Err(err),
		}
	}

	pub async fn calculate_stats(&self, owner_id: &str) -> Result<ModuleStats> {
		let stats = self.store.stats(owner_id, TOP_CATEGORIES).await?;

		Ok(ModuleStats {
			total_memories: stats.total,
			average_access_count: stats.average_access_count,
			most_frequent_categories: stats
				.categories
				.into_iter()
				.map(|(category, count)| CategoryCount { category, count })
				.collect(),
			last_accessed: stats.last_accessed,
		})
	}

	pub async fn list_records(&self, owner_id: Option<&str>) -> Result<Vec<MemoryRecord>> {
		Ok(self.store.list(owner_id).await?)
	}

	pub(crate) fn summarize(&self, record: &MemoryRecord) -> IndexSummary {
		self.profile.summarize(&record.content, &record.metadata)
	}

	/// Index upsert after a committed write. Failures are logged and left to reconciliation.
	async fn refresh_index(&self, record: &MemoryRecord, compact: Vec<f32>) {
		let Some(index) = self.index.as_ref() else {
			return;
		};
		let IndexSummary { title, summary } = self.summarize(record);
		let payload = IndexPayload { title, summary, compact_embedding: compact };

		if let Err(err) =
			index.upsert_index(&record.owner_id, &self.module_id, record.id, payload).await
		{
			tracing::warn!(
				error = %err,
				module_id = self.module_id.as_str(),
				record_id = %record.id,
				"Failed to upsert index entry."
			);
		}
	}
}

/// Title from `title`, `name`, the first content line, or `type`; summary from the content.
pub fn default_summary(content: &str, metadata: &Map<String, Value>) -> IndexSummary {
	let title = metadata_str(metadata, "title")
		.or_else(|| metadata_str(metadata, "name"))
		.or_else(|| Some(text::first_line(content)).filter(|line| !line.is_empty()))
		.or_else(|| metadata_str(metadata, "type"))
		.unwrap_or_default();

	IndexSummary {
		title: text::truncate_chars(title, TITLE_MAX_CHARS),
		summary: text::truncate_chars(&text::normalize_text(content), SUMMARY_MAX_CHARS),
	}
}

/// Non-blank string field of `metadata`.
pub fn metadata_str<'a>(metadata: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
	metadata.get(key).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}

/// The text a record is embedded from: its content, or its type when the content is blank.
fn embedding_text<'a>(content: &'a str, metadata: &'a Map<String, Value>) -> &'a str {
	if content.trim().is_empty() { metadata_str(metadata, "type").unwrap_or(content) } else { content }
}

fn ensure_owner(owner_id: &str) -> Result<()> {
	if owner_id.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "owner_id must be non-empty.".to_string() });
	}

	Ok(())
}

fn ensure_indexable(content: &str, metadata: &Map<String, Value>) -> Result<()> {
	if content.trim().is_empty() && metadata_str(metadata, "type").is_none() {
		return Err(Error::InvalidRequest {
			message: "A record needs non-empty content or a metadata type.".to_string(),
		});
	}

	Ok(())
}
