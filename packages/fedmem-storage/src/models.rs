use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, vector};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
	pub id: Uuid,
	pub owner_id: String,
	pub content: String,
	pub metadata: Map<String, Value>,
	pub embedding: Option<Vec<f32>>,
	pub access_count: i64,
	pub last_accessed: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
	pub record: MemoryRecord,
	pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VectorQuery {
	pub limit: u32,
	pub min_score: Option<f32>,
	/// Equality predicates over top-level metadata fields.
	pub filters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordStats {
	pub total: i64,
	pub average_access_count: f64,
	/// `(category, count)` ordered by count descending, then category ascending.
	pub categories: Vec<(String, i64)>,
	pub last_accessed: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
	pub owner_id: String,
	pub module_id: String,
	pub remote_memory_id: Uuid,
	pub title: String,
	pub summary: String,
	pub compact_embedding: Vec<f32>,
	pub last_accessed: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecordRow {
	pub id: Uuid,
	pub owner_id: String,
	pub content: String,
	pub metadata: Value,
	pub vec_text: Option<String>,
	pub access_count: i64,
	pub last_accessed: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl TryFrom<RecordRow> for MemoryRecord {
	type Error = Error;

	fn try_from(row: RecordRow) -> Result<Self> {
		let embedding = row.vec_text.as_deref().map(vector::parse_pg_vector).transpose()?;
		let metadata = match row.metadata {
			Value::Object(map) => map,
			Value::Null => Map::new(),
			other =>
				return Err(Error::CorruptRow(format!(
					"Record {} metadata is not an object: {other}.",
					row.id
				))),
		};

		Ok(Self {
			id: row.id,
			owner_id: row.owner_id,
			content: row.content,
			metadata,
			embedding,
			access_count: row.access_count,
			last_accessed: row.last_accessed,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ScoredRecordRow {
	#[sqlx(flatten)]
	pub record: RecordRow,
	pub score: f32,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct IndexEntryRow {
	pub owner_id: String,
	pub module_id: String,
	pub remote_memory_id: Uuid,
	pub title: String,
	pub summary: String,
	pub vec_text: String,
	pub last_accessed: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl TryFrom<IndexEntryRow> for IndexEntry {
	type Error = Error;

	fn try_from(row: IndexEntryRow) -> Result<Self> {
		Ok(Self {
			compact_embedding: vector::parse_pg_vector(&row.vec_text)?,
			owner_id: row.owner_id,
			module_id: row.module_id,
			remote_memory_id: row.remote_memory_id,
			title: row.title,
			summary: row.summary,
			last_accessed: row.last_accessed,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}
