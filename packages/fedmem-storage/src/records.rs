use serde_json::{Map, Value};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, RecordStore, Result,
	models::{MemoryRecord, RecordRow, RecordStats, ScoredRecord, ScoredRecordRow, VectorQuery},
	schema, vector,
};

const RECORD_COLUMNS: &str = "\
id,
	owner_id,
	content,
	metadata,
	vec::text AS vec_text,
	access_count,
	last_accessed,
	created_at,
	updated_at";

/// Module table backed by Postgres with a pgvector column.
pub struct PgRecordStore {
	pool: PgPool,
	table: String,
}
impl PgRecordStore {
	pub fn new(pool: PgPool, module_id: &str) -> Result<Self> {
		if !fedmem_config::is_valid_module_id(module_id) {
			return Err(Error::InvalidArgument(format!("Invalid module id {module_id:?}.")));
		}

		Ok(Self { pool, table: schema::table_name(module_id) })
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	async fn insert_record(&self, record: &MemoryRecord) -> Result<()> {
		let sql = format!(
			"\
INSERT INTO {} (
	id,
	owner_id,
	content,
	metadata,
	vec,
	access_count,
	last_accessed,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5::text::vector, $6, $7, $8, $9)",
			self.table
		);

		sqlx::query(&sql)
			.bind(record.id)
			.bind(record.owner_id.as_str())
			.bind(record.content.as_str())
			.bind(Value::Object(record.metadata.clone()))
			.bind(record.embedding.as_deref().map(vector::vector_to_pg))
			.bind(record.access_count)
			.bind(record.last_accessed)
			.bind(record.created_at)
			.bind(record.updated_at)
			.execute(&self.pool)
			.await?;

		Ok(())
	}

	async fn get_record(&self, owner_id: &str, id: Uuid) -> Result<Option<MemoryRecord>> {
		let sql = format!(
			"SELECT {RECORD_COLUMNS} FROM {} WHERE id = $1 AND owner_id = $2",
			self.table
		);
		let row: Option<RecordRow> =
			sqlx::query_as(&sql).bind(id).bind(owner_id).fetch_optional(&self.pool).await?;

		row.map(MemoryRecord::try_from).transpose()
	}

	async fn replace_record(&self, record: &MemoryRecord) -> Result<bool> {
		let sql = format!(
			"\
UPDATE {}
SET
	content = $1,
	metadata = $2,
	vec = $3::text::vector,
	updated_at = $4
WHERE id = $5 AND owner_id = $6",
			self.table
		);
		let result = sqlx::query(&sql)
			.bind(record.content.as_str())
			.bind(Value::Object(record.metadata.clone()))
			.bind(record.embedding.as_deref().map(vector::vector_to_pg))
			.bind(record.updated_at)
			.bind(record.id)
			.bind(record.owner_id.as_str())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn delete_record(&self, owner_id: &str, id: Uuid) -> Result<bool> {
		let sql = format!("DELETE FROM {} WHERE id = $1 AND owner_id = $2", self.table);
		let result = sqlx::query(&sql).bind(id).bind(owner_id).execute(&self.pool).await?;

		Ok(result.rows_affected() > 0)
	}

	async fn touch_records(&self, owner_id: &str, ids: &[Uuid], at: OffsetDateTime) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}

		let sql = format!(
			"\
UPDATE {}
SET access_count = access_count + 1, last_accessed = $1
WHERE owner_id = $2 AND id = ANY($3)",
			self.table
		);
		let result =
			sqlx::query(&sql).bind(at).bind(owner_id).bind(ids).execute(&self.pool).await?;

		Ok(result.rows_affected())
	}

	async fn search_records_by_embedding(
		&self,
		owner_id: &str,
		query_vec: &[f32],
		query: &VectorQuery,
	) -> Result<Vec<ScoredRecord>> {
		// `<=>` is NaN against a zero-norm vector; such rows score 0 like the in-memory store.
		let sql = format!(
			"\
SELECT *
FROM (
	SELECT
		{RECORD_COLUMNS},
		coalesce(nullif(1 - (vec <=> $2::text::vector), 'NaN'::float8), 0)::real AS score
	FROM {}
	WHERE owner_id = $1 AND vec IS NOT NULL AND metadata @> $3
) scored
WHERE $4::real IS NULL OR score >= $4
ORDER BY score DESC, created_at ASC, id ASC
LIMIT $5",
			self.table
		);
		let rows: Vec<ScoredRecordRow> = sqlx::query_as(&sql)
			.bind(owner_id)
			.bind(vector::vector_to_pg(query_vec))
			.bind(Value::Object(query.filters.clone()))
			.bind(query.min_score)
			.bind(i64::from(query.limit))
			.fetch_all(&self.pool)
			.await?;
		let mut out = Vec::with_capacity(rows.len());

		for row in rows {
			out.push(ScoredRecord { record: MemoryRecord::try_from(row.record)?, score: row.score });
		}

		Ok(out)
	}

	async fn search_records_by_metadata(
		&self,
		owner_id: &str,
		predicate: &Map<String, Value>,
		limit: Option<u32>,
	) -> Result<Vec<MemoryRecord>> {
		let sql = format!(
			"\
SELECT {RECORD_COLUMNS}
FROM {}
WHERE owner_id = $1 AND metadata @> $2
ORDER BY created_at DESC, id ASC
LIMIT $3",
			self.table
		);
		let rows: Vec<RecordRow> = sqlx::query_as(&sql)
			.bind(owner_id)
			.bind(Value::Object(predicate.clone()))
			.bind(limit.map(i64::from))
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(MemoryRecord::try_from).collect()
	}

	async fn record_stats(&self, owner_id: &str, top_categories: u32) -> Result<RecordStats> {
		let totals_sql = format!(
			"\
SELECT
	count(*) AS total,
	coalesce(avg(access_count), 0)::float8 AS average_access_count,
	max(last_accessed) AS last_accessed
FROM {}
WHERE owner_id = $1",
			self.table
		);
		let (total, average_access_count, last_accessed): (i64, f64, Option<OffsetDateTime>) =
			sqlx::query_as(&totals_sql).bind(owner_id).fetch_one(&self.pool).await?;
		let categories_sql = format!(
			"\
SELECT category, count(*) AS n
FROM (
	SELECT coalesce(metadata->>'category', metadata->>'type') AS category
	FROM {}
	WHERE owner_id = $1
) c
WHERE category IS NOT NULL AND category <> ''
GROUP BY category
ORDER BY n DESC, category ASC
LIMIT $2",
			self.table
		);
		let categories: Vec<(String, i64)> = sqlx::query_as(&categories_sql)
			.bind(owner_id)
			.bind(i64::from(top_categories))
			.fetch_all(&self.pool)
			.await?;

		Ok(RecordStats { total, average_access_count, categories, last_accessed })
	}

	async fn list_records(&self, owner_id: Option<&str>) -> Result<Vec<MemoryRecord>> {
		let sql = format!(
			"\
SELECT {RECORD_COLUMNS}
FROM {}
WHERE ($1::text IS NULL OR owner_id = $1)
ORDER BY created_at ASC, id ASC",
			self.table
		);
		let rows: Vec<RecordRow> =
			sqlx::query_as(&sql).bind(owner_id).fetch_all(&self.pool).await?;

		rows.into_iter().map(MemoryRecord::try_from).collect()
	}
}

impl RecordStore for PgRecordStore {
	fn insert<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.insert_record(record))
	}

	fn get<'a>(
		&'a self,
		owner_id: &'a str,
		id: Uuid,
	) -> BoxFuture<'a, Result<Option<MemoryRecord>>> {
		Box::pin(self.get_record(owner_id, id))
	}

	fn replace<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.replace_record(record))
	}

	fn delete<'a>(&'a self, owner_id: &'a str, id: Uuid) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.delete_record(owner_id, id))
	}

	fn touch<'a>(
		&'a self,
		owner_id: &'a str,
		ids: &'a [Uuid],
		at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.touch_records(owner_id, ids, at))
	}

	fn search_by_embedding<'a>(
		&'a self,
		owner_id: &'a str,
		vector: &'a [f32],
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<ScoredRecord>>> {
		Box::pin(self.search_records_by_embedding(owner_id, vector, query))
	}

	fn search_by_metadata<'a>(
		&'a self,
		owner_id: &'a str,
		predicate: &'a Map<String, Value>,
		limit: Option<u32>,
	) -> BoxFuture<'a, Result<Vec<MemoryRecord>>> {
		Box::pin(self.search_records_by_metadata(owner_id, predicate, limit))
	}

	fn stats<'a>(
		&'a self,
		owner_id: &'a str,
		top_categories: u32,
	) -> BoxFuture<'a, Result<RecordStats>> {
		Box::pin(self.record_stats(owner_id, top_categories))
	}

	fn list<'a>(&'a self, owner_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<MemoryRecord>>> {
		Box::pin(self.list_records(owner_id))
	}
}
